//! Favorites index: starred tags, kept per source taxonomy.
//!
//! Each taxonomy gets a reduced `Category` tree that mirrors the category path
//! of every starred tag, so the same value starred from two taxonomies stays
//! two separate favorites. The `follow_*` methods replay a structural edit of
//! the source tree onto the mirror so favorites never point at a name or path
//! that no longer exists.
//!
//! Every method returns whether the index changed, so callers only persist
//! when there is something to write.

use crate::ids::TaxonomyId;
use crate::model::{Category, Entry};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FavoritesIndex {
    taxonomies: IndexMap<TaxonomyId, Category>,
}

impl FavoritesIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.taxonomies.is_empty()
    }

    /// Favorites mirrored from one taxonomy.
    pub fn get(&self, taxonomy: &TaxonomyId) -> Option<&Category> {
        self.taxonomies.get(taxonomy)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaxonomyId, &Category)> {
        self.taxonomies.iter()
    }

    /// Star a tag under `path`. Intermediate categories are created.
    pub fn add<S: AsRef<str>>(
        &mut self,
        taxonomy: &TaxonomyId,
        path: &[S],
        name: &str,
        value: &str,
    ) -> bool {
        let root = self.taxonomies.entry(taxonomy.clone()).or_default();
        let added = match root.ensure_category(path) {
            Some(category) if matches!(category.get(name), Some(Entry::Tag(v)) if v == value) => {
                false
            }
            Some(category) => {
                category.set_tag(name, value);
                true
            }
            None => false,
        };
        self.tidy(taxonomy);
        added
    }

    /// Unstar every favorite of `taxonomy` carrying `value`.
    pub fn remove_value(&mut self, taxonomy: &TaxonomyId, value: &str) -> bool {
        let removed = self
            .taxonomies
            .get_mut(taxonomy)
            .map(|root| root.remove_value(value))
            .unwrap_or(0);
        self.tidy(taxonomy);
        removed > 0
    }

    /// With a taxonomy, check only that taxonomy's favorites; without one,
    /// check all of them.
    pub fn is_favorited(&self, value: &str, taxonomy: Option<&TaxonomyId>) -> bool {
        match taxonomy {
            Some(taxonomy) => self
                .taxonomies
                .get(taxonomy)
                .is_some_and(|root| root.contains_value(value)),
            None => self
                .taxonomies
                .values()
                .any(|root| root.contains_value(value)),
        }
    }

    /// Forget everything starred from `taxonomy`.
    pub fn drop_taxonomy(&mut self, taxonomy: &TaxonomyId) -> bool {
        self.taxonomies.shift_remove(taxonomy).is_some()
    }

    pub fn follow_rename_tag<S: AsRef<str>>(
        &mut self,
        taxonomy: &TaxonomyId,
        path: &[S],
        name: &str,
        value: &str,
        new_name: &str,
    ) -> bool {
        self.category_mut(taxonomy, path)
            .is_some_and(|category| category.rename_tag(name, value, new_name).is_ok())
    }

    pub fn follow_update_tag<S: AsRef<str>>(
        &mut self,
        taxonomy: &TaxonomyId,
        path: &[S],
        name: &str,
        value: &str,
        new_name: &str,
        new_value: &str,
    ) -> bool {
        self.category_mut(taxonomy, path).is_some_and(|category| {
            category
                .update_tag(name, value, new_name, new_value)
                .is_ok()
        })
    }

    pub fn follow_rename_category<S: AsRef<str>>(
        &mut self,
        taxonomy: &TaxonomyId,
        path: &[S],
        new_name: &str,
    ) -> bool {
        let Some((old_name, parent)) = path.split_last() else {
            return false;
        };
        self.category_mut(taxonomy, parent).is_some_and(|category| {
            category
                .rename_category(old_name.as_ref(), new_name)
                .is_ok()
        })
    }

    pub fn follow_delete_tag<S: AsRef<str>>(
        &mut self,
        taxonomy: &TaxonomyId,
        path: &[S],
        name: &str,
        value: &str,
    ) -> bool {
        let removed = self
            .category_mut(taxonomy, path)
            .is_some_and(|category| category.remove_tag(name, value).is_ok());
        self.tidy(taxonomy);
        removed
    }

    pub fn follow_delete_category<S: AsRef<str>>(&mut self, taxonomy: &TaxonomyId, path: &[S]) -> bool {
        let Some((name, parent)) = path.split_last() else {
            return self.drop_taxonomy(taxonomy);
        };
        let removed = self
            .category_mut(taxonomy, parent)
            .is_some_and(|category| category.remove_category(name.as_ref()).is_ok());
        self.tidy(taxonomy);
        removed
    }

    /// Re-point a starred tag at its new category.
    pub fn follow_move_tag<A: AsRef<str>, B: AsRef<str>>(
        &mut self,
        taxonomy: &TaxonomyId,
        from: &[A],
        to: &[B],
        name: &str,
        value: &str,
    ) -> bool {
        let was_starred = self
            .category_mut(taxonomy, from)
            .is_some_and(|category| category.remove_tag(name, value).is_ok());
        if !was_starred {
            return false;
        }
        self.tidy(taxonomy);
        self.add(taxonomy, to, name, value);
        true
    }

    /// Carry the starred part of a moved category along with it.
    pub fn follow_move_category<A: AsRef<str>, B: AsRef<str>>(
        &mut self,
        taxonomy: &TaxonomyId,
        from: &[A],
        to_parent: &[B],
    ) -> bool {
        let Some((name, parent)) = from.split_last() else {
            return false;
        };
        let name = name.as_ref();
        let Some(moved) = self
            .category_mut(taxonomy, parent)
            .and_then(|category| category.remove_category(name).ok())
        else {
            return false;
        };
        if let Some(destination) = self
            .taxonomies
            .entry(taxonomy.clone())
            .or_default()
            .ensure_category(to_parent)
        {
            destination.set_category(name, moved);
        }
        self.tidy(taxonomy);
        true
    }

    fn category_mut<S: AsRef<str>>(
        &mut self,
        taxonomy: &TaxonomyId,
        path: &[S],
    ) -> Option<&mut Category> {
        self.taxonomies.get_mut(taxonomy)?.find_category_mut(path)
    }

    /// Drop emptied categories, and the taxonomy itself once nothing is left.
    fn tidy(&mut self, taxonomy: &TaxonomyId) {
        if let Some(root) = self.taxonomies.get_mut(taxonomy) {
            root.prune_empty();
            if root.is_empty() {
                self.taxonomies.shift_remove(taxonomy);
            }
        }
    }
}
