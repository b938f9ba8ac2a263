//! Category tree: ordered categories holding tags and nested categories.
//!
//! A `Category` is an ordered map from entry name to `Entry`, where an entry is
//! either a tag leaf (name -> value) or another category. Order is part of the
//! data: it drives display order and is kept through persistence.
//!
//! Operations come in two flavors:
//! - parent-level (`insert_tag`, `rename_category`, `reorder`, ...) act on the
//!   category they are called on
//! - root-level (`find_category`, `move_tag`, `move_category`, ...) take paths
//!   relative to the category they are called on
//!
//! Every operation validates before touching the map, so a returned error
//! means nothing changed.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Path element that denotes the root category itself.
pub const ROOT_SENTINEL: &str = "__root__";

/// Reserved leaf name some backends write so an empty category survives a
/// round trip. Stripped on load, never accepted as a user name.
pub const PLACEHOLDER_KEY: &str = "__placeholder__";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("An entry named '{key}' already exists")]
    DuplicateKey { key: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Invalid name: {name:?}")]
    InvalidName { name: String },

    #[error("Invalid tag value: {value:?}")]
    InvalidValue { value: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type Result<T> = std::result::Result<T, TreeError>;

/// A tag as shown to the user: display label plus the text it inserts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One entry of a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entry {
    /// Leaf tag; the map key is its name, this is its value.
    Tag(String),
    /// Nested category; the map key is its name.
    Category(Category),
}

impl Entry {
    pub fn as_category(&self) -> Option<&Category> {
        match self {
            Entry::Category(category) => Some(category),
            Entry::Tag(_) => None,
        }
    }

    pub fn as_category_mut(&mut self) -> Option<&mut Category> {
        match self {
            Entry::Category(category) => Some(category),
            Entry::Tag(_) => None,
        }
    }

    pub fn as_tag_value(&self) -> Option<&str> {
        match self {
            Entry::Tag(value) => Some(value),
            Entry::Category(_) => None,
        }
    }
}

/// Where a tag lives: the path of its parent category and its key there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagLocation {
    pub path: Vec<String>,
    pub key: String,
}

/// A tag found while walking a tree, with the path of its parent category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagRef {
    pub path: Vec<String>,
    pub name: String,
    pub value: String,
}

/// Ordered category of tags and subcategories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category {
    entries: IndexMap<String, Entry>,
}

// IndexMap equality ignores order; category equality must not.
impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len() && self.entries.iter().eq(other.entries.iter())
    }
}

impl Eq for Category {}

/// Drop a leading `ROOT_SENTINEL` so `["__root__", "a"]` and `["a"]` agree.
fn strip_sentinel<S: AsRef<str>>(path: &[S]) -> &[S] {
    match path.first() {
        Some(first) if first.as_ref() == ROOT_SENTINEL => &path[1..],
        _ => path,
    }
}

/// Whether `path` denotes the root category.
pub fn is_root_path<S: AsRef<str>>(path: &[S]) -> bool {
    strip_sentinel(path).is_empty()
}

/// Normalize a path to owned segments without the root sentinel.
pub fn owned_path<S: AsRef<str>>(path: &[S]) -> Vec<String> {
    strip_sentinel(path)
        .iter()
        .map(|segment| segment.as_ref().to_string())
        .collect()
}

/// Render a path for messages: `a/b/c`, or `(root)`.
pub fn display_path<S: AsRef<str>>(path: &[S]) -> String {
    let path = strip_sentinel(path);
    if path.is_empty() {
        "(root)".to_string()
    } else {
        path.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("/")
    }
}

/// Parse `a/b/c` into segments. Empty input, `/` and `__root__` mean the root.
pub fn parse_path(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect();
    owned_path(segments.as_slice())
}

fn same_path<A: AsRef<str>, B: AsRef<str>>(a: &[A], b: &[B]) -> bool {
    let (a, b) = (strip_sentinel(a), strip_sentinel(b));
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.as_ref() == y.as_ref())
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name == ROOT_SENTINEL || name == PLACEHOLDER_KEY {
        return Err(TreeError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// A blank value has no textual form of its own; its encodings are bare
/// separators that match inside any list.
pub fn validate_value(value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TreeError::InvalidValue {
            value: value.to_string(),
        });
    }
    Ok(())
}

fn category_not_found<S: AsRef<str>>(path: &[S]) -> TreeError {
    TreeError::NotFound {
        what: format!("category {}", display_path(path)),
    }
}

fn tag_not_found(name: &str, value: &str) -> TreeError {
    TreeError::NotFound {
        what: format!("tag '{}' ({})", name, value),
    }
}

impl Category {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: append a tag, replacing any entry with the same name.
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(name.into(), Entry::Tag(value.into()));
        self
    }

    /// Builder: append a subcategory, replacing any entry with the same name.
    pub fn with_category(mut self, name: impl Into<String>, category: Category) -> Self {
        self.entries.insert(name.into(), Entry::Category(category));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entry names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Direct tag leaves in order.
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.entries.iter().filter_map(|(name, entry)| {
            entry
                .as_tag_value()
                .map(|value| Tag::new(name.clone(), value))
        })
    }

    /// Direct subcategories in order.
    pub fn categories(&self) -> impl Iterator<Item = (&str, &Category)> {
        self.entries
            .iter()
            .filter_map(|(name, entry)| entry.as_category().map(|c| (name.as_str(), c)))
    }

    // ---------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------

    /// Descend through category names. An empty path or `[ROOT_SENTINEL]` is
    /// this category itself.
    pub fn find_category<S: AsRef<str>>(&self, path: &[S]) -> Option<&Category> {
        let mut current = self;
        for name in strip_sentinel(path) {
            current = current.entries.get(name.as_ref())?.as_category()?;
        }
        Some(current)
    }

    pub fn find_category_mut<S: AsRef<str>>(&mut self, path: &[S]) -> Option<&mut Category> {
        let mut current = self;
        for name in strip_sentinel(path) {
            current = current.entries.get_mut(name.as_ref())?.as_category_mut()?;
        }
        Some(current)
    }

    /// Get or create the category at `path`. Returns `None` if a tag sits
    /// where a category is needed.
    pub fn ensure_category<S: AsRef<str>>(&mut self, path: &[S]) -> Option<&mut Category> {
        let mut current = self;
        for name in strip_sentinel(path) {
            current = current
                .entries
                .entry(name.as_ref().to_string())
                .or_insert_with(|| Entry::Category(Category::new()))
                .as_category_mut()?;
        }
        Some(current)
    }

    /// Locate the parent of the first leaf (depth-first, in order) whose name
    /// AND value both match.
    pub fn find_tag_owner(&self, name: &str, value: &str) -> Option<TagLocation> {
        fn visit(
            category: &Category,
            path: &mut Vec<String>,
            name: &str,
            value: &str,
        ) -> Option<TagLocation> {
            for (key, entry) in &category.entries {
                match entry {
                    Entry::Tag(v) if key == name && v == value => {
                        return Some(TagLocation {
                            path: path.clone(),
                            key: key.clone(),
                        });
                    }
                    Entry::Tag(_) => {}
                    Entry::Category(child) => {
                        path.push(key.clone());
                        let found = visit(child, path, name, value);
                        path.pop();
                        if found.is_some() {
                            return found;
                        }
                    }
                }
            }
            None
        }

        visit(self, &mut Vec::new(), name, value)
    }

    /// All tags in the tree, depth-first in display order.
    pub fn walk_tags(&self) -> Vec<TagRef> {
        fn visit(category: &Category, path: &mut Vec<String>, out: &mut Vec<TagRef>) {
            for (key, entry) in &category.entries {
                match entry {
                    Entry::Tag(value) => out.push(TagRef {
                        path: path.clone(),
                        name: key.clone(),
                        value: value.clone(),
                    }),
                    Entry::Category(child) => {
                        path.push(key.clone());
                        visit(child, path, out);
                        path.pop();
                    }
                }
            }
        }

        let mut out = Vec::new();
        visit(self, &mut Vec::new(), &mut out);
        out
    }

    /// Whether any leaf in the tree carries `value`.
    pub fn contains_value(&self, value: &str) -> bool {
        self.entries.values().any(|entry| match entry {
            Entry::Tag(v) => v == value,
            Entry::Category(child) => child.contains_value(value),
        })
    }

    // ---------------------------------------------------------------------
    // Parent-level mutation
    // ---------------------------------------------------------------------

    /// Add an empty subcategory.
    pub fn insert_category(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        if self.entries.contains_key(name) {
            return Err(TreeError::DuplicateKey {
                key: name.to_string(),
            });
        }
        self.entries
            .insert(name.to_string(), Entry::Category(Category::new()));
        Ok(())
    }

    /// Append a tag leaf.
    pub fn insert_tag(&mut self, name: &str, value: &str) -> Result<()> {
        validate_name(name)?;
        validate_value(value)?;
        if self.entries.contains_key(name) {
            return Err(TreeError::DuplicateKey {
                key: name.to_string(),
            });
        }
        self.entries
            .insert(name.to_string(), Entry::Tag(value.to_string()));
        Ok(())
    }

    /// Swap a key for another at the same position.
    fn replace_key(&mut self, old: &str, new: &str) {
        let entries = std::mem::take(&mut self.entries);
        self.entries = entries
            .into_iter()
            .map(|(key, entry)| {
                if key == old {
                    (new.to_string(), entry)
                } else {
                    (key, entry)
                }
            })
            .collect();
    }

    fn check_rename(&self, old: &str, new: &str) -> Result<()> {
        validate_name(new)?;
        if old != new && self.entries.contains_key(new) {
            return Err(TreeError::DuplicateKey {
                key: new.to_string(),
            });
        }
        Ok(())
    }

    fn has_tag(&self, name: &str, value: &str) -> bool {
        matches!(self.entries.get(name), Some(Entry::Tag(v)) if v == value)
    }

    /// Rename a direct subcategory, keeping its position.
    pub fn rename_category(&mut self, old: &str, new: &str) -> Result<()> {
        if !matches!(self.entries.get(old), Some(Entry::Category(_))) {
            return Err(category_not_found(&[old]));
        }
        self.check_rename(old, new)?;
        self.replace_key(old, new);
        Ok(())
    }

    /// Rename a direct tag leaf, keeping its position and value.
    pub fn rename_tag(&mut self, name: &str, value: &str, new_name: &str) -> Result<()> {
        if !self.has_tag(name, value) {
            return Err(tag_not_found(name, value));
        }
        self.check_rename(name, new_name)?;
        self.replace_key(name, new_name);
        Ok(())
    }

    /// Change a tag's name and value in place.
    pub fn update_tag(
        &mut self,
        name: &str,
        value: &str,
        new_name: &str,
        new_value: &str,
    ) -> Result<()> {
        if !self.has_tag(name, value) {
            return Err(tag_not_found(name, value));
        }
        self.check_rename(name, new_name)?;
        validate_value(new_value)?;
        self.replace_key(name, new_name);
        if let Some(Entry::Tag(v)) = self.entries.get_mut(new_name) {
            *v = new_value.to_string();
        }
        Ok(())
    }

    /// Remove a direct subcategory and everything under it.
    pub fn remove_category(&mut self, name: &str) -> Result<Category> {
        if !matches!(self.entries.get(name), Some(Entry::Category(_))) {
            return Err(category_not_found(&[name]));
        }
        match self.entries.shift_remove(name) {
            Some(Entry::Category(category)) => Ok(category),
            _ => Err(category_not_found(&[name])),
        }
    }

    /// Remove a direct tag leaf whose name and value match.
    pub fn remove_tag(&mut self, name: &str, value: &str) -> Result<()> {
        if !self.has_tag(name, value) {
            return Err(tag_not_found(name, value));
        }
        self.entries.shift_remove(name);
        Ok(())
    }

    /// Reorder entries: keys listed in `order` first, then any keys the list
    /// left out in their previous relative order. Unknown and repeated keys
    /// are ignored, so entries are never created or dropped.
    pub fn reorder<S: AsRef<str>>(&mut self, order: &[S]) {
        let mut remaining = std::mem::take(&mut self.entries);
        let mut reordered = IndexMap::with_capacity(remaining.len());
        for key in order {
            if let Some((key, entry)) = remaining.shift_remove_entry(key.as_ref()) {
                reordered.insert(key, entry);
            }
        }
        reordered.extend(remaining);
        self.entries = reordered;
    }

    // ---------------------------------------------------------------------
    // Root-level mutation
    // ---------------------------------------------------------------------

    /// Move a tag between categories. The tag keeps its value and is appended
    /// at the end of the destination. Moving within one category is a no-op.
    pub fn move_tag<A: AsRef<str>, B: AsRef<str>>(
        &mut self,
        from: &[A],
        to: &[B],
        name: &str,
        value: &str,
    ) -> Result<()> {
        let source = self
            .find_category(from)
            .ok_or_else(|| category_not_found(from))?;
        if !source.has_tag(name, value) {
            return Err(tag_not_found(name, value));
        }
        let destination = self.find_category(to).ok_or_else(|| category_not_found(to))?;
        if same_path(from, to) {
            return Ok(());
        }
        if destination.contains_key(name) {
            return Err(TreeError::DuplicateKey {
                key: name.to_string(),
            });
        }

        if let Some(source) = self.find_category_mut(from) {
            source.entries.shift_remove(name);
        }
        if let Some(destination) = self.find_category_mut(to) {
            destination
                .entries
                .insert(name.to_string(), Entry::Tag(value.to_string()));
        }
        Ok(())
    }

    /// Move the category at `from` under `to_parent`, appended at the end.
    pub fn move_category<A: AsRef<str>, B: AsRef<str>>(
        &mut self,
        from: &[A],
        to_parent: &[B],
    ) -> Result<()> {
        let from = strip_sentinel(from);
        let to_parent = strip_sentinel(to_parent);
        let Some((name, from_parent)) = from.split_last() else {
            return Err(TreeError::InvalidOperation(
                "the root category cannot be moved".to_string(),
            ));
        };
        let name = name.as_ref();
        let into_itself = to_parent.len() >= from.len()
            && from
                .iter()
                .zip(to_parent)
                .all(|(a, b)| a.as_ref() == b.as_ref());
        if into_itself {
            return Err(TreeError::InvalidOperation(format!(
                "cannot move {} into itself",
                display_path(from)
            )));
        }
        let source_parent = self
            .find_category(from_parent)
            .ok_or_else(|| category_not_found(from_parent))?;
        if !matches!(source_parent.get(name), Some(Entry::Category(_))) {
            return Err(category_not_found(from));
        }
        let destination = self
            .find_category(to_parent)
            .ok_or_else(|| category_not_found(to_parent))?;
        if same_path(from_parent, to_parent) {
            return Ok(());
        }
        if destination.contains_key(name) {
            return Err(TreeError::DuplicateKey {
                key: name.to_string(),
            });
        }

        let moved = self
            .find_category_mut(from_parent)
            .and_then(|parent| parent.entries.shift_remove(name));
        if let (Some(moved), Some(destination)) = (moved, self.find_category_mut(to_parent)) {
            destination.entries.insert(name.to_string(), moved);
        }
        Ok(())
    }

    /// Insert or overwrite a tag without validation. Keeps the position of an
    /// existing entry with the same name.
    pub(crate) fn set_tag(&mut self, name: &str, value: &str) {
        self.entries
            .insert(name.to_string(), Entry::Tag(value.to_string()));
    }

    /// Insert or overwrite a subcategory without validation.
    pub(crate) fn set_category(&mut self, name: &str, category: Category) {
        self.entries
            .insert(name.to_string(), Entry::Category(category));
    }

    // ---------------------------------------------------------------------
    // Maintenance
    // ---------------------------------------------------------------------

    /// Remove `PLACEHOLDER_KEY` leaves at every level.
    pub fn strip_placeholders(&mut self) {
        self.entries.shift_remove(PLACEHOLDER_KEY);
        for entry in self.entries.values_mut() {
            if let Entry::Category(child) = entry {
                child.strip_placeholders();
            }
        }
    }

    /// Remove subcategories left empty, bottom-up.
    pub fn prune_empty(&mut self) {
        for entry in self.entries.values_mut() {
            if let Entry::Category(child) = entry {
                child.prune_empty();
            }
        }
        self.entries
            .retain(|_, entry| !matches!(entry, Entry::Category(child) if child.is_empty()));
    }

    /// Remove every leaf carrying `value`. Returns how many were removed.
    pub fn remove_value(&mut self, value: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !matches!(entry, Entry::Tag(v) if v == value));
        let mut removed = before - self.entries.len();
        for entry in self.entries.values_mut() {
            if let Entry::Category(child) = entry {
                removed += child.remove_value(value);
            }
        }
        removed
    }
}
