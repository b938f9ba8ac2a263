//! TaxonomyStore: loaded category trees plus the favorites index, persisted
//! through a `TaxonomyStorage` after every change.
//!
//! Each taxonomy sits behind its own async mutex that stays locked across the
//! storage write, so two mutations of one taxonomy run one after the other and
//! a failed write is undone before anyone else sees the tree. Locks are always
//! taken taxonomy first, favorites second.

use crate::events::{EventBus, TagEvent, now_millis};
use crate::favorites::FavoritesIndex;
use crate::ids::TaxonomyId;
use crate::model::{Category, TagLocation, TagRef, TreeError, display_path, owned_path};
use crate::storage::{StorageError, TaxonomyStorage};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("Unknown taxonomy: {0}")]
    UnknownTaxonomy(TaxonomyId),

    #[error("Taxonomy already exists: {0}")]
    TaxonomyExists(TaxonomyId),

    #[error("Failed to persist {operation} (op {op_id}): {source}")]
    PersistFailure {
        op_id: Uuid,
        operation: String,
        source: StorageError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl TaxonomyError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(
            self,
            TaxonomyError::Tree(TreeError::DuplicateKey { .. }) | TaxonomyError::TaxonomyExists(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TaxonomyError::Tree(TreeError::NotFound { .. }) | TaxonomyError::UnknownTaxonomy(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TaxonomyError>;

/// A search match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub taxonomy: TaxonomyId,
    pub path: Vec<String>,
    pub name: String,
    pub value: String,
    pub favorited: bool,
}

type Handle = Arc<Mutex<Category>>;

pub struct TaxonomyStore<S> {
    storage: S,
    events: Arc<EventBus>,
    taxonomies: RwLock<HashMap<TaxonomyId, Handle>>,
    favorites: Mutex<Option<FavoritesIndex>>,
}

impl<S: TaxonomyStorage> TaxonomyStore<S> {
    pub fn new(storage: S, events: Arc<EventBus>) -> Self {
        Self {
            storage,
            events,
            taxonomies: RwLock::new(HashMap::new()),
            favorites: Mutex::new(None),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    // ---------------------------------------------------------------------
    // Taxonomies
    // ---------------------------------------------------------------------

    /// Persisted and loaded taxonomy ids, sorted.
    pub async fn list_taxonomies(&self) -> Result<Vec<TaxonomyId>> {
        let mut ids: BTreeSet<TaxonomyId> = self.storage.list_taxonomies().await?.into_iter().collect();
        ids.extend(self.loaded().keys().cloned());
        Ok(ids.into_iter().collect())
    }

    /// Create and persist an empty taxonomy.
    pub async fn create_taxonomy(&self, id: &TaxonomyId) -> Result<()> {
        if self.loaded().contains_key(id) {
            return Err(TaxonomyError::TaxonomyExists(id.clone()));
        }
        match self.storage.load_taxonomy(id).await {
            Ok(_) => return Err(TaxonomyError::TaxonomyExists(id.clone())),
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let op_id = Uuid::new_v4();
        let root = Category::new();
        if let Err(e) = self.storage.save_taxonomy(id, &root).await {
            return Err(self.persist_failed(op_id, Some(id), "createTaxonomy", e));
        }
        self.taxonomies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(root)));
        tracing::info!("Created taxonomy {} (op {})", id, op_id);
        self.changed(id, "(root)".to_string(), "createTaxonomy");
        Ok(())
    }

    /// A copy of the current tree.
    pub async fn snapshot(&self, id: &TaxonomyId) -> Result<Category> {
        let handle = self.handle(id).await?;
        let root = handle.lock().await;
        Ok(root.clone())
    }

    pub async fn walk_tags(&self, id: &TaxonomyId) -> Result<Vec<TagRef>> {
        let handle = self.handle(id).await?;
        let root = handle.lock().await;
        Ok(root.walk_tags())
    }

    pub async fn find_tag_owner(
        &self,
        id: &TaxonomyId,
        name: &str,
        value: &str,
    ) -> Result<Option<TagLocation>> {
        let handle = self.handle(id).await?;
        let root = handle.lock().await;
        Ok(root.find_tag_owner(name, value))
    }

    // ---------------------------------------------------------------------
    // Tree mutations
    // ---------------------------------------------------------------------

    pub async fn add_category<P: AsRef<str> + Sync>(
        &self,
        id: &TaxonomyId,
        parent: &[P],
        name: &str,
    ) -> Result<()> {
        let parent = owned_path(parent);
        let name = name.to_string();
        self.mutate(id, "addCategory", display_path(&parent), move |root| {
            parent_of(root, &parent)?.insert_category(&name)
        })
        .await
    }

    pub async fn add_tag<P: AsRef<str> + Sync>(
        &self,
        id: &TaxonomyId,
        path: &[P],
        name: &str,
        value: &str,
    ) -> Result<()> {
        let path = owned_path(path);
        let (name, value) = (name.to_string(), value.to_string());
        self.mutate(id, "addTag", display_path(&path), move |root| {
            parent_of(root, &path)?.insert_tag(&name, &value)
        })
        .await
    }

    /// Rename the category at `path` (which names the category itself).
    pub async fn rename_category<P: AsRef<str> + Sync>(
        &self,
        id: &TaxonomyId,
        path: &[P],
        new_name: &str,
    ) -> Result<()> {
        let path = owned_path(path);
        let Some((old_name, parent)) = path.split_last() else {
            return Err(TreeError::InvalidOperation("the root category cannot be renamed".to_string()).into());
        };
        let (old_name, parent) = (old_name.clone(), parent.to_vec());
        let new_name = new_name.to_string();
        let follow_name = new_name.clone();
        let follow_path = path.clone();
        self.mutate_following(
            id,
            "renameCategory",
            display_path(&path),
            move |root| parent_of(root, &parent)?.rename_category(&old_name, &new_name),
            move |favorites, id| favorites.follow_rename_category(id, &follow_path, &follow_name),
        )
        .await
    }

    pub async fn rename_tag<P: AsRef<str> + Sync>(
        &self,
        id: &TaxonomyId,
        path: &[P],
        name: &str,
        value: &str,
        new_name: &str,
    ) -> Result<()> {
        let path = owned_path(path);
        let (name, value, new_name) = (name.to_string(), value.to_string(), new_name.to_string());
        let label = display_path(&path);
        let tree_path = path.clone();
        let (tree_name, tree_value, tree_new_name) = (name.clone(), value.clone(), new_name.clone());
        self.mutate_following(
            id,
            "renameTag",
            label,
            move |root| parent_of(root, &tree_path)?.rename_tag(&tree_name, &tree_value, &tree_new_name),
            move |favorites, id| favorites.follow_rename_tag(id, &path, &name, &value, &new_name),
        )
        .await
    }

    /// Change a tag's label and payload in place.
    pub async fn update_tag<P: AsRef<str> + Sync>(
        &self,
        id: &TaxonomyId,
        path: &[P],
        name: &str,
        value: &str,
        new_name: &str,
        new_value: &str,
    ) -> Result<()> {
        let path = owned_path(path);
        let tag = [name, value, new_name, new_value].map(str::to_string);
        let follow = tag.clone();
        let tree_path = path.clone();
        self.mutate_following(
            id,
            "updateTag",
            display_path(&path),
            move |root| {
                let [name, value, new_name, new_value] = &tag;
                parent_of(root, &tree_path)?.update_tag(name, value, new_name, new_value)
            },
            move |favorites, id| {
                let [name, value, new_name, new_value] = &follow;
                favorites.follow_update_tag(id, &path, name, value, new_name, new_value)
            },
        )
        .await
    }

    /// Delete the category at `path` and everything below it.
    pub async fn delete_category<P: AsRef<str> + Sync>(&self, id: &TaxonomyId, path: &[P]) -> Result<()> {
        let path = owned_path(path);
        let Some((name, parent)) = path.split_last() else {
            return Err(TreeError::InvalidOperation("the root category cannot be deleted".to_string()).into());
        };
        let (name, parent) = (name.clone(), parent.to_vec());
        let follow_path = path.clone();
        self.mutate_following(
            id,
            "deleteCategory",
            display_path(&path),
            move |root| parent_of(root, &parent)?.remove_category(&name).map(drop),
            move |favorites, id| favorites.follow_delete_category(id, &follow_path),
        )
        .await
    }

    pub async fn delete_tag<P: AsRef<str> + Sync>(
        &self,
        id: &TaxonomyId,
        path: &[P],
        name: &str,
        value: &str,
    ) -> Result<()> {
        let path = owned_path(path);
        let (name, value) = (name.to_string(), value.to_string());
        let tree_path = path.clone();
        let (tree_name, tree_value) = (name.clone(), value.clone());
        self.mutate_following(
            id,
            "deleteTag",
            display_path(&path),
            move |root| parent_of(root, &tree_path)?.remove_tag(&tree_name, &tree_value),
            move |favorites, id| favorites.follow_delete_tag(id, &path, &name, &value),
        )
        .await
    }

    /// Move a tag to another category, appended at the end. The value and
    /// any favorite of it come along.
    pub async fn move_tag<A: AsRef<str> + Sync, B: AsRef<str> + Sync>(
        &self,
        id: &TaxonomyId,
        from: &[A],
        to: &[B],
        name: &str,
        value: &str,
    ) -> Result<()> {
        let (from, to) = (owned_path(from), owned_path(to));
        let (name, value) = (name.to_string(), value.to_string());
        let label = format!("{} -> {}", display_path(&from), display_path(&to));
        let (tree_from, tree_to) = (from.clone(), to.clone());
        let (tree_name, tree_value) = (name.clone(), value.clone());
        self.mutate_following(
            id,
            "moveTag",
            label,
            move |root| root.move_tag(&tree_from, &tree_to, &tree_name, &tree_value),
            move |favorites, id| favorites.follow_move_tag(id, &from, &to, &name, &value),
        )
        .await
    }

    /// Move the category at `from` under `to_parent`, appended at the end.
    pub async fn move_category<A: AsRef<str> + Sync, B: AsRef<str> + Sync>(
        &self,
        id: &TaxonomyId,
        from: &[A],
        to_parent: &[B],
    ) -> Result<()> {
        let (from, to_parent) = (owned_path(from), owned_path(to_parent));
        let label = format!("{} -> {}", display_path(&from), display_path(&to_parent));
        let (tree_from, tree_to) = (from.clone(), to_parent.clone());
        self.mutate_following(
            id,
            "moveCategory",
            label,
            move |root| root.move_category(&tree_from, &tree_to),
            move |favorites, id| favorites.follow_move_category(id, &from, &to_parent),
        )
        .await
    }

    /// Reorder the entries of the category at `parent`.
    pub async fn reorder<P: AsRef<str> + Sync, K: AsRef<str> + Sync>(
        &self,
        id: &TaxonomyId,
        parent: &[P],
        order: &[K],
    ) -> Result<()> {
        let parent = owned_path(parent);
        let order: Vec<String> = order.iter().map(|key| key.as_ref().to_string()).collect();
        self.mutate(id, "reorder", display_path(&parent), move |root| {
            parent_of(root, &parent)?.reorder(&order);
            Ok(())
        })
        .await
    }

    // ---------------------------------------------------------------------
    // Favorites
    // ---------------------------------------------------------------------

    /// Star a tag. The favorite mirrors the tag's category path, or sits at
    /// the root when the tag is not in the tree.
    pub async fn add_favorite(&self, id: &TaxonomyId, name: &str, value: &str) -> Result<bool> {
        let handle = self.handle(id).await?;
        let root = handle.lock().await;
        let path = root
            .find_tag_owner(name, value)
            .map(|location| location.path)
            .unwrap_or_default();
        let changed = self
            .update_favorites(Some(id), "addFavorite", |favorites| {
                favorites.add(id, &path, name, value)
            })
            .await?;
        drop(root);
        Ok(changed)
    }

    /// Unstar every favorite of `id` carrying `value`.
    pub async fn remove_favorite(&self, id: &TaxonomyId, value: &str) -> Result<bool> {
        self.update_favorites(Some(id), "removeFavorite", |favorites| {
            favorites.remove_value(id, value)
        })
        .await
    }

    /// Check one taxonomy's favorites, or all of them.
    pub async fn is_favorited(&self, value: &str, id: Option<&TaxonomyId>) -> Result<bool> {
        let favorites = self.read_favorites().await?;
        Ok(favorites.is_favorited(value, id))
    }

    pub async fn favorites(&self) -> Result<FavoritesIndex> {
        self.read_favorites().await
    }

    // ---------------------------------------------------------------------
    // Search
    // ---------------------------------------------------------------------

    /// Case-insensitive substring match over tag names and values in every
    /// taxonomy.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        for id in self.list_taxonomies().await? {
            let handle = self.handle(&id).await?;
            let root = handle.lock().await;
            hits.extend(
                root.walk_tags()
                    .into_iter()
                    .filter(|tag| {
                        tag.name.to_lowercase().contains(&needle)
                            || tag.value.to_lowercase().contains(&needle)
                    })
                    .map(|tag| SearchHit {
                        taxonomy: id.clone(),
                        path: tag.path,
                        name: tag.name,
                        value: tag.value,
                        favorited: false,
                    }),
            );
        }

        let favorites = self.read_favorites().await?;
        for hit in &mut hits {
            hit.favorited = favorites.is_favorited(&hit.value, None);
        }
        Ok(hits)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn loaded(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TaxonomyId, Handle>> {
        self.taxonomies.read().unwrap_or_else(|e| e.into_inner())
    }

    /// The shared handle for `id`, loading it from storage on first use.
    async fn handle(&self, id: &TaxonomyId) -> Result<Handle> {
        if let Some(handle) = self.loaded().get(id) {
            return Ok(Arc::clone(handle));
        }

        let mut root = match self.storage.load_taxonomy(id).await {
            Ok(root) => root,
            Err(StorageError::NotFound(_)) => return Err(TaxonomyError::UnknownTaxonomy(id.clone())),
            Err(e) => return Err(e.into()),
        };
        root.strip_placeholders();
        tracing::debug!("Loaded taxonomy {} ({} top-level entries)", id, root.len());

        // A concurrent first load may have won; keep whichever got in first.
        let mut taxonomies = self.taxonomies.write().unwrap_or_else(|e| e.into_inner());
        let handle = taxonomies
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(root)));
        Ok(Arc::clone(handle))
    }

    async fn read_favorites(&self) -> Result<FavoritesIndex> {
        let mut guard = self.favorites.lock().await;
        if guard.is_none() {
            *guard = Some(self.storage.load_favorites().await?);
        }
        Ok(guard.clone().unwrap_or_default())
    }

    /// Apply `change` to the favorites index and persist it. A failed write
    /// restores the previous index.
    async fn update_favorites(
        &self,
        id: Option<&TaxonomyId>,
        operation: &str,
        change: impl FnOnce(&mut FavoritesIndex) -> bool + Send,
    ) -> Result<bool> {
        let mut guard = self.favorites.lock().await;
        if guard.is_none() {
            *guard = Some(self.storage.load_favorites().await?);
        }
        let favorites = guard.get_or_insert_with(FavoritesIndex::default);

        let snapshot = favorites.clone();
        if !change(favorites) {
            return Ok(false);
        }

        let op_id = Uuid::new_v4();
        if let Err(e) = self.storage.save_favorites(favorites).await {
            *favorites = snapshot;
            return Err(self.persist_failed(op_id, id, operation, e));
        }
        tracing::debug!("Saved favorites after {} (op {})", operation, op_id);
        Ok(true)
    }

    async fn mutate<R: Send>(
        &self,
        id: &TaxonomyId,
        operation: &'static str,
        path: String,
        change: impl FnOnce(&mut Category) -> crate::model::Result<R> + Send,
    ) -> Result<R> {
        self.mutate_following(id, operation, path, change, |_, _| false)
            .await
    }

    /// Snapshot, mutate, persist; roll back on a failed write. On success the
    /// favorites index follows the change through `follow`, still under the
    /// taxonomy lock.
    async fn mutate_following<R: Send>(
        &self,
        id: &TaxonomyId,
        operation: &'static str,
        path: String,
        change: impl FnOnce(&mut Category) -> crate::model::Result<R> + Send,
        follow: impl FnOnce(&mut FavoritesIndex, &TaxonomyId) -> bool + Send,
    ) -> Result<R> {
        let handle = self.handle(id).await?;
        let mut root = handle.lock().await;

        let snapshot = root.clone();
        let output = match change(&mut *root) {
            Ok(output) => output,
            Err(e) => {
                *root = snapshot;
                return Err(e.into());
            }
        };
        if *root == snapshot {
            tracing::debug!("{} on {} {} changed nothing", operation, id, path);
            return Ok(output);
        }

        let op_id = Uuid::new_v4();
        if let Err(e) = self.storage.save_taxonomy(id, &root).await {
            *root = snapshot;
            return Err(self.persist_failed(op_id, Some(id), operation, e));
        }

        // Favorites must never point at entries the tree no longer has, so a
        // failed favorites write takes the tree change back out as well.
        if let Err(e) = self
            .update_favorites(Some(id), operation, |favorites| follow(favorites, id))
            .await
        {
            let written = std::mem::replace(&mut *root, snapshot);
            match self.storage.save_taxonomy(id, &root).await {
                Ok(()) => {
                    tracing::warn!("Rolled back {} on {} (op {}): favorites write failed", operation, id, op_id);
                }
                Err(undo) => {
                    // Storage still holds the changed tree; keep memory in step with it.
                    tracing::error!("Could not roll back {} on {} (op {}): {}", operation, id, op_id, undo);
                    *root = written;
                    self.changed(id, path, operation);
                }
            }
            return Err(e);
        }

        tracing::info!("{} on {} {} (op {})", operation, id, path, op_id);
        self.changed(id, path, operation);
        drop(root);
        Ok(output)
    }

    fn changed(&self, id: &TaxonomyId, path: String, operation: &str) {
        self.events.emit(TagEvent::CategoryChanged {
            taxonomy: id.clone(),
            path,
            operation: operation.to_string(),
            timestamp: now_millis(),
        });
    }

    fn persist_failed(
        &self,
        op_id: Uuid,
        id: Option<&TaxonomyId>,
        operation: &str,
        source: StorageError,
    ) -> TaxonomyError {
        tracing::error!("Persist failed for {} (op {}), rolled back: {}", operation, op_id, source);
        self.events.emit(TagEvent::PersistFailed {
            op_id: op_id.to_string(),
            taxonomy: id.cloned(),
            operation: operation.to_string(),
            reason: source.to_string(),
            timestamp: now_millis(),
        });
        TaxonomyError::PersistFailure {
            op_id,
            operation: operation.to_string(),
            source,
        }
    }
}

fn parent_of<'a>(root: &'a mut Category, path: &[String]) -> crate::model::Result<&'a mut Category> {
    root.find_category_mut(path).ok_or_else(|| TreeError::NotFound {
        what: format!("category {}", display_path(path)),
    })
}
