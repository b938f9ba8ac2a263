//! Persistence seam for taxonomies and the favorites index.
//!
//! Implementations:
//! - `InMemoryStorage` - For testing, with failure injection
//! - `JsonDirStorage` (in tag-cli) - One JSON file per taxonomy on disk
//!
//! Implementations must keep category key order intact.

use crate::favorites::FavoritesIndex;
use crate::ids::TaxonomyId;
use crate::model::Category;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Taxonomy not found: {0}")]
    NotFound(TaxonomyId),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Write rejected: {0}")]
    Rejected(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait TaxonomyStorage: Send + Sync {
    /// Ids of every persisted taxonomy, sorted.
    async fn list_taxonomies(&self) -> Result<Vec<TaxonomyId>>;

    /// `StorageError::NotFound` if the taxonomy was never saved.
    async fn load_taxonomy(&self, id: &TaxonomyId) -> Result<Category>;

    async fn save_taxonomy(&self, id: &TaxonomyId, root: &Category) -> Result<()>;

    /// An empty index when nothing was saved yet.
    async fn load_favorites(&self) -> Result<FavoritesIndex>;

    async fn save_favorites(&self, favorites: &FavoritesIndex) -> Result<()>;
}

/// Storage kept in memory as JSON text, so every save goes through the same
/// serialization a file-backed store would.
#[derive(Default)]
pub struct InMemoryStorage {
    taxonomies: RwLock<BTreeMap<TaxonomyId, String>>,
    favorites: RwLock<Option<String>>,
    save_calls: AtomicUsize,
    fail_on_call: AtomicUsize,
    fail_from_call: AtomicUsize,
    fail_all: AtomicBool,
    yield_on_save: AtomicBool,
    saves_in_flight: AtomicUsize,
    max_saves_in_flight: AtomicUsize,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a taxonomy without counting it as a save.
    pub fn with_taxonomy(self, id: impl Into<TaxonomyId>, root: &Category) -> Self {
        let json = serde_json::to_string(root).unwrap_or_default();
        self.taxonomies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.into(), json);
        self
    }

    /// Make the `n`th save call (1-based, counted across taxonomies and
    /// favorites) fail. Zero disables it.
    pub fn fail_on_save_call(&self, n: usize) {
        self.fail_on_call.store(n, Ordering::SeqCst);
    }

    /// Make every save call from the `n`th (1-based) on fail. Zero disables it.
    pub fn fail_saves_from(&self, n: usize) {
        self.fail_from_call.store(n, Ordering::SeqCst);
    }

    /// Suspend inside every taxonomy save before writing, so other tasks run
    /// while the write is pending.
    pub fn set_yield_on_save(&self, yield_on_save: bool) {
        self.yield_on_save.store(yield_on_save, Ordering::SeqCst);
    }

    /// Most taxonomy saves ever pending at the same time.
    pub fn max_saves_in_flight(&self) -> usize {
        self.max_saves_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// What was last written for `id`, decoded.
    pub fn stored_taxonomy(&self, id: &TaxonomyId) -> Option<Category> {
        let taxonomies = self.taxonomies.read().unwrap_or_else(|e| e.into_inner());
        serde_json::from_str(taxonomies.get(id)?).ok()
    }

    pub fn stored_favorites(&self) -> Option<FavoritesIndex> {
        let favorites = self.favorites.read().unwrap_or_else(|e| e.into_inner());
        serde_json::from_str(favorites.as_deref()?).ok()
    }

    fn check_save(&self, what: &str) -> Result<()> {
        let call = self.save_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let from = self.fail_from_call.load(Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst)
            || self.fail_on_call.load(Ordering::SeqCst) == call
            || (from != 0 && call >= from)
        {
            return Err(StorageError::Rejected(format!("save #{} of {}", call, what)));
        }
        Ok(())
    }
}

#[async_trait]
impl TaxonomyStorage for InMemoryStorage {
    async fn list_taxonomies(&self) -> Result<Vec<TaxonomyId>> {
        let taxonomies = self.taxonomies.read().unwrap_or_else(|e| e.into_inner());
        Ok(taxonomies.keys().cloned().collect())
    }

    async fn load_taxonomy(&self, id: &TaxonomyId) -> Result<Category> {
        let taxonomies = self.taxonomies.read().unwrap_or_else(|e| e.into_inner());
        let json = taxonomies
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        Ok(serde_json::from_str(json)?)
    }

    async fn save_taxonomy(&self, id: &TaxonomyId, root: &Category) -> Result<()> {
        self.check_save(id.as_str())?;
        let json = serde_json::to_string(root)?;
        if self.yield_on_save.load(Ordering::SeqCst) {
            let pending = self.saves_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_saves_in_flight.fetch_max(pending, Ordering::SeqCst);
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            self.saves_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.taxonomies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), json);
        Ok(())
    }

    async fn load_favorites(&self) -> Result<FavoritesIndex> {
        let favorites = self.favorites.read().unwrap_or_else(|e| e.into_inner());
        match favorites.as_deref() {
            Some(json) => Ok(serde_json::from_str(json)?),
            None => Ok(FavoritesIndex::default()),
        }
    }

    async fn save_favorites(&self, favorites: &FavoritesIndex) -> Result<()> {
        self.check_save("favorites")?;
        let json = serde_json::to_string(favorites)?;
        *self.favorites.write().unwrap_or_else(|e| e.into_inner()) = Some(json);
        Ok(())
    }
}

// Lets several stores (or a store and a test) share one backend.
#[async_trait]
impl<T: TaxonomyStorage> TaxonomyStorage for std::sync::Arc<T> {
    async fn list_taxonomies(&self) -> Result<Vec<TaxonomyId>> {
        (**self).list_taxonomies().await
    }

    async fn load_taxonomy(&self, id: &TaxonomyId) -> Result<Category> {
        (**self).load_taxonomy(id).await
    }

    async fn save_taxonomy(&self, id: &TaxonomyId, root: &Category) -> Result<()> {
        (**self).save_taxonomy(id, root).await
    }

    async fn load_favorites(&self) -> Result<FavoritesIndex> {
        (**self).load_favorites().await
    }

    async fn save_favorites(&self, favorites: &FavoritesIndex) -> Result<()> {
        (**self).save_favorites(favorites).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn animals() -> Category {
        Category::new().with_category(
            "Animals",
            Category::new().with_tag("dog", "woof").with_tag("cat", "meow"),
        )
    }

    #[tokio::test]
    async fn test_save_and_load_preserves_order() {
        let storage = InMemoryStorage::new();
        let id = TaxonomyId::new("zoo");
        storage.save_taxonomy(&id, &animals()).await.unwrap();

        let loaded = storage.load_taxonomy(&id).await.unwrap();
        assert_eq!(loaded, animals());
        assert_eq!(storage.list_taxonomies().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_missing_taxonomy_is_not_found() {
        let storage = InMemoryStorage::new();
        let err = storage
            .load_taxonomy(&TaxonomyId::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_favorites_default_to_empty() {
        let storage = InMemoryStorage::new();
        assert!(storage.load_favorites().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_on_nth_save() {
        let storage = InMemoryStorage::new();
        let id = TaxonomyId::new("zoo");
        storage.fail_on_save_call(2);

        storage.save_taxonomy(&id, &Category::new()).await.unwrap();
        assert!(storage.save_taxonomy(&id, &animals()).await.is_err());
        storage.save_taxonomy(&id, &animals()).await.unwrap();
        assert_eq!(storage.save_calls(), 3);
        assert_eq!(storage.stored_taxonomy(&id), Some(animals()));
    }

    #[tokio::test]
    async fn test_fail_all_saves() {
        let storage = InMemoryStorage::new().with_taxonomy("zoo", &animals());
        storage.set_fail_saves(true);

        let id = TaxonomyId::new("zoo");
        assert!(storage.save_taxonomy(&id, &Category::new()).await.is_err());
        assert!(storage.save_favorites(&FavoritesIndex::new()).await.is_err());
        assert_eq!(storage.stored_taxonomy(&id), Some(animals()));
        assert_eq!(storage.stored_favorites(), None);
    }

    #[tokio::test]
    async fn test_fail_saves_from_nth_on() {
        let storage = InMemoryStorage::new();
        let id = TaxonomyId::new("zoo");
        storage.fail_saves_from(2);

        storage.save_taxonomy(&id, &animals()).await.unwrap();
        assert!(storage.save_taxonomy(&id, &Category::new()).await.is_err());
        assert!(storage.save_favorites(&FavoritesIndex::new()).await.is_err());
        assert_eq!(storage.stored_taxonomy(&id), Some(animals()));
    }

    #[tokio::test]
    async fn test_yielding_save_counts_pending_writes() {
        let storage = InMemoryStorage::new();
        storage.set_yield_on_save(true);
        let (a, b) = (TaxonomyId::new("a"), TaxonomyId::new("b"));

        let animals_a = animals();
        let animals_b = animals();
        let (first, second) = tokio::join!(
            storage.save_taxonomy(&a, &animals_a),
            storage.save_taxonomy(&b, &animals_b),
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(storage.max_saves_in_flight(), 2);
    }
}
