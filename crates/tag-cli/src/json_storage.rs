//! Taxonomy storage on the native filesystem using tokio::fs.
//!
//! Layout under the data directory:
//! - `taxonomies/<id>.json` - one pretty-printed category tree per taxonomy
//! - `favorites.json` - the favorites index
//!
//! Every write goes to a sibling temp file first and is renamed into place.

use async_trait::async_trait;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tag_core::storage::{Result, StorageError, TaxonomyStorage};
use tag_core::{Category, FavoritesIndex, TaxonomyId};
use tokio::fs;

const TAXONOMY_DIR: &str = "taxonomies";
const FAVORITES_FILE: &str = "favorites.json";

pub struct JsonDirStorage {
    base_path: PathBuf,
}

impl JsonDirStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn taxonomy_path(&self, id: &TaxonomyId) -> Result<PathBuf> {
        let name = id.as_str();
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(StorageError::Rejected(format!("invalid taxonomy id {:?}", name)));
        }
        Ok(self
            .base_path
            .join(TAXONOMY_DIR)
            .join(format!("{}.json", name)))
    }

    fn favorites_path(&self) -> PathBuf {
        self.base_path.join(FAVORITES_FILE)
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io(format!("{}: {}", path.display(), e))
}

async fn write_atomically<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json.as_bytes())
        .await
        .map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error(path, e))
}

#[async_trait]
impl TaxonomyStorage for JsonDirStorage {
    async fn list_taxonomies(&self) -> Result<Vec<TaxonomyId>> {
        let dir_path = self.base_path.join(TAXONOMY_DIR);
        let mut dir = match fs::read_dir(&dir_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir_path, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_error(&dir_path, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(TaxonomyId::new(stem));
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn load_taxonomy(&self, id: &TaxonomyId) -> Result<Category> {
        let path = self.taxonomy_path(id)?;
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(id.clone()));
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        Ok(serde_json::from_str(&json)?)
    }

    async fn save_taxonomy(&self, id: &TaxonomyId, root: &Category) -> Result<()> {
        let path = self.taxonomy_path(id)?;
        write_atomically(&path, root).await?;
        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }

    async fn load_favorites(&self) -> Result<FavoritesIndex> {
        let path = self.favorites_path();
        match fs::read_to_string(&path).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(FavoritesIndex::default()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn save_favorites(&self, favorites: &FavoritesIndex) -> Result<()> {
        let path = self.favorites_path();
        write_atomically(&path, favorites).await?;
        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }
}
