//! Tag taxonomies and the reconciliation of tags with free-form prompt text.
//!
//! - [`model`]: ordered category trees and their pure operations
//! - [`store`]: loaded taxonomies plus favorites, persisted after every change
//! - [`cache`]: how each tag was written into each text field
//! - [`orchestrator`]: keeps displayed tags and buffers in step

pub mod cache;
pub mod events;
pub mod favorites;
pub mod field;
pub mod ids;
pub mod model;
pub mod orchestrator;
pub mod storage;
pub mod store;

pub use cache::{CacheEntry, Located, ReconciliationCache};
pub use events::{EventBus, Subscription, TagEvent};
pub use favorites::FavoritesIndex;
pub use field::{FieldError, InMemoryFields, TextFields};
pub use ids::{FieldId, FieldKey, OwnerId, TaxonomyId};
pub use model::{Category, Entry, Tag, TagLocation, TagRef, TreeError};
pub use orchestrator::{Orchestrator, OrchestratorError, TagInstance, ToggleOutcome, UseState};
pub use storage::{InMemoryStorage, StorageError, TaxonomyStorage};
pub use store::{SearchHit, TaxonomyError, TaxonomyStore};
pub use tag_format::{Encoding, Variant};
