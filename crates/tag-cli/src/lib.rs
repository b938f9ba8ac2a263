//! tag-cli library: the native pieces behind the `tagshelf` binary.
//!
//! Kept as a library so integration tests can drive them directly.

pub mod config;
pub mod file_field;
pub mod json_storage;

pub use config::{Config, ConfigError};
pub use file_field::FileField;
pub use json_storage::JsonDirStorage;
