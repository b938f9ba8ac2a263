//! Text field access.
//!
//! The engine never owns prompt text: it reads and writes buffers and cursors
//! through `TextFields`, keyed by `FieldKey`. Cursor offsets are byte offsets
//! into the buffer and are clamped to a char boundary on every access.

use crate::ids::FieldKey;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("Unknown text field: {0}")]
    UnknownField(FieldKey),

    #[error("IO error on {field}: {reason}")]
    Io { field: FieldKey, reason: String },
}

pub type Result<T> = std::result::Result<T, FieldError>;

pub trait TextFields: Send + Sync {
    fn value(&self, field: &FieldKey) -> Result<String>;

    fn set_value(&self, field: &FieldKey, text: &str) -> Result<()>;

    /// Current cursor offset, already clamped into the buffer.
    fn cursor(&self, field: &FieldKey) -> Result<usize>;

    fn set_cursor(&self, field: &FieldKey, offset: usize) -> Result<()>;
}

/// Largest char boundary of `text` at or below `offset`.
pub fn clamp_to_char_boundary(text: &str, offset: usize) -> usize {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

#[derive(Debug, Clone, Default)]
struct FieldState {
    text: String,
    cursor: usize,
}

/// Fields held in memory. Unknown fields read as an error until opened.
#[derive(Debug, Default)]
pub struct InMemoryFields {
    fields: RwLock<HashMap<FieldKey, FieldState>>,
}

impl InMemoryFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) a field with `text`, cursor at the end.
    pub fn open(&self, field: FieldKey, text: &str) {
        let state = FieldState {
            text: text.to_string(),
            cursor: text.len(),
        };
        self.fields
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(field, state);
    }

    pub fn close(&self, field: &FieldKey) {
        self.fields
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(field);
    }
}

impl TextFields for InMemoryFields {
    fn value(&self, field: &FieldKey) -> Result<String> {
        let fields = self.fields.read().unwrap_or_else(|e| e.into_inner());
        fields
            .get(field)
            .map(|state| state.text.clone())
            .ok_or_else(|| FieldError::UnknownField(field.clone()))
    }

    fn set_value(&self, field: &FieldKey, text: &str) -> Result<()> {
        let mut fields = self.fields.write().unwrap_or_else(|e| e.into_inner());
        let state = fields
            .get_mut(field)
            .ok_or_else(|| FieldError::UnknownField(field.clone()))?;
        state.text = text.to_string();
        state.cursor = clamp_to_char_boundary(&state.text, state.cursor);
        Ok(())
    }

    fn cursor(&self, field: &FieldKey) -> Result<usize> {
        let fields = self.fields.read().unwrap_or_else(|e| e.into_inner());
        fields
            .get(field)
            .map(|state| clamp_to_char_boundary(&state.text, state.cursor))
            .ok_or_else(|| FieldError::UnknownField(field.clone()))
    }

    fn set_cursor(&self, field: &FieldKey, offset: usize) -> Result<()> {
        let mut fields = self.fields.write().unwrap_or_else(|e| e.into_inner());
        let state = fields
            .get_mut(field)
            .ok_or_else(|| FieldError::UnknownField(field.clone()))?;
        state.cursor = clamp_to_char_boundary(&state.text, offset);
        Ok(())
    }
}

impl<T: TextFields> TextFields for std::sync::Arc<T> {
    fn value(&self, field: &FieldKey) -> Result<String> {
        (**self).value(field)
    }

    fn set_value(&self, field: &FieldKey, text: &str) -> Result<()> {
        (**self).set_value(field, text)
    }

    fn cursor(&self, field: &FieldKey) -> Result<usize> {
        (**self).cursor(field)
    }

    fn set_cursor(&self, field: &FieldKey, offset: usize) -> Result<()> {
        (**self).set_cursor(field, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_to_char_boundary() {
        assert_eq!(clamp_to_char_boundary("abc", 10), 3);
        assert_eq!(clamp_to_char_boundary("abc", 1), 1);
        // 'ね' is three bytes.
        assert_eq!(clamp_to_char_boundary("ねこ", 4), 3);
        assert_eq!(clamp_to_char_boundary("", 2), 0);
    }

    #[test]
    fn test_open_places_cursor_at_end() {
        let fields = InMemoryFields::new();
        let key = FieldKey::new("node", "positive");
        fields.open(key.clone(), "cat, ");
        assert_eq!(fields.value(&key).unwrap(), "cat, ");
        assert_eq!(fields.cursor(&key).unwrap(), 5);
    }

    #[test]
    fn test_shrinking_text_clamps_cursor() {
        let fields = InMemoryFields::new();
        let key = FieldKey::new("node", "positive");
        fields.open(key.clone(), "a long prompt");
        fields.set_value(&key, "ab").unwrap();
        assert_eq!(fields.cursor(&key).unwrap(), 2);

        fields.set_cursor(&key, 1).unwrap();
        assert_eq!(fields.cursor(&key).unwrap(), 1);
    }

    #[test]
    fn test_unknown_field() {
        let fields = InMemoryFields::new();
        let key = FieldKey::new("node", "missing");
        assert_eq!(
            fields.value(&key).unwrap_err(),
            FieldError::UnknownField(key.clone())
        );
        fields.open(key.clone(), "");
        fields.close(&key);
        assert!(fields.set_cursor(&key, 0).is_err());
    }
}
