//! A text file exposed as a single text field.
//!
//! The file is read once on open; edits stay in memory until `save`.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tag_core::field::{FieldError, Result, TextFields, clamp_to_char_boundary};
use tag_core::FieldKey;

#[derive(Debug)]
struct Buffer {
    text: String,
    cursor: usize,
}

#[derive(Debug)]
pub struct FileField {
    path: PathBuf,
    key: FieldKey,
    buffer: RwLock<Buffer>,
}

impl FileField {
    /// Open `path` as `key`, cursor at `cursor` or the end of the text. A
    /// missing file opens empty.
    pub async fn open(path: impl Into<PathBuf>, key: FieldKey, cursor: Option<usize>) -> Result<Self> {
        let path = path.into();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(FieldError::Io {
                    field: key,
                    reason: e.to_string(),
                });
            }
        };
        let cursor = clamp_to_char_boundary(&text, cursor.unwrap_or(text.len()));
        Ok(Self {
            path,
            key,
            buffer: RwLock::new(Buffer { text, cursor }),
        })
    }

    pub fn key(&self) -> &FieldKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current text back to the file.
    pub async fn save(&self) -> Result<()> {
        let text = self.value(&self.key)?;
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|e| FieldError::Io {
                field: self.key.clone(),
                reason: e.to_string(),
            })
    }

    fn check(&self, field: &FieldKey) -> Result<()> {
        if *field != self.key {
            return Err(FieldError::UnknownField(field.clone()));
        }
        Ok(())
    }
}

impl TextFields for FileField {
    fn value(&self, field: &FieldKey) -> Result<String> {
        self.check(field)?;
        let buffer = self.buffer.read().unwrap_or_else(|e| e.into_inner());
        Ok(buffer.text.clone())
    }

    fn set_value(&self, field: &FieldKey, text: &str) -> Result<()> {
        self.check(field)?;
        let mut buffer = self.buffer.write().unwrap_or_else(|e| e.into_inner());
        buffer.text = text.to_string();
        buffer.cursor = clamp_to_char_boundary(&buffer.text, buffer.cursor);
        Ok(())
    }

    fn cursor(&self, field: &FieldKey) -> Result<usize> {
        self.check(field)?;
        let buffer = self.buffer.read().unwrap_or_else(|e| e.into_inner());
        Ok(buffer.cursor)
    }

    fn set_cursor(&self, field: &FieldKey, offset: usize) -> Result<()> {
        self.check(field)?;
        let mut buffer = self.buffer.write().unwrap_or_else(|e| e.into_inner());
        buffer.cursor = clamp_to_char_boundary(&buffer.text, offset);
        Ok(())
    }
}
