//! Per-field memory of how tags were written into a buffer.
//!
//! For every `(owner, field)` and raw tag value the cache keeps all four
//! encodings plus the one actually inserted. Removal tries the inserted
//! encoding first, so toggling a tag twice restores the buffer exactly; the
//! other encodings are the fallback for text that was typed or pasted.
//!
//! Entries are created on first insertion, reused across toggles and never
//! persisted.

use crate::ids::FieldKey;
use std::collections::HashMap;
use std::ops::Range;
use tag_format::{Encoding, Variant, find_bounded, format_variants, joins_words, SEPARATOR};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// All four encodings, in index order.
    pub variants: [Encoding; 4],
    /// Always one of `variants`.
    pub inserted: Encoding,
}

impl CacheEntry {
    fn new(value: &str, inserted: Variant) -> Self {
        let variants = format_variants(value);
        let inserted = variants[usize::from(inserted.index() - 1)].clone();
        Self { variants, inserted }
    }

    fn encoding(&self, variant: Variant) -> &Encoding {
        &self.variants[usize::from(variant.index() - 1)]
    }
}

/// A boundary-safe occurrence of a tag in a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub variant: Variant,
    pub range: Range<usize>,
}

#[derive(Debug, Default)]
pub struct ReconciliationCache {
    fields: HashMap<FieldKey, HashMap<String, CacheEntry>>,
}

impl ReconciliationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields that have at least one entry.
    pub fn fields(&self) -> impl Iterator<Item = &FieldKey> {
        self.fields.keys()
    }

    pub fn entry(&self, field: &FieldKey, raw: &str) -> Option<&CacheEntry> {
        self.fields.get(field)?.get(raw)
    }

    /// Find `raw` in `buffer`: the inserted encoding first, then the others
    /// from most to least specific. A blank value is never located.
    pub fn locate(&self, field: &FieldKey, raw: &str, buffer: &str) -> Option<Located> {
        if raw.trim().is_empty() {
            return None;
        }
        let fresh;
        let (variants, first) = match self.entry(field, raw) {
            Some(entry) => (&entry.variants, Some(entry.inserted.variant)),
            None => {
                fresh = format_variants(raw);
                (&fresh, None)
            }
        };

        let order = first
            .into_iter()
            .chain(Variant::removal_order().into_iter().filter(|v| Some(*v) != first));
        for variant in order {
            let encoding = &variants[usize::from(variant.index() - 1)];
            if let Some(range) = find_bounded(buffer, encoding.as_str()) {
                return Some(Located { variant, range });
            }
        }
        None
    }

    pub fn is_present(&self, field: &FieldKey, raw: &str, buffer: &str) -> bool {
        self.locate(field, raw, buffer).is_some()
    }

    /// Remember that `raw` went into `field` as `variant`.
    pub fn record_insertion(&mut self, field: &FieldKey, raw: &str, variant: Variant) -> &CacheEntry {
        let entries = self.fields.entry(field.clone()).or_default();
        let entry = entries
            .entry(raw.to_string())
            .or_insert_with(|| CacheEntry::new(raw, variant));
        entry.inserted = entry.encoding(variant).clone();
        entry
    }

    /// Remove `raw` from `buffer`. Returns false when no encoding sits at a
    /// token boundary, leaving the buffer untouched.
    pub fn remove_from_buffer(&self, field: &FieldKey, raw: &str, buffer: &mut String) -> bool {
        let Some(found) = self.locate(field, raw, buffer) else {
            return false;
        };
        let exact = self
            .entry(field, raw)
            .is_some_and(|entry| entry.inserted.variant == found.variant);

        let seam = found.range.start;
        buffer.replace_range(found.range, "");
        if !exact {
            tidy_seam(buffer, seam);
        }
        true
    }

    pub fn forget(&mut self, field: &FieldKey, raw: &str) {
        if let Some(entries) = self.fields.get_mut(field) {
            entries.remove(raw);
            if entries.is_empty() {
                self.fields.remove(field);
            }
        }
    }

    pub fn clear_field(&mut self, field: &FieldKey) {
        self.fields.remove(field);
    }

    /// Re-key an entry after the tag's value changed, keeping its variant.
    pub fn rename_value(&mut self, field: &FieldKey, old: &str, new: &str) {
        let Some(entries) = self.fields.get_mut(field) else {
            return;
        };
        if let Some(entry) = entries.remove(old) {
            entries.insert(new.to_string(), CacheEntry::new(new, entry.inserted.variant));
        }
    }
}

/// Repair the list where text was cut out at `at`: words that now touch get a
/// separator between them, and a doubled comma collapses to one.
fn tidy_seam(buffer: &mut String, at: usize) {
    let (left, right) = buffer.split_at(at);
    if joins_words(left, right) {
        buffer.insert_str(at, SEPARATOR);
        return;
    }

    let left_comma = left.trim_end().ends_with(',');
    let right_trimmed = right.trim_start_matches([' ', '\t']);
    if left_comma && right_trimmed.starts_with(',') {
        let comma = at + (right.len() - right_trimmed.len());
        // Drop the second comma along with the blanks that led up to it.
        buffer.replace_range(at..comma + 1, "");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> FieldKey {
        FieldKey::new("node-1", "positive")
    }

    #[test]
    fn test_record_insertion_keeps_all_variants() {
        let mut cache = ReconciliationCache::new();
        let entry = cache.record_insertion(&field(), "meow", Variant::Leading);
        assert_eq!(entry.inserted.as_str(), ", meow");
        assert!(entry.variants.contains(&entry.inserted));

        let entry = cache.record_insertion(&field(), "meow", Variant::Bare);
        assert_eq!(entry.inserted.as_str(), "meow");
    }

    #[test]
    fn test_is_present_without_entry_uses_fresh_encodings() {
        let cache = ReconciliationCache::new();
        assert!(cache.is_present(&field(), "meow", "cat, meow, dog"));
        assert!(!cache.is_present(&field(), "card", "cardinal bird"));
    }

    #[test]
    fn test_is_present_is_scoped_per_field() {
        let mut cache = ReconciliationCache::new();
        let other = FieldKey::new("node-1", "negative");
        cache.record_insertion(&field(), "meow", Variant::Trailing);
        assert!(cache.entry(&other, "meow").is_none());
        assert!(cache.is_present(&other, "meow", "meow, "));
    }

    #[test]
    fn test_fast_path_removes_exact_insertion() {
        let mut cache = ReconciliationCache::new();
        cache.record_insertion(&field(), "meow", Variant::Leading);

        let mut buffer = String::from("cat, meow");
        assert!(cache.remove_from_buffer(&field(), "meow", &mut buffer));
        assert_eq!(buffer, "cat");
    }

    #[test]
    fn test_slow_path_prefers_most_specific_variant_and_separates_words() {
        let cache = ReconciliationCache::new();
        let mut buffer = String::from("cat, meow, dog");
        assert!(cache.remove_from_buffer(&field(), "meow", &mut buffer));
        assert_eq!(buffer, "cat, dog");
    }

    #[test]
    fn test_fast_path_never_tidies() {
        let mut cache = ReconciliationCache::new();
        // Bare was picked between two separators; removing it must give the
        // separators back untouched.
        cache.record_insertion(&field(), "meow", Variant::Bare);
        let mut buffer = String::from("cat, meow, dog");
        assert!(cache.remove_from_buffer(&field(), "meow", &mut buffer));
        assert_eq!(buffer, "cat, , dog");
    }

    #[test]
    fn test_slow_path_leaves_other_punctuation_alone() {
        let cache = ReconciliationCache::new();
        let mut buffer = String::from("cat|meow|dog");
        assert!(cache.remove_from_buffer(&field(), "meow", &mut buffer));
        assert_eq!(buffer, "cat||dog");
    }

    #[test]
    fn test_slow_path_collapses_double_comma() {
        let cache = ReconciliationCache::new();
        let mut buffer = String::from("cat,meow,dog");
        // Only the bare form is bounded: ",meow," is not one of the encodings.
        assert!(cache.remove_from_buffer(&field(), "meow", &mut buffer));
        assert_eq!(buffer, "cat,dog");
    }

    #[test]
    fn test_mangled_encoding_is_not_present() {
        let cache = ReconciliationCache::new();
        let mut buffer = String::from("cat, meoww, dog");
        assert!(!cache.remove_from_buffer(&field(), "meow", &mut buffer));
        assert_eq!(buffer, "cat, meoww, dog");
    }

    #[test]
    fn test_rename_value_keeps_variant() {
        let mut cache = ReconciliationCache::new();
        cache.record_insertion(&field(), "meow", Variant::Padded);
        cache.rename_value(&field(), "meow", "purr");

        assert!(cache.entry(&field(), "meow").is_none());
        let entry = cache.entry(&field(), "purr").unwrap();
        assert_eq!(entry.inserted.as_str(), ", purr, ");
    }

    #[test]
    fn test_blank_value_is_never_present() {
        let mut cache = ReconciliationCache::new();
        assert!(!cache.is_present(&field(), "", "cat, dog"));
        assert!(!cache.is_present(&field(), " ", "cat, , dog"));

        cache.record_insertion(&field(), "", Variant::Padded);
        let mut buffer = String::from("cat, , dog");
        assert!(!cache.remove_from_buffer(&field(), "", &mut buffer));
        assert_eq!(buffer, "cat, , dog");
    }

    #[test]
    fn test_forget_and_clear() {
        let mut cache = ReconciliationCache::new();
        cache.record_insertion(&field(), "meow", Variant::Bare);
        cache.record_insertion(&field(), "woof", Variant::Bare);

        cache.forget(&field(), "meow");
        assert!(cache.entry(&field(), "meow").is_none());
        assert!(cache.entry(&field(), "woof").is_some());

        cache.clear_field(&field());
        assert!(cache.entry(&field(), "woof").is_none());
    }
}
