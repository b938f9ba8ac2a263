//! Orchestrator: keeps displayed tags in step with the text fields they
//! insert into.
//!
//! A host registers the tags it shows per field and view with [`render`],
//! forwards clicks to [`toggle`] and external edits to [`buffer_edited`].
//! Structural edits (rename, move, update, delete) go through here as well so
//! displayed instances are marked busy while the store writes, and buffers
//! follow a tag whose value changed.
//!
//! [`render`]: Orchestrator::render
//! [`toggle`]: Orchestrator::toggle
//! [`buffer_edited`]: Orchestrator::buffer_edited

use crate::cache::ReconciliationCache;
use crate::events::{EventBus, TagEvent, now_millis};
use crate::field::{FieldError, TextFields, clamp_to_char_boundary};
use crate::ids::{FieldKey, TaxonomyId};
use crate::model::{Tag, TreeError, validate_value};
use crate::storage::TaxonomyStorage;
use crate::store::{TaxonomyError, TaxonomyStore};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;
use tag_format::{Variant, choose_variant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("Tag '{value}' is busy")]
    Busy { value: String },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UseState {
    Unused,
    Used,
}

/// One displayed tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagInstance {
    pub tag: Tag,
    /// Taxonomy the tag was shown from; `None` for ad-hoc tags.
    pub source: Option<TaxonomyId>,
    pub state: UseState,
    pub busy: bool,
}

impl TagInstance {
    fn is(&self, source: &TaxonomyId, tag: &Tag) -> bool {
        self.source.as_ref() == Some(source) && self.tag == *tag
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Inserted at `range` of the new buffer.
    Inserted { variant: Variant, range: Range<usize> },
    Removed,
    /// Nothing sat at a token boundary, so nothing was removed.
    NotPresent,
}

pub struct Orchestrator<T, S> {
    fields: T,
    store: Arc<TaxonomyStore<S>>,
    events: Arc<EventBus>,
    cache: ReconciliationCache,
    views: HashMap<FieldKey, IndexMap<String, Vec<TagInstance>>>,
    busy: HashSet<String>,
}

impl<T: TextFields, S: TaxonomyStorage> Orchestrator<T, S> {
    pub fn new(fields: T, store: Arc<TaxonomyStore<S>>) -> Self {
        let events = Arc::clone(store.events());
        Self {
            fields,
            store,
            events,
            cache: ReconciliationCache::new(),
            views: HashMap::new(),
            busy: HashSet::new(),
        }
    }

    pub fn fields(&self) -> &T {
        &self.fields
    }

    pub fn store(&self) -> &Arc<TaxonomyStore<S>> {
        &self.store
    }

    pub fn cache(&self) -> &ReconciliationCache {
        &self.cache
    }

    pub fn instances(&self, field: &FieldKey, view: &str) -> &[TagInstance] {
        self.views
            .get(field)
            .and_then(|views| views.get(view))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_busy(&self, value: &str) -> bool {
        self.busy.contains(value)
    }

    // ---------------------------------------------------------------------
    // Display
    // ---------------------------------------------------------------------

    /// Show `tags` in `view` for `field`, replacing what the view showed
    /// before, and compute their state against the buffer.
    pub fn render(
        &mut self,
        field: &FieldKey,
        view: &str,
        tags: impl IntoIterator<Item = (Tag, Option<TaxonomyId>)>,
    ) -> Result<&[TagInstance]> {
        let instances = tags
            .into_iter()
            .map(|(tag, source)| TagInstance {
                busy: self.busy.contains(&tag.value),
                tag,
                source,
                state: UseState::Unused,
            })
            .collect();
        self.views
            .entry(field.clone())
            .or_default()
            .insert(view.to_string(), instances);
        self.resync_all(field)?;
        Ok(self.instances(field, view))
    }

    /// Recompute every displayed instance of `field` against its buffer.
    pub fn resync_all(&mut self, field: &FieldKey) -> Result<()> {
        let buffer = self.fields.value(field)?;
        let Some(views) = self.views.get_mut(field) else {
            return Ok(());
        };
        for (view, instances) in views.iter_mut() {
            for instance in instances.iter_mut() {
                instance.state = if self.cache.is_present(field, &instance.tag.value, &buffer) {
                    UseState::Used
                } else {
                    UseState::Unused
                };
                instance.busy = self.busy.contains(&instance.tag.value);
                emit_rendered(&self.events, field, view, instance);
            }
        }
        Ok(())
    }

    /// The host saw the buffer change outside the engine (typing, paste).
    pub fn buffer_edited(&mut self, field: &FieldKey) -> Result<()> {
        self.resync_all(field)
    }

    /// Mark every displayed instance of `value` busy, or clear the mark.
    pub fn set_busy(&mut self, value: &str, busy: bool) {
        let changed = if busy {
            self.busy.insert(value.to_string())
        } else {
            self.busy.remove(value)
        };
        if !changed {
            return;
        }
        for (field, views) in self.views.iter_mut() {
            for (view, instances) in views.iter_mut() {
                for instance in instances.iter_mut().filter(|i| i.tag.value == value) {
                    instance.busy = busy;
                    emit_rendered(&self.events, field, view, instance);
                }
            }
        }
    }

    /// Drop everything known about `field`.
    pub fn close_field(&mut self, field: &FieldKey) {
        self.views.remove(field);
        self.cache.clear_field(field);
    }

    // ---------------------------------------------------------------------
    // Buffer edits
    // ---------------------------------------------------------------------

    /// Insert the tag if it is absent, remove it if present.
    pub fn toggle(&mut self, field: &FieldKey, tag: &Tag) -> Result<ToggleOutcome> {
        self.ensure_idle(&tag.value)?;
        validate_value(&tag.value)?;
        let buffer = self.fields.value(field)?;
        if self.cache.is_present(field, &tag.value, &buffer) {
            self.remove(field, tag)
        } else {
            self.insert(field, tag)
        }
    }

    /// Insert at the cursor in the encoding the surrounding text calls for,
    /// leaving the cursor after it.
    pub fn insert(&mut self, field: &FieldKey, tag: &Tag) -> Result<ToggleOutcome> {
        self.ensure_idle(&tag.value)?;
        validate_value(&tag.value)?;
        let mut buffer = self.fields.value(field)?;
        let cursor = clamp_to_char_boundary(&buffer, self.fields.cursor(field)?);

        let variant = choose_variant(&buffer[..cursor], &buffer[cursor..]);
        let text = variant.render(&tag.value);
        buffer.insert_str(cursor, &text);
        let range = cursor..cursor + text.len();

        self.fields.set_value(field, &buffer)?;
        self.fields.set_cursor(field, range.end)?;
        self.cache.record_insertion(field, &tag.value, variant);
        tracing::debug!("Inserted {:?} into {} as {:?}", tag.value, field, variant);

        self.buffer_changed(field)?;
        Ok(ToggleOutcome::Inserted { variant, range })
    }

    pub fn remove(&mut self, field: &FieldKey, tag: &Tag) -> Result<ToggleOutcome> {
        self.ensure_idle(&tag.value)?;
        let mut buffer = self.fields.value(field)?;
        let cursor = self.fields.cursor(field)?;
        let Some(found) = self.cache.locate(field, &tag.value, &buffer) else {
            tracing::debug!("{:?} not present in {}", tag.value, field);
            return Ok(ToggleOutcome::NotPresent);
        };

        let before = buffer.len();
        if !self.cache.remove_from_buffer(field, &tag.value, &mut buffer) {
            return Ok(ToggleOutcome::NotPresent);
        }
        // Text after the removed span shifts left; a cursor inside it lands
        // on the seam.
        let cursor = if cursor >= found.range.end {
            (cursor + buffer.len()).saturating_sub(before)
        } else {
            cursor.min(found.range.start)
        };

        self.fields.set_value(field, &buffer)?;
        self.fields.set_cursor(field, cursor)?;
        tracing::debug!("Removed {:?} from {}", tag.value, field);

        self.buffer_changed(field)?;
        Ok(ToggleOutcome::Removed)
    }

    // ---------------------------------------------------------------------
    // Structural edits
    // ---------------------------------------------------------------------

    pub async fn rename_tag<P: AsRef<str> + Sync>(
        &mut self,
        taxonomy: &TaxonomyId,
        path: &[P],
        tag: &Tag,
        new_name: &str,
    ) -> Result<()> {
        self.ensure_idle(&tag.value)?;
        self.set_busy(&tag.value, true);
        let result = self
            .store
            .rename_tag(taxonomy, path, &tag.name, &tag.value, new_name)
            .await;
        self.set_busy(&tag.value, false);
        result?;

        let renamed = Tag::new(new_name, tag.value.clone());
        self.replace_instances(taxonomy, tag, Some(&renamed));
        self.resync_everywhere();
        Ok(())
    }

    pub async fn move_tag<A: AsRef<str> + Sync, B: AsRef<str> + Sync>(
        &mut self,
        taxonomy: &TaxonomyId,
        from: &[A],
        to: &[B],
        tag: &Tag,
    ) -> Result<()> {
        self.ensure_idle(&tag.value)?;
        self.set_busy(&tag.value, true);
        let result = self
            .store
            .move_tag(taxonomy, from, to, &tag.name, &tag.value)
            .await;
        self.set_busy(&tag.value, false);
        result?;

        self.resync_everywhere();
        Ok(())
    }

    /// Change a tag's label and value. Buffers holding the old value get the
    /// new one in the same encoding.
    pub async fn update_tag<P: AsRef<str> + Sync>(
        &mut self,
        taxonomy: &TaxonomyId,
        path: &[P],
        tag: &Tag,
        new_name: &str,
        new_value: &str,
    ) -> Result<()> {
        self.ensure_idle(&tag.value)?;
        self.set_busy(&tag.value, true);
        let result = self
            .store
            .update_tag(taxonomy, path, &tag.name, &tag.value, new_name, new_value)
            .await;
        self.set_busy(&tag.value, false);
        result?;

        if tag.value != new_value {
            for field in self.known_fields() {
                if let Err(e) = self.rewrite_value(&field, &tag.value, new_value) {
                    tracing::warn!("Could not rewrite {} after tag update: {}", field, e);
                }
            }
        }
        let updated = Tag::new(new_name, new_value);
        self.replace_instances(taxonomy, tag, Some(&updated));
        self.resync_everywhere();
        Ok(())
    }

    /// Delete a tag from its taxonomy. Buffers keep their text; the tag just
    /// stops being shown.
    pub async fn delete_tag<P: AsRef<str> + Sync>(
        &mut self,
        taxonomy: &TaxonomyId,
        path: &[P],
        tag: &Tag,
    ) -> Result<()> {
        self.ensure_idle(&tag.value)?;
        self.set_busy(&tag.value, true);
        let result = self
            .store
            .delete_tag(taxonomy, path, &tag.name, &tag.value)
            .await;
        self.set_busy(&tag.value, false);
        result?;

        self.replace_instances(taxonomy, tag, None);
        self.resync_everywhere();
        Ok(())
    }

    /// Rename a category. Tags under it stay busy until the store has
    /// written the change.
    pub async fn rename_category<P: AsRef<str> + Sync>(
        &mut self,
        taxonomy: &TaxonomyId,
        path: &[P],
        new_name: &str,
    ) -> Result<()> {
        let values = self.begin_subtree_edit(taxonomy, path).await?;
        let result = self.store.rename_category(taxonomy, path, new_name).await;
        self.end_subtree_edit(&values);
        result?;

        self.resync_everywhere();
        Ok(())
    }

    /// Move a category under `to_parent`. Tags under it stay busy until the
    /// store has written the change.
    pub async fn move_category<A: AsRef<str> + Sync, B: AsRef<str> + Sync>(
        &mut self,
        taxonomy: &TaxonomyId,
        from: &[A],
        to_parent: &[B],
    ) -> Result<()> {
        let values = self.begin_subtree_edit(taxonomy, from).await?;
        let result = self.store.move_category(taxonomy, from, to_parent).await;
        self.end_subtree_edit(&values);
        result?;

        self.resync_everywhere();
        Ok(())
    }

    /// Delete a category and everything under it. Its tags stop being shown;
    /// buffers keep their text.
    pub async fn delete_category<P: AsRef<str> + Sync>(
        &mut self,
        taxonomy: &TaxonomyId,
        path: &[P],
    ) -> Result<()> {
        let tags = self.subtree_tags(taxonomy, path).await?;
        let values = self.mark_busy(&tags)?;
        let result = self.store.delete_category(taxonomy, path).await;
        self.end_subtree_edit(&values);
        result?;

        for tag in &tags {
            self.replace_instances(taxonomy, tag, None);
        }
        self.resync_everywhere();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    /// Tags anywhere under the category at `path`; empty when it does not
    /// exist (the store reports that).
    async fn subtree_tags<P: AsRef<str> + Sync>(
        &self,
        taxonomy: &TaxonomyId,
        path: &[P],
    ) -> Result<Vec<Tag>> {
        let root = self.store.snapshot(taxonomy).await?;
        Ok(root
            .find_category(path)
            .map(|category| {
                category
                    .walk_tags()
                    .into_iter()
                    .map(|tag| Tag::new(tag.name, tag.value))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Mark the values of `tags` busy, or fail without marking any when one
    /// already is.
    fn mark_busy(&mut self, tags: &[Tag]) -> Result<Vec<String>> {
        let values: BTreeSet<&str> = tags.iter().map(|tag| tag.value.as_str()).collect();
        for value in &values {
            self.ensure_idle(value)?;
        }
        let values: Vec<String> = values.into_iter().map(str::to_string).collect();
        for value in &values {
            self.set_busy(value, true);
        }
        Ok(values)
    }

    async fn begin_subtree_edit<P: AsRef<str> + Sync>(
        &mut self,
        taxonomy: &TaxonomyId,
        path: &[P],
    ) -> Result<Vec<String>> {
        let tags = self.subtree_tags(taxonomy, path).await?;
        self.mark_busy(&tags)
    }

    fn end_subtree_edit(&mut self, values: &[String]) {
        for value in values {
            self.set_busy(value, false);
        }
    }

    fn ensure_idle(&self, value: &str) -> Result<()> {
        if self.busy.contains(value) {
            return Err(OrchestratorError::Busy {
                value: value.to_string(),
            });
        }
        Ok(())
    }

    fn buffer_changed(&mut self, field: &FieldKey) -> Result<()> {
        self.events.emit(TagEvent::BufferChanged {
            owner: field.owner.clone(),
            field: field.field.clone(),
            timestamp: now_millis(),
        });
        self.resync_all(field)
    }

    fn known_fields(&self) -> Vec<FieldKey> {
        let fields: BTreeSet<&FieldKey> = self.views.keys().chain(self.cache.fields()).collect();
        fields.into_iter().cloned().collect()
    }

    fn resync_everywhere(&mut self) {
        for field in self.views.keys().cloned().collect::<Vec<_>>() {
            if let Err(e) = self.resync_all(&field) {
                tracing::warn!("Resync of {} failed: {}", field, e);
            }
        }
    }

    /// Swap the first encoding of `old` in the buffer for the same encoding
    /// of `new`.
    fn rewrite_value(&mut self, field: &FieldKey, old: &str, new: &str) -> Result<()> {
        let mut buffer = self.fields.value(field)?;
        let Some(found) = self.cache.locate(field, old, &buffer) else {
            return Ok(());
        };
        let cursor = self.fields.cursor(field)?;
        let before = buffer.len();
        let end = found.range.end;
        buffer.replace_range(found.range, &found.variant.render(new));

        self.fields.set_value(field, &buffer)?;
        if cursor >= end {
            self.fields.set_cursor(field, (cursor + buffer.len()).saturating_sub(before))?;
        }
        self.cache.rename_value(field, old, new);
        self.events.emit(TagEvent::BufferChanged {
            owner: field.owner.clone(),
            field: field.field.clone(),
            timestamp: now_millis(),
        });
        Ok(())
    }

    /// Replace (or with `None`, drop) displayed instances of `tag` shown from
    /// `taxonomy`.
    fn replace_instances(&mut self, taxonomy: &TaxonomyId, tag: &Tag, with: Option<&Tag>) {
        for views in self.views.values_mut() {
            for instances in views.values_mut() {
                match with {
                    Some(replacement) => instances
                        .iter_mut()
                        .filter(|i| i.is(taxonomy, tag))
                        .for_each(|i| i.tag = replacement.clone()),
                    None => instances.retain(|i| !i.is(taxonomy, tag)),
                }
            }
        }
    }
}

fn emit_rendered(events: &EventBus, field: &FieldKey, view: &str, instance: &TagInstance) {
    events.emit(TagEvent::TagRendered {
        owner: field.owner.clone(),
        field: field.field.clone(),
        view: view.to_string(),
        name: instance.tag.name.clone(),
        value: instance.tag.value.clone(),
        used: instance.state == UseState::Used,
        busy: instance.busy,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::InMemoryFields;
    use crate::model::Category;
    use crate::storage::InMemoryStorage;
    use std::sync::Mutex;

    type TestOrchestrator = Orchestrator<Arc<InMemoryFields>, Arc<InMemoryStorage>>;

    fn zoo() -> TaxonomyId {
        TaxonomyId::new("zoo")
    }

    fn field() -> FieldKey {
        FieldKey::new("node-1", "positive")
    }

    fn cat() -> Tag {
        Tag::new("cat", "meow")
    }

    fn setup(text: &str) -> TestOrchestrator {
        let tree = Category::new()
            .with_category("Animals", Category::new().with_tag("cat", "meow").with_tag("dog", "woof"))
            .with_category("Plants", Category::new());
        let storage = Arc::new(InMemoryStorage::new().with_taxonomy("zoo", &tree));
        let store = Arc::new(TaxonomyStore::new(storage, Arc::new(EventBus::new())));
        let fields = Arc::new(InMemoryFields::new());
        fields.open(field(), text);
        Orchestrator::new(fields, store)
    }

    fn show_animals(orchestrator: &mut TestOrchestrator) {
        let tags = [cat(), Tag::new("dog", "woof")].map(|tag| (tag, Some(zoo())));
        orchestrator.render(&field(), "taxonomy", tags).unwrap();
    }

    fn states(orchestrator: &TestOrchestrator) -> Vec<UseState> {
        orchestrator
            .instances(&field(), "taxonomy")
            .iter()
            .map(|i| i.state)
            .collect()
    }

    #[test]
    fn test_render_computes_state() {
        let mut orchestrator = setup("woof, ");
        show_animals(&mut orchestrator);
        assert_eq!(states(&orchestrator), vec![UseState::Unused, UseState::Used]);
    }

    #[test]
    fn test_toggle_twice_restores_buffer() {
        for text in ["", "bird", "bird, ", "bird, ,fish", "(x)"] {
            let mut orchestrator = setup(text);
            let outcome = orchestrator.toggle(&field(), &cat()).unwrap();
            assert!(matches!(outcome, ToggleOutcome::Inserted { .. }));
            let inserted = orchestrator.fields().value(&field()).unwrap();
            assert_ne!(inserted, text);

            assert_eq!(orchestrator.toggle(&field(), &cat()).unwrap(), ToggleOutcome::Removed);
            assert_eq!(orchestrator.fields().value(&field()).unwrap(), text);
        }
    }

    #[test]
    fn test_insert_moves_cursor_past_insertion() {
        let mut orchestrator = setup("bird");
        orchestrator.fields().set_cursor(&field(), 0).unwrap();

        let outcome = orchestrator.toggle(&field(), &cat()).unwrap();
        assert_eq!(
            outcome,
            ToggleOutcome::Inserted {
                variant: Variant::Trailing,
                range: 0..6
            }
        );
        assert_eq!(orchestrator.fields().value(&field()).unwrap(), "meow, bird");
        assert_eq!(orchestrator.fields().cursor(&field()).unwrap(), 6);
    }

    #[test]
    fn test_toggle_updates_rendered_state_and_emits() {
        let mut orchestrator = setup("");
        show_animals(&mut orchestrator);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = orchestrator
            .store()
            .events()
            .subscribe(move |event| sink.lock().unwrap().push(event));

        orchestrator.toggle(&field(), &cat()).unwrap();
        assert_eq!(states(&orchestrator), vec![UseState::Used, UseState::Unused]);

        let events = seen.lock().unwrap();
        assert!(matches!(events.first(), Some(TagEvent::BufferChanged { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            TagEvent::TagRendered { value, used: true, .. } if value == "meow"
        )));
    }

    #[test]
    fn test_remove_of_absent_tag_is_not_present() {
        let mut orchestrator = setup("cardinal bird");
        let outcome = orchestrator.remove(&field(), &Tag::new("card", "card")).unwrap();
        assert_eq!(outcome, ToggleOutcome::NotPresent);
        assert_eq!(orchestrator.fields().value(&field()).unwrap(), "cardinal bird");
    }

    #[test]
    fn test_busy_tag_rejects_toggle() {
        let mut orchestrator = setup("");
        show_animals(&mut orchestrator);
        orchestrator.set_busy("meow", true);
        assert!(orchestrator.instances(&field(), "taxonomy")[0].busy);

        let err = orchestrator.toggle(&field(), &cat()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Busy { .. }));
        assert_eq!(orchestrator.fields().value(&field()).unwrap(), "");

        orchestrator.set_busy("meow", false);
        assert!(orchestrator.toggle(&field(), &cat()).is_ok());
    }

    #[test]
    fn test_external_edit_resyncs() {
        let mut orchestrator = setup("");
        show_animals(&mut orchestrator);
        orchestrator.fields().set_value(&field(), "meow, woof").unwrap();
        orchestrator.buffer_edited(&field()).unwrap();
        assert_eq!(states(&orchestrator), vec![UseState::Used, UseState::Used]);
    }

    #[tokio::test]
    async fn test_update_tag_rewrites_buffer() {
        let mut orchestrator = setup("bird");
        show_animals(&mut orchestrator);
        orchestrator.toggle(&field(), &cat()).unwrap();
        assert_eq!(orchestrator.fields().value(&field()).unwrap(), "bird, meow");

        orchestrator
            .update_tag(&zoo(), &["Animals"], &cat(), "kitten", "mew")
            .await
            .unwrap();
        assert_eq!(orchestrator.fields().value(&field()).unwrap(), "bird, mew");
        assert_eq!(
            orchestrator.instances(&field(), "taxonomy")[0].tag,
            Tag::new("kitten", "mew")
        );
        assert_eq!(states(&orchestrator)[0], UseState::Used);

        // The rewritten encoding is still the one removal goes for first.
        orchestrator.toggle(&field(), &Tag::new("kitten", "mew")).unwrap();
        assert_eq!(orchestrator.fields().value(&field()).unwrap(), "bird");
    }

    #[tokio::test]
    async fn test_failed_structural_edit_clears_busy() {
        let mut orchestrator = setup("");
        show_animals(&mut orchestrator);
        orchestrator.store().storage().set_fail_saves(true);

        let err = orchestrator
            .rename_tag(&zoo(), &["Animals"], &cat(), "kitty")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Taxonomy(TaxonomyError::PersistFailure { .. })));
        assert!(!orchestrator.is_busy("meow"));
        assert_eq!(orchestrator.instances(&field(), "taxonomy")[0].tag, cat());
    }

    #[tokio::test]
    async fn test_delete_tag_keeps_text_and_hides_instance() {
        let mut orchestrator = setup("meow, ");
        show_animals(&mut orchestrator);
        orchestrator.delete_tag(&zoo(), &["Animals"], &cat()).await.unwrap();

        assert_eq!(orchestrator.fields().value(&field()).unwrap(), "meow, ");
        let shown: Vec<_> = orchestrator
            .instances(&field(), "taxonomy")
            .iter()
            .map(|i| i.tag.name.as_str())
            .collect();
        assert_eq!(shown, vec!["dog"]);
    }

    #[tokio::test]
    async fn test_move_tag_not_found() {
        let mut orchestrator = setup("");
        let err = orchestrator
            .move_tag(&zoo(), &["Animals"], &["Nowhere"], &cat())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Taxonomy(e) if e.is_not_found()));
    }

    #[test]
    fn test_close_field_forgets_everything() {
        let mut orchestrator = setup("");
        show_animals(&mut orchestrator);
        orchestrator.toggle(&field(), &cat()).unwrap();
        orchestrator.close_field(&field());

        assert!(orchestrator.instances(&field(), "taxonomy").is_empty());
        assert!(orchestrator.cache().entry(&field(), "meow").is_none());
    }

    #[test]
    fn test_blank_tag_is_rejected_and_buffer_untouched() {
        let mut orchestrator = setup("cat, dog");
        let err = orchestrator.toggle(&field(), &Tag::new("blank", "")).unwrap_err();
        assert!(matches!(err, OrchestratorError::Tree(TreeError::InvalidValue { .. })));
        assert_eq!(orchestrator.fields().value(&field()).unwrap(), "cat, dog");
    }

    #[tokio::test]
    async fn test_blank_tag_cannot_be_added() {
        let orchestrator = setup("");
        let err = orchestrator
            .store()
            .add_tag(&zoo(), &["Animals"], "blank", "")
            .await
            .unwrap_err();
        assert!(matches!(err, TaxonomyError::Tree(TreeError::InvalidValue { .. })));
    }

    fn busy_marks(events: &[TagEvent], value: &str) -> Vec<bool> {
        events
            .iter()
            .filter_map(|event| match event {
                TagEvent::TagRendered { value: v, busy, .. } if v == value => Some(*busy),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_rename_category_marks_tags_busy_then_resyncs() {
        let mut orchestrator = setup("meow, ");
        show_animals(&mut orchestrator);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = orchestrator
            .store()
            .events()
            .subscribe(move |event| sink.lock().unwrap().push(event));

        orchestrator
            .rename_category(&zoo(), &["Animals"], "Fauna")
            .await
            .unwrap();

        let marks = busy_marks(&seen.lock().unwrap(), "meow");
        assert_eq!(marks.first(), Some(&true));
        assert_eq!(marks.last(), Some(&false));
        assert!(!orchestrator.is_busy("meow"));
        assert!(!orchestrator.is_busy("woof"));
        assert_eq!(states(&orchestrator), vec![UseState::Used, UseState::Unused]);

        let root = orchestrator.store().snapshot(&zoo()).await.unwrap();
        assert!(root.find_category(&["Fauna"]).is_some());
    }

    #[tokio::test]
    async fn test_move_category_clears_busy_on_failure() {
        let mut orchestrator = setup("");
        show_animals(&mut orchestrator);
        orchestrator.store().storage().set_fail_saves(true);

        let err = orchestrator
            .move_category(&zoo(), &["Animals"], &["Plants"])
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Taxonomy(TaxonomyError::PersistFailure { .. })));
        assert!(!orchestrator.is_busy("meow"));
        assert!(orchestrator.instances(&field(), "taxonomy").iter().all(|i| !i.busy));

        orchestrator.store().storage().set_fail_saves(false);
        orchestrator
            .move_category(&zoo(), &["Animals"], &["Plants"])
            .await
            .unwrap();
        let root = orchestrator.store().snapshot(&zoo()).await.unwrap();
        assert!(root.find_category(&["Plants", "Animals"]).is_some());
        assert_eq!(orchestrator.instances(&field(), "taxonomy").len(), 2);
    }

    #[tokio::test]
    async fn test_category_edit_rejected_while_a_tag_under_it_is_busy() {
        let mut orchestrator = setup("");
        show_animals(&mut orchestrator);
        orchestrator.set_busy("woof", true);

        let err = orchestrator
            .rename_category(&zoo(), &["Animals"], "Fauna")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Busy { value } if value == "woof"));
        assert!(!orchestrator.is_busy("meow"));
        let root = orchestrator.store().snapshot(&zoo()).await.unwrap();
        assert!(root.find_category(&["Animals"]).is_some());
    }

    #[tokio::test]
    async fn test_delete_category_hides_its_tags_and_keeps_text() {
        let mut orchestrator = setup("meow, woof");
        show_animals(&mut orchestrator);
        orchestrator
            .render(&field(), "search", [(Tag::new("bird", "tweet"), None)])
            .unwrap();

        orchestrator.delete_category(&zoo(), &["Animals"]).await.unwrap();

        assert!(orchestrator.instances(&field(), "taxonomy").is_empty());
        assert_eq!(orchestrator.instances(&field(), "search").len(), 1);
        assert_eq!(orchestrator.fields().value(&field()).unwrap(), "meow, woof");
        assert!(!orchestrator.is_busy("meow"));
    }
}
