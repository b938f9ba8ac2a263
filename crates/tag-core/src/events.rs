//! Event infrastructure for the tag engine.
//!
//! `TagEvent` is what a display surface listens to: tag instances changing
//! state, taxonomies changing shape, persistence failures, and buffer writes.
//! `EventBus` fans events out to subscribers; wrap it in `Arc` to subscribe.

use crate::ids::{FieldId, OwnerId, TaxonomyId};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use web_time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, as carried by every event.
pub fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TagEvent {
    /// A displayed tag instance was (re)computed against its field's buffer.
    TagRendered {
        owner: OwnerId,
        field: FieldId,
        /// Which view shows the instance (taxonomy pane, search results, ...).
        view: String,
        name: String,
        value: String,
        used: bool,
        busy: bool,
    },
    /// A taxonomy tree was mutated and persisted.
    CategoryChanged {
        taxonomy: TaxonomyId,
        /// Category the operation applied to, `a/b/c` form.
        path: String,
        /// Operation name, e.g. "moveTag" or "reorder".
        operation: String,
        timestamp: f64,
    },
    /// A write to storage failed and the in-memory change was rolled back.
    PersistFailed {
        #[serde(rename = "opId")]
        op_id: String,
        /// `None` when the favorites index failed to persist.
        taxonomy: Option<TaxonomyId>,
        operation: String,
        reason: String,
        timestamp: f64,
    },
    /// A field's text was rewritten by the engine.
    BufferChanged {
        owner: OwnerId,
        field: FieldId,
        timestamp: f64,
    },
}

/// Handle that unsubscribes when dropped. Hold it to keep receiving events.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(TagEvent) + Send + Sync>;

/// Fans events out to subscribers. Listeners run outside the lock, so a
/// callback may subscribe, drop its own `Subscription` or emit again.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<BTreeMap<usize, Callback>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, BTreeMap<usize, Callback>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(TagEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners().insert(id, Arc::new(callback));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    // Blocks at most for an emit's snapshot; listeners run unlocked.
    fn unsubscribe(&self, id: usize) {
        self.listeners().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners().len()
    }

    /// Deliver `event` to every listener subscribed when the call starts, in
    /// subscription order.
    pub fn emit(&self, event: TagEvent) {
        let listeners: Vec<Callback> = self.listeners().values().cloned().collect();
        for listener in listeners {
            listener(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_changed() -> TagEvent {
        TagEvent::BufferChanged {
            owner: OwnerId::new("node-1"),
            field: FieldId::new("positive"),
            timestamp: 1000.0,
        }
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let _sub = bus.subscribe(move |event| {
            seen_clone.lock().unwrap().push(event);
        });
        bus.emit(buffer_changed());

        assert_eq!(seen.lock().unwrap().as_slice(), &[buffer_changed()]);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));

        {
            let count_clone = Arc::clone(&count);
            let _sub = bus.subscribe(move |_| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(buffer_changed());
            assert_eq!(bus.subscriber_count(), 1);
        }

        bus.emit(buffer_changed());
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::new(Mutex::new(Vec::new()));
        let bus_clone = Arc::clone(&bus);
        let inner_clone = Arc::clone(&inner);

        let _sub = bus.subscribe(move |_| {
            let sub = bus_clone.subscribe(|_| {});
            inner_clone.lock().unwrap().push(sub);
        });
        bus.emit(buffer_changed());

        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_subscription_dropped_inside_its_own_callback() {
        let bus = Arc::new(EventBus::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));

        let slot_clone = Arc::clone(&slot);
        let count_clone = Arc::clone(&count);
        let sub = bus.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::Relaxed);
            slot_clone.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        bus.emit(buffer_changed());
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(buffer_changed());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_drop_while_another_thread_emits_never_leaks() {
        let bus = Arc::new(EventBus::new());
        let _slow = bus.subscribe(|_| std::thread::sleep(std::time::Duration::from_millis(1)));

        let emitter = {
            let bus = Arc::clone(&bus);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    bus.emit(buffer_changed());
                }
            })
        };
        for _ in 0..50 {
            drop(bus.subscribe(|_| {}));
        }
        emitter.join().unwrap();

        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_event_serialization() {
        let event = TagEvent::PersistFailed {
            op_id: "abc".into(),
            taxonomy: Some(TaxonomyId::new("styles")),
            operation: "moveTag".into(),
            reason: "disk full".into(),
            timestamp: 1000.0,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "type": "persistFailed",
                "opId": "abc",
                "taxonomy": "styles",
                "operation": "moveTag",
                "reason": "disk full",
                "timestamp": 1000.0,
            })
        );

        let favorites_failed = TagEvent::PersistFailed {
            op_id: "def".into(),
            taxonomy: None,
            operation: "addFavorite".into(),
            reason: "disk full".into(),
            timestamp: 1000.0,
        };
        assert_eq!(serde_json::to_value(&favorites_failed).unwrap()["taxonomy"], serde_json::Value::Null);

        let rendered = TagEvent::TagRendered {
            owner: OwnerId::new("n"),
            field: FieldId::new("f"),
            view: "search".into(),
            name: "cat".into(),
            value: "meow".into(),
            used: true,
            busy: false,
        };
        assert_eq!(
            serde_json::to_value(&rendered).unwrap(),
            serde_json::json!({
                "type": "tagRendered",
                "owner": "n",
                "field": "f",
                "view": "search",
                "name": "cat",
                "value": "meow",
                "used": true,
                "busy": false,
            })
        );
    }
}
