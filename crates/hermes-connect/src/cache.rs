//! Seen-event bookkeeping
//!
//! Delivery is at-least-once, so consumers that must not process a
//! redelivered event keep a per-topic ledger of the ids they have handled.
//! Entries are never expired implicitly; [`DedupCache::keep`] is the only
//! pruning mechanism and is driven by whoever holds the authoritative event
//! list.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::event::Event;

/// Per-topic, concurrency-safe set of seen event ids.
///
/// One reader/writer lock guards all state, so a polling task and a query
/// handler can share an instance without external synchronization.
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: RwLock<HashMap<String, Vec<String>>>,
}

impl DedupCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as seen for `topic`. Idempotent; a second add of the
    /// same id is a no-op.
    pub fn add(&self, topic: &str, id: &str) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        let ids = entries.entry(topic.to_string()).or_default();
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }

    /// Whether `id` has been recorded for `topic`.
    #[must_use]
    pub fn contains(&self, topic: &str, id: &str) -> bool {
        let Ok(entries) = self.entries.read() else {
            return false;
        };
        entries
            .get(topic)
            .map(|ids| ids.iter().any(|seen| seen == id))
            .unwrap_or(false)
    }

    /// Copy of the id list recorded for `topic`, in insertion order.
    #[must_use]
    pub fn get(&self, topic: &str) -> Vec<String> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        entries.get(topic).cloned().unwrap_or_default()
    }

    /// Number of ids recorded for `topic`.
    #[must_use]
    pub fn length(&self, topic: &str) -> usize {
        let Ok(entries) = self.entries.read() else {
            return 0;
        };
        entries.get(topic).map(Vec::len).unwrap_or(0)
    }

    /// Reconcile the ledger for `topic` against an authoritative event list.
    ///
    /// Keeps the intersection of the stored ids and the ids present in
    /// `events`; everything stored but absent from the authoritative set is
    /// dropped.
    pub fn keep(&self, topic: &str, events: &[Event]) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        if let Some(ids) = entries.get_mut(topic) {
            ids.retain(|seen| events.iter().any(|event| &event.id == seen));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_with_id(id: &str) -> Event {
        let mut event = Event::new("hermes.event.test.triggered", "src", json!({}));
        event.id = id.to_string();
        event
    }

    const TOPIC: &str = "hermes.event.test.triggered";

    #[test]
    fn test_add_is_idempotent() {
        let cache = DedupCache::new();
        cache.add(TOPIC, "a");
        cache.add(TOPIC, "a");
        assert_eq!(cache.length(TOPIC), 1);
    }

    #[test]
    fn test_contains() {
        let cache = DedupCache::new();
        cache.add(TOPIC, "a");
        assert!(cache.contains(TOPIC, "a"));
        assert!(!cache.contains(TOPIC, "b"));
        assert!(!cache.contains("other.topic", "a"));
    }

    #[test]
    fn test_get_returns_copy_in_insertion_order() {
        let cache = DedupCache::new();
        cache.add(TOPIC, "a");
        cache.add(TOPIC, "b");
        cache.add(TOPIC, "c");
        assert_eq!(cache.get(TOPIC), vec!["a", "b", "c"]);
        assert!(cache.get("unknown").is_empty());
    }

    #[test]
    fn test_keep_prunes_to_authoritative_set() {
        let cache = DedupCache::new();
        cache.add(TOPIC, "a");
        cache.add(TOPIC, "b");
        cache.add(TOPIC, "c");

        cache.keep(TOPIC, &[event_with_id("b")]);

        assert_eq!(cache.get(TOPIC), vec!["b"]);
    }

    #[test]
    fn test_keep_does_not_insert_unseen_ids() {
        let cache = DedupCache::new();
        cache.add(TOPIC, "a");

        cache.keep(TOPIC, &[event_with_id("a"), event_with_id("z")]);

        assert_eq!(cache.get(TOPIC), vec!["a"]);
    }

    #[test]
    fn test_keep_on_unknown_topic_is_noop() {
        let cache = DedupCache::new();
        cache.keep(TOPIC, &[event_with_id("a")]);
        assert_eq!(cache.length(TOPIC), 0);
    }

    #[test]
    fn test_topics_are_independent() {
        let cache = DedupCache::new();
        cache.add("topic.one", "a");
        cache.add("topic.two", "a");
        cache.keep("topic.one", &[]);
        assert_eq!(cache.length("topic.one"), 0);
        assert_eq!(cache.length("topic.two"), 1);
    }

    #[test]
    fn test_concurrent_adds() {
        use std::sync::Arc;

        let cache = Arc::new(DedupCache::new());
        let mut handles = Vec::new();
        for worker in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    cache.add(TOPIC, &format!("{worker}-{i}"));
                    cache.add(TOPIC, &format!("{worker}-{i}"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.length(TOPIC), 200);
    }
}
