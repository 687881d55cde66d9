//! # Last-Value Cache
//!
//! One slot per topic, overwritten on every publish. The subscription
//! gateway reads it to answer "what was the last value for this topic"
//! when a client subscribes after the fact.
//!
//! The cache is an explicit object with an injectable lifecycle: the server
//! constructs one at startup and hands it to the router and the gateway,
//! and tests construct their own isolated instances. An external
//! housekeeping job may call [`LastValueCache::clear`] or
//! [`LastValueCache::expire_written_before`] on a schedule; the cache never
//! expires anything on its own.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// A cached payload together with the moment it was written.
#[derive(Debug, Clone)]
pub struct LastValueEntry {
    /// The opaque serialized payload, exactly as published.
    pub payload: String,
    /// When this slot was last overwritten.
    pub written_at: DateTime<Utc>,
}

/// Per-topic single-slot store of the most recently published payload.
///
/// Put and get are per-topic atomic: a `put` is visible to every subsequent
/// `get`, and concurrent writers to different topics do not interfere. There
/// is at most one entry per topic at any time; absence means no message has
/// been observed for that topic yet.
pub struct LastValueCache {
    entries: Mutex<HashMap<String, LastValueEntry>>,
}

impl LastValueCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Overwrites the slot for `topic` with `payload`, stamping it now.
    pub fn put(&self, topic: &str, payload: &str) {
        let mut entries = self.entries.lock().expect("LastValueCache lock poisoned");
        entries.insert(
            topic.to_string(),
            LastValueEntry {
                payload: payload.to_string(),
                written_at: Utc::now(),
            },
        );
    }

    /// Returns the current entry for `topic`, if any message has been seen.
    pub fn get(&self, topic: &str) -> Option<LastValueEntry> {
        let entries = self.entries.lock().expect("LastValueCache lock poisoned");
        entries.get(topic).cloned()
    }

    /// Drops every entry. Invoked by the scheduled housekeeping job.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().expect("LastValueCache lock poisoned");
        let dropped = entries.len();
        entries.clear();
        log::info!("Cleared last-value cache ({} entries dropped)", dropped);
    }

    /// Drops every entry written at or before `cutoff`.
    ///
    /// This is the collaborator-facing expiry operation: a housekeeping job
    /// that wants to age out yesterday's state without racing today's
    /// traffic passes the day boundary as the cutoff.
    pub fn expire_written_before(&self, cutoff: DateTime<Utc>) {
        let mut entries = self.entries.lock().expect("LastValueCache lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.written_at > cutoff);
        let dropped = before - entries.len();
        if dropped > 0 {
            log::info!("Expired {} last-value entries written before {}", dropped, cutoff);
        }
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().expect("LastValueCache lock poisoned");
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LastValueCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn put_overwrites_previous_value() {
        let cache = LastValueCache::new();
        cache.put("prices.spx", "4990.0");
        cache.put("prices.spx", "5000.1");
        let entry = cache.get("prices.spx").unwrap();
        assert_eq!(entry.payload, "5000.1");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_of_unseen_topic_is_absent() {
        let cache = LastValueCache::new();
        assert!(cache.get("trading.state").is_none());
    }

    #[test]
    fn topics_do_not_interfere() {
        let cache = LastValueCache::new();
        cache.put("prices.spx", "5000.1");
        cache.put("trading.state", "OPEN");
        assert_eq!(cache.get("prices.spx").unwrap().payload, "5000.1");
        assert_eq!(cache.get("trading.state").unwrap().payload, "OPEN");
    }

    #[test]
    fn clear_drops_everything() {
        let cache = LastValueCache::new();
        cache.put("prices.spx", "5000.1");
        cache.put("prices.condor", "{}");
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("prices.spx").is_none());
    }

    #[test]
    fn expire_only_drops_old_entries() {
        let cache = LastValueCache::new();
        cache.put("prices.spx", "5000.1");
        // Entries written after the cutoff survive.
        cache.expire_written_before(Utc::now() - Duration::seconds(60));
        assert_eq!(cache.len(), 1);
        // Entries written before the cutoff go.
        cache.expire_written_before(Utc::now() + Duration::seconds(60));
        assert!(cache.is_empty());
    }
}
