//! In-memory TTL cache keyed by `resource:param:...` strings.
//!
//! Entries are never evicted except by staleness on read and by prefix
//! invalidation after writes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Fresh value for `key` as seen at `now`.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(key)?;
        (now.saturating_duration_since(entry.stored_at) < self.ttl).then(|| entry.value.clone())
    }

    /// Value for `key` regardless of age.
    pub fn get_stale(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock().ok()?;
        entries.get(key).map(|e| e.value.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_at(key, value, Instant::now());
    }

    pub fn set_at(&self, key: impl Into<String>, value: V, now: Instant) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key.into(),
                Entry {
                    value,
                    stored_at: now,
                },
            );
        }
    }

    /// Drop every key starting with `prefix`; returns how many went.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!("Cache invalidated {removed} entries under '{prefix}'");
        }
        removed
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build a cache key: `key("groups", &["p1", "false"])` → `groups:p1:false`.
pub fn key(resource: &str, params: &[&str]) -> String {
    let mut k = resource.to_string();
    for p in params {
        k.push(':');
        k.push_str(p);
    }
    k
}

/// Prefix covering every key of `resource` scoped to `scope`.
pub fn prefix(resource: &str, scope: &str) -> String {
    format!("{resource}:{scope}:")
}

/// Key under `prefix(resource, scope)`; `variant` holds flags such as
/// `include_inactive` and may be empty.
pub fn scoped(resource: &str, scope: &str, variant: &str) -> String {
    format!("{}{variant}", prefix(resource, scope))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_then_stale() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let t0 = Instant::now();
        cache.set_at("sets:p1", vec![1, 2], t0);

        assert_eq!(cache.get_at("sets:p1", t0 + Duration::from_secs(59)), Some(vec![1, 2]));
        assert_eq!(cache.get_at("sets:p1", t0 + Duration::from_secs(60)), None);
        // Still reachable as a fallback.
        assert_eq!(cache.get_stale("sets:p1"), Some(vec![1, 2]));
    }

    #[test]
    fn test_missing_key() {
        let cache: TtlCache<u8> = TtlCache::new(Duration::from_secs(1));
        assert!(cache.get("nope").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_prefix_invalidation() {
        let cache = TtlCache::new(Duration::from_secs(300));
        cache.set(key("groups", &["p1", "true"]), 1);
        cache.set(key("groups", &["p1", "false"]), 2);
        cache.set(key("groups", &["p2", "false"]), 3);

        assert_eq!(cache.invalidate(&prefix("groups", "p1")), 2);
        assert!(cache.get("groups:p1:true").is_none());
        assert_eq!(cache.get("groups:p2:false"), Some(3));
    }

    #[test]
    fn test_prefix_does_not_match_longer_ids() {
        let cache = TtlCache::new(Duration::from_secs(300));
        cache.set(scoped("set_messages", "1", ""), 1);
        cache.set(scoped("set_messages", "12", ""), 2);
        cache.invalidate(&prefix("set_messages", "1"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("set_messages:12:"), Some(2));
    }

    #[test]
    fn test_key_format() {
        assert_eq!(key("conversations", &["p1"]), "conversations:p1");
        assert_eq!(key("sets", &[]), "sets");
        assert_eq!(scoped("groups", "p1", "false"), "groups:p1:false");
    }
}
