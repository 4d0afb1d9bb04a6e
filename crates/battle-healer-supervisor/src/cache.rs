//! Process-wide timestamped key to payload store backing the stale-cache
//! degradation strategy.

use parking_lot::RwLock;
use std::collections::HashMap;

struct CacheEntry {
    data: serde_json::Value,
    cached_at_ms: i64,
}

/// Shared response cache. Eviction is lazy: stale entries are simply
/// skipped on read, not proactively swept.
#[derive(Default)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        ResponseCache { entries: RwLock::new(HashMap::new()) }
    }

    pub fn remember(&self, key: &str, data: serde_json::Value) {
        self.entries.write().insert(
            key.to_string(),
            CacheEntry { data, cached_at_ms: now_ms() },
        );
    }

    /// Returns the cached value iff present and within `ttl_ms` of being
    /// stored (`ttl_ms <= 0` disables the freshness check entirely).
    pub fn recall(&self, key: &str, ttl_ms: i64) -> Option<serde_json::Value> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if ttl_ms <= 0 || now_ms() - entry.cached_at_ms <= ttl_ms {
            Some(entry.data.clone())
        } else {
            None
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recall_returns_none_for_missing_key() {
        let cache = ResponseCache::new();
        assert!(cache.recall("missing", 1_000).is_none());
    }

    #[test]
    fn recall_returns_value_within_ttl() {
        let cache = ResponseCache::new();
        cache.remember("k", serde_json::json!({"amount": 5}));
        assert_eq!(cache.recall("k", 60_000), Some(serde_json::json!({"amount": 5})));
    }

    #[test]
    fn recall_ignores_ttl_when_non_positive() {
        let cache = ResponseCache::new();
        cache.remember("k", serde_json::json!(1));
        assert_eq!(cache.recall("k", 0), Some(serde_json::json!(1)));
        assert_eq!(cache.recall("k", -1), Some(serde_json::json!(1)));
    }

    #[test]
    fn recall_is_none_once_ttl_elapses() {
        let cache = ResponseCache::new();
        cache.remember("k", serde_json::json!(1));
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(cache.recall("k", 5).is_none());
    }
}
