#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use sw_core::clock::Clock;

pub const DEFAULT_TTL_MS: i64 = 5 * 60 * 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub timestamp_ms: i64,
    pub ttl_ms: i64,
}

impl<T> CacheEntry<T> {
    fn expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.timestamp_ms) > self.ttl_ms
    }
}

/// A cache handle several engines can read and fill.
pub type SharedStatusCache<T> = Arc<Mutex<StatusCache<T>>>;

/// Remote-status cache with per-entry TTL. Expiry is checked on read; `sweep` drops the rest.
pub struct StatusCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
    clock: Arc<dyn Clock>,
    default_ttl_ms: i64,
}

impl<T: Clone> StatusCache<T> {
    pub fn new(clock: Arc<dyn Clock>, default_ttl_ms: i64) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
            default_ttl_ms,
        }
    }

    pub fn shared(self) -> SharedStatusCache<T> {
        Arc::new(Mutex::new(self))
    }

    pub fn get(&mut self, key: &str) -> Option<T> {
        let now = self.clock.now_ms();
        let entry = self.entries.get(key)?;
        if entry.expired(now) {
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&mut self, key: impl Into<String>, value: T) {
        let ttl = self.default_ttl_ms;
        self.set_with_ttl(key, value, ttl);
    }

    pub fn set_with_ttl(&mut self, key: impl Into<String>, value: T, ttl_ms: i64) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                timestamp_ms: self.clock.now_ms(),
                ttl_ms,
            },
        );
    }

    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops expired entries; returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expired(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_core::clock::ManualClock;

    fn cache(ttl_ms: i64) -> (Arc<ManualClock>, StatusCache<&'static str>) {
        let clock = Arc::new(ManualClock::new(0));
        (clock.clone(), StatusCache::new(clock, ttl_ms))
    }

    #[test]
    fn entries_expire_lazily() {
        let (clock, mut cache) = cache(100);
        cache.set("github:1", "active");
        clock.set(50);
        assert_eq!(cache.get("github:1"), Some("active"));
        clock.set(150);
        assert_eq!(cache.get("github:1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn per_entry_ttl_and_sweep() {
        let (clock, mut cache) = cache(1_000);
        cache.set_with_ttl("short", "a", 10);
        cache.set("long", "b");
        clock.advance(20);
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some("b"));
    }

    #[test]
    fn invalidate_removes_entry() {
        let (_clock, mut cache) = cache(1_000);
        cache.set("k", "v");
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
        assert_eq!(cache.get("k"), None);
    }
}
