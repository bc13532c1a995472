//! `cache_store` (spec.md §6): a with-TTL write-if-absent cache, the
//! substrate the EnqueueLock is built on. A production host swaps in its
//! own (Redis, memcached) by implementing [`CacheStore`]; this crate
//! ships an in-process `parking_lot`-guarded `HashMap` for tests and
//! single-process hosts, the same texture as `etlify-core::lock`'s
//! in-process lock table.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A TTL cache supporting write-if-absent. Implementations MUST make
/// `write_if_absent` atomic with respect to concurrent callers — it is
/// the EnqueueLock's only safety property (spec.md §3, §9: "the cache is
/// advisory; the Synchronizer's per-record lock is the true safety
/// net").
pub trait CacheStore: Send + Sync {
    /// Returns `true` if `key` was absent (or expired) and is now set
    /// with `ttl`; `false` if a live value was already present.
    fn write_if_absent(&self, key: &str, ttl: Duration) -> bool;

    /// Removes `key` unconditionally. A no-op if already absent or
    /// expired.
    fn clear(&self, key: &str);
}

#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for InMemoryCacheStore {
    fn write_if_absent(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if let Some(expires_at) = entries.get(key) {
            if *expires_at > now {
                return false;
            }
        }
        entries.insert(key.to_string(), now + ttl);
        true
    }

    fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}
