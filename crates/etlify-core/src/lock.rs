//! Per-record async lock table backing the Synchronizer's "acquire
//! row-level lock on record" step (spec.md §4.4, §5, §8 invariant 2:
//! "no two adapter.upsert calls are in flight simultaneously" for the
//! same (record, CRM)).
//!
//! SQLite's own locking is coarser than a per-row `SELECT ... FOR UPDATE`,
//! so the per-record serialization point lives here instead: one
//! `tokio::sync::Mutex` per `(resource_type,
//! resource_id, crm_name)`, created lazily and kept for the life of the
//! process. The guard is held across the adapter call, which is why it
//! has to be an async mutex rather than `parking_lot`'s.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Key = (String, i64, String);

#[derive(Default)]
pub struct RecordLockTable {
    locks: SyncMutex<HashMap<Key, Arc<AsyncMutex<()>>>>,
}

impl RecordLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `(resource_type, resource_id, crm_name)`,
    /// suspending until any in-flight attempt for the same key releases
    /// it (spec.md §5: "lock acquisition may suspend").
    pub async fn lock(
        &self,
        resource_type: &str,
        resource_id: i64,
        crm_name: &str,
    ) -> OwnedMutexGuard<()> {
        let key = (resource_type.to_string(), resource_id, crm_name.to_string());
        let entry = self
            .locks
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        entry.lock_owned().await
    }
}
