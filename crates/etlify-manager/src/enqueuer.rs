//! Wires the EnqueueLock gate (spec.md §4.7) into `etlify_core::Enqueuer`
//! so `EngineContext`'s own dependency-driven enqueues (Synchronizer,
//! DependencyResolver, BatchSync) go through the dedup path automatically
//! — callers never see the cache directly.

use std::sync::Arc;
use std::time::Duration;

use etlify_core::Enqueuer;

use crate::cache::CacheStore;
use crate::lock::{enqueue_lock_key, MIN_LOCK_TTL};
use crate::queue::{JobArgs, JobBackend};

/// `Enqueuer` implementation backing `EngineContext::enqueuer`. Enqueue
/// is gated by an atomic write-if-absent on the EnqueueLock key; if the
/// lock can't be acquired, the enqueue is silently dropped (spec.md
/// §4.7, §8 invariant 7).
pub struct JobEnqueuer {
    cache: Arc<dyn CacheStore>,
    backend: Arc<dyn JobBackend>,
    lock_ttl: Duration,
}

impl JobEnqueuer {
    pub fn new(cache: Arc<dyn CacheStore>, backend: Arc<dyn JobBackend>) -> Self {
        Self {
            cache,
            backend,
            lock_ttl: MIN_LOCK_TTL,
        }
    }

    /// `ttl` MUST be `>= MIN_LOCK_TTL` (spec.md §3); values below the
    /// floor are clamped up to it.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl.max(MIN_LOCK_TTL);
        self
    }

    /// The gated enqueue path retries use to re-arm the lock for their
    /// own attempt (spec.md §4.7: "each retry re-enters the enqueue
    /// path"). Returns `true` if the job was actually pushed.
    pub(crate) fn enqueue_gated(&self, job: JobArgs, delay: Option<Duration>) -> bool {
        let key = enqueue_lock_key(&job.model_name, job.resource_id, &job.crm_name);
        if !self.cache.write_if_absent(&key, self.lock_ttl) {
            return false;
        }
        self.backend.push(job, delay);
        true
    }
}

impl Enqueuer for JobEnqueuer {
    fn enqueue(&self, model_name: &str, resource_id: i64, crm_name: &str) {
        self.enqueue_gated(JobArgs::first_attempt(model_name, resource_id, crm_name), None);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use crate::queue::InMemoryJobBackend;

    #[tokio::test]
    async fn s7_duplicate_enqueue_within_ttl_is_deduped() {
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let (backend, mut rx) = InMemoryJobBackend::channel("etlify");
        let enqueuer = JobEnqueuer::new(cache, Arc::new(backend));

        enqueuer.enqueue("User", 1, "hubspot");
        enqueuer.enqueue("User", 1, "hubspot");

        let jobs = rx.recv_batch().await;
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn s8_enqueue_across_different_crms_is_distinct() {
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let (backend, mut rx) = InMemoryJobBackend::channel("etlify");
        let enqueuer = JobEnqueuer::new(cache, Arc::new(backend));

        enqueuer.enqueue("User", 1, "hubspot");
        enqueuer.enqueue("User", 1, "salesforce");

        let jobs = rx.recv_batch().await;
        let mut tuples: Vec<_> = jobs.iter().map(JobArgs::as_tuple).collect();
        tuples.sort();
        assert_eq!(
            tuples,
            vec![
                ("User".to_string(), "1".to_string(), "hubspot".to_string()),
                ("User".to_string(), "1".to_string(), "salesforce".to_string()),
            ]
        );
    }

    #[test]
    fn lock_ttl_is_clamped_to_the_floor() {
        let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let (backend, _rx) = InMemoryJobBackend::channel("etlify");
        let enqueuer = JobEnqueuer::new(cache, Arc::new(backend)).with_lock_ttl(Duration::from_secs(1));
        assert_eq!(enqueuer.lock_ttl, MIN_LOCK_TTL);
    }
}
