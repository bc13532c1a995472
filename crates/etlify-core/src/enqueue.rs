//! The seam between `etlify-core` and the Job Layer (`etlify-manager`).
//! Core never depends on the manager crate — it only needs *something*
//! that can enqueue a `(model_name, resource_id, crm_name)` job, which
//! the manager supplies as a concrete [`Enqueuer`] wired into
//! [`crate::context::EngineContext`] at startup. This mirrors spec.md
//! §9's "no hidden process-wide state": the dependency goes one way.

/// Enqueues a sync job. Implementations MUST be dedup/TTL-lock gated
/// (spec.md §4.7) — the resolver and synchronizer call this freely and
/// rely on the Job Layer to silently drop a redundant enqueue.
pub trait Enqueuer: Send + Sync {
    fn enqueue(&self, model_name: &str, resource_id: i64, crm_name: &str);
}

/// Drops every enqueue. Useful for tests that only care about the
/// PendingDependency bookkeeping, not the resulting job.
pub struct NullEnqueuer;

impl Enqueuer for NullEnqueuer {
    fn enqueue(&self, _model_name: &str, _resource_id: i64, _crm_name: &str) {}
}
