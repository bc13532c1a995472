//! Explicit "engine context" struct (spec.md §9's redesign note for the
//! source's `Etlify.config`/`Etlify::CRM.registry` globals). Passed by
//! reference into the Synchronizer, BatchSync and job handlers — nothing
//! in the hot path reaches for process-wide mutable state.

use std::sync::Arc;

use crate::binding::BindingRegistry;
use crate::digest::{DigestStrategy, Sha256CanonicalJson};
use crate::enqueue::Enqueuer;
use crate::lock::RecordLockTable;
use crate::registry::CrmRegistry;

/// Bundles everything a sync attempt needs: the CRM registry, the model
/// bindings, the digest strategy, the global error-count ceiling, the
/// per-record lock table, and a handle back into the Job Layer for
/// deferred/buffered wake-ups.
pub struct EngineContext {
    pub crms: CrmRegistry,
    pub bindings: BindingRegistry,
    pub digest_strategy: Arc<dyn DigestStrategy>,
    /// `max_sync_errors` (spec.md §6); per-CRM `options.max_sync_errors`
    /// overrides this when set (nil inherits, spec.md §9).
    pub max_sync_errors: u32,
    pub enqueuer: Arc<dyn Enqueuer>,
    pub locks: RecordLockTable,
}

impl EngineContext {
    pub fn new(enqueuer: Arc<dyn Enqueuer>) -> Self {
        Self {
            crms: CrmRegistry::new(),
            bindings: BindingRegistry::new(),
            digest_strategy: Arc::new(Sha256CanonicalJson),
            max_sync_errors: 3,
            enqueuer,
            locks: RecordLockTable::new(),
        }
    }

    pub fn with_digest_strategy(mut self, strategy: Arc<dyn DigestStrategy>) -> Self {
        self.digest_strategy = strategy;
        self
    }

    pub fn with_max_sync_errors(mut self, limit: u32) -> Self {
        self.max_sync_errors = limit;
        self
    }

    /// Resolves the effective error-count ceiling for `crm_name`: the
    /// CRM's own `max_sync_errors` option if set, else the global
    /// default (spec.md §9's open question: nil means inherit).
    pub fn max_sync_errors_for(&self, crm_name: &str) -> u32 {
        self.crms
            .fetch(crm_name)
            .and_then(|entry| entry.options.max_sync_errors)
            .unwrap_or(self.max_sync_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enqueue::NullEnqueuer;
    use crate::registry::CrmOptions;
    use std::sync::Arc as StdArc;

    struct NoopAdapter;
    #[async_trait::async_trait]
    impl crate::adapter::Adapter for NoopAdapter {
        async fn upsert(
            &self,
            _payload: &crate::adapter::Payload,
            _id_property: Option<&str>,
            _object_type: &str,
        ) -> crate::adapter::AdapterResult<String> {
            Ok("x".to_string())
        }
        async fn delete(&self, _crm_id: &str, _object_type: &str) -> crate::adapter::AdapterResult<bool> {
            Ok(true)
        }
    }

    #[test]
    fn defaults_are_three_errors_and_sha256_digest() {
        let ctx = EngineContext::new(StdArc::new(NullEnqueuer));
        assert_eq!(ctx.max_sync_errors, 3);
        assert_eq!(ctx.max_sync_errors_for("hubspot"), 3);
    }

    #[test]
    fn with_max_sync_errors_overrides_the_global_default() {
        let ctx = EngineContext::new(StdArc::new(NullEnqueuer)).with_max_sync_errors(10);
        assert_eq!(ctx.max_sync_errors_for("hubspot"), 10);
    }

    #[test]
    fn per_crm_option_overrides_global_when_set_else_inherits() {
        let ctx = EngineContext::new(StdArc::new(NullEnqueuer)).with_max_sync_errors(3);
        ctx.crms.register(
            "hubspot",
            StdArc::new(NoopAdapter),
            CrmOptions {
                max_sync_errors: Some(7),
                ..Default::default()
            },
        );
        ctx.crms.register("airtable", StdArc::new(NoopAdapter), CrmOptions::default());

        assert_eq!(ctx.max_sync_errors_for("hubspot"), 7);
        // No per-CRM override set: inherits the global default (spec.md §9).
        assert_eq!(ctx.max_sync_errors_for("airtable"), 3);
        // Unregistered CRM: also inherits the global default.
        assert_eq!(ctx.max_sync_errors_for("salesforce"), 3);
    }

    #[test]
    fn with_digest_strategy_replaces_the_default() {
        use crate::digest::DigestStrategy;
        struct ConstantDigest;
        impl DigestStrategy for ConstantDigest {
            fn digest(&self, _payload: &crate::adapter::Payload) -> String {
                "fixed".to_string()
            }
        }
        let ctx = EngineContext::new(StdArc::new(NullEnqueuer))
            .with_digest_strategy(StdArc::new(ConstantDigest));
        assert_eq!(ctx.digest_strategy.digest(&Default::default()), "fixed");
    }
}
