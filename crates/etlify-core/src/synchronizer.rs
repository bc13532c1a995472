//! Synchronizer: the per-record, per-CRM execution pipeline (spec.md
//! §4.4) — guard, crm_dependencies, lock, sync_dependencies, digest,
//! adapter call, SyncState update, post-sync fan-out.
//!
//! The "exceptions as signaling" re-architecture note in spec.md §9 is
//! why this returns a tagged [`AttemptOutcome`] instead of raising:
//! `skipped`/`deferred`/`buffered`/`not_modified`/`synced` are all local,
//! non-fatal terminations, and even an adapter failure is captured as
//! `AttemptOutcome::Error` rather than propagated. Callers decide
//! whether that capture should also become a `Result::Err` — see
//! [`Synchronizer::attempt_inline`].

use rusqlite::Connection;

use crate::binding::{ModelBinding, Record};
use crate::context::EngineContext;
use crate::error::{EtlifyError, Result};
use crate::resolver::{DependencyResolver, MissingParent};
use crate::sync_state::SyncStateStore;

/// Terminal result of one sync attempt (spec.md §4.4, §7, §8).
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// `sync_if(record) == false`.
    Skipped,
    /// A `crm_dependencies` parent lacks a remote id; the whole attempt
    /// was deferred before any lock was taken.
    Deferred(Vec<MissingParent>),
    /// A `sync_dependencies` parent lacks a remote id (and the edge
    /// isn't cyclic); the attempt was buffered after the lock was
    /// acquired.
    Buffered(Vec<MissingParent>),
    /// Digest matched the stored one; nothing sent to the adapter.
    NotModified,
    /// Adapter upsert succeeded.
    Synced { crm_id: String },
    /// Adapter raised; persisted to SyncState but not propagated by
    /// [`Synchronizer::attempt`] itself.
    Error { message: String, error_count: u32 },
}

impl AttemptOutcome {
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, AttemptOutcome::NotModified | AttemptOutcome::Synced { .. })
    }
}

pub struct Synchronizer;

impl Synchronizer {
    /// Runs the full pipeline for `record` against `crm_name`. Never
    /// raises on adapter failure — see [`AttemptOutcome::Error`].
    /// `Result::Err` is reserved for misconfiguration (spec.md §7):
    /// unknown CRM/binding, or a SQL-layer failure.
    pub async fn attempt(
        ctx: &EngineContext,
        conn: &Connection,
        record: &dyn Record,
        crm_name: &str,
    ) -> Result<AttemptOutcome> {
        let resource_type = record.resource_type();
        let resource_id = record.resource_id();

        let binding = ctx.bindings.get(resource_type, crm_name).ok_or_else(|| {
            etlify_error_support::report_error!(
                "etlify-unknown-binding",
                "no model binding registered for ({resource_type}, {crm_name})"
            );
            EtlifyError::UnknownBinding(resource_type.to_string(), crm_name.to_string())
        })?;
        let crm_entry = ctx.crms.fetch(crm_name).ok_or_else(|| {
            etlify_error_support::report_error!(
                "etlify-unknown-crm",
                "no CRM registered under the name {crm_name:?}"
            );
            EtlifyError::UnknownCrm(crm_name.to_string())
        })?;

        if let Some(guard) = &binding.guard {
            if !guard(record) {
                SyncStateStore::mark_skipped(conn, resource_type, resource_id, crm_name)?;
                return Ok(AttemptOutcome::Skipped);
            }
        }

        let crm_dep_check =
            DependencyResolver::check(conn, record, crm_name, &binding.crm_dependencies)?;
        if !crm_dep_check.satisfied {
            DependencyResolver::register_pending(conn, record, crm_name, &crm_dep_check.missing)?;
            for parent in &crm_dep_check.missing {
                ctx.enqueuer
                    .enqueue(&parent.parent_type, parent.resource_id, crm_name);
            }
            return Ok(AttemptOutcome::Deferred(crm_dep_check.missing));
        }

        // Per-record lock (spec.md §4.4, §5): the store's equivalent of
        // `SELECT ... FOR UPDATE`. Held for the rest of this attempt so
        // no two attempts for the same (record, CRM) race past this
        // point concurrently.
        let _guard = ctx
            .locks
            .lock(resource_type, resource_id, crm_name)
            .await;

        let sync_dep_check =
            DependencyResolver::check(conn, record, crm_name, &binding.sync_dependencies)?;
        if !sync_dep_check.satisfied {
            let mut to_buffer = Vec::new();
            for parent in sync_dep_check.missing {
                let cyclic = DependencyResolver::is_cyclic(
                    conn,
                    resource_type,
                    resource_id,
                    &parent.parent_type,
                    parent.resource_id,
                    crm_name,
                )?;
                if !cyclic {
                    to_buffer.push(parent);
                }
            }
            if !to_buffer.is_empty() {
                DependencyResolver::register_pending(conn, record, crm_name, &to_buffer)?;
                for parent in &to_buffer {
                    ctx.enqueuer
                        .enqueue(&parent.parent_type, parent.resource_id, crm_name);
                }
                return Ok(AttemptOutcome::Buffered(to_buffer));
            }
            // Every missing parent is cyclic: proceed anyway.
        }

        let payload = binding.serializer.build_payload(record);
        let digest = ctx.digest_strategy.digest(&payload);

        let existing = SyncStateStore::find(conn, resource_type, resource_id, crm_name)?;
        let outcome = if existing
            .as_ref()
            .and_then(|row| row.last_digest.as_deref())
            == Some(digest.as_str())
        {
            SyncStateStore::mark_not_modified(conn, resource_type, resource_id, crm_name)?;
            AttemptOutcome::NotModified
        } else {
            match crm_entry
                .adapter
                .upsert(&payload, binding.id_property.as_deref(), &binding.crm_object_type)
                .await
            {
                Ok(crm_id) => {
                    let final_crm_id = SyncStateStore::mark_synced(
                        conn,
                        resource_type,
                        resource_id,
                        crm_name,
                        &crm_id,
                        &digest,
                    )?;
                    AttemptOutcome::Synced {
                        crm_id: final_crm_id,
                    }
                }
                Err(adapter_err) => {
                    let error_count = SyncStateStore::mark_error(
                        conn,
                        resource_type,
                        resource_id,
                        crm_name,
                        &adapter_err.to_string(),
                    )?;
                    AttemptOutcome::Error {
                        message: adapter_err.to_string(),
                        error_count,
                    }
                }
            }
        };

        if outcome.is_terminal_success() {
            Self::fire_post_hooks(ctx, conn, resource_type, resource_id, crm_name)?;
        }

        Ok(outcome)
    }

    /// Post-hooks on `synced`/`not_modified` (spec.md §4.4, and §9's
    /// open question: `not_modified` fires them too, to avoid orphaned
    /// pending rows):
    /// (a) delete this record's own PendingDependency rows,
    /// (b) wake any children waiting on this record as their parent.
    fn fire_post_hooks(
        ctx: &EngineContext,
        conn: &Connection,
        resource_type: &str,
        resource_id: i64,
        crm_name: &str,
    ) -> Result<()> {
        DependencyResolver::cleanup_for_child(conn, resource_type, resource_id, crm_name)?;
        DependencyResolver::resolve_dependents(ctx, conn, resource_type, resource_id, crm_name)?;
        Ok(())
    }

    /// Convenience for direct (non-job) callers: an adapter failure is
    /// surfaced as `Err` after being persisted, per spec.md §7 ("rethrown
    /// ONLY if the caller is the inline path").
    pub async fn attempt_inline(
        ctx: &EngineContext,
        conn: &Connection,
        record: &dyn Record,
        crm_name: &str,
    ) -> Result<AttemptOutcome> {
        match Self::attempt(ctx, conn, record, crm_name).await? {
            AttemptOutcome::Error { message, .. } => Err(EtlifyError::Adapter(
                crate::adapter::AdapterError::ApiError {
                    status: 0,
                    message,
                },
            )),
            other => Ok(other),
        }
    }

    /// Resolves the binding for `(record, crm_name)` without running the
    /// pipeline — used by hosts that need to inspect e.g.
    /// `max_sync_errors` before deciding whether to enqueue at all.
    pub fn binding_for(
        ctx: &EngineContext,
        record: &dyn Record,
        crm_name: &str,
    ) -> Option<std::sync::Arc<ModelBinding>> {
        ctx.bindings.get(record.resource_type(), crm_name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::adapter::{Adapter, AdapterError, AdapterResult, Payload};
    use crate::binding::{ModelBindingBuilder, StructuralSerializer};
    use crate::enqueue::NullEnqueuer;
    use crate::registry::CrmOptions;
    use crate::schema::EtlifyConnectionInitializer;
    use async_trait::async_trait;
    use etlify_sql_support::test_utils::open_memory_database;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingAdapter {
        calls: AtomicUsize,
        crm_id: String,
    }

    #[async_trait]
    impl Adapter for CountingAdapter {
        async fn upsert(&self, _payload: &Payload, _id_property: Option<&str>, _object_type: &str) -> AdapterResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.crm_id.clone())
        }
        async fn delete(&self, _crm_id: &str, _object_type: &str) -> AdapterResult<bool> {
            Ok(true)
        }
    }

    struct FailingAdapter;

    #[async_trait]
    impl Adapter for FailingAdapter {
        async fn upsert(&self, _payload: &Payload, _id_property: Option<&str>, _object_type: &str) -> AdapterResult<String> {
            Err(AdapterError::ApiError {
                status: 500,
                message: "boom".into(),
            })
        }
        async fn delete(&self, _crm_id: &str, _object_type: &str) -> AdapterResult<bool> {
            Ok(false)
        }
    }

    struct User {
        id: i64,
        email: String,
    }

    impl Record for User {
        fn resource_type(&self) -> &str {
            "User"
        }
        fn resource_id(&self) -> i64 {
            self.id
        }
        fn fields(&self) -> Payload {
            [("email".to_string(), serde_json::json!(self.email))]
                .into_iter()
                .collect()
        }
    }

    fn db() -> Connection {
        open_memory_database(&EtlifyConnectionInitializer).unwrap()
    }

    fn ctx_with(adapter: Arc<dyn Adapter>) -> EngineContext {
        let ctx = EngineContext::new(Arc::new(NullEnqueuer));
        ctx.crms.register("hubspot", adapter, CrmOptions::default());
        let mut bindings = crate::binding::BindingRegistry::new();
        bindings.insert(
            ModelBindingBuilder::new("User", "hubspot", "users")
                .crm_object_type("contact")
                .serializer(StructuralSerializer)
                .build(),
        );
        EngineContext {
            bindings,
            ..ctx
        }
    }

    #[tokio::test]
    async fn s1_digest_idempotence() {
        let conn = db();
        let ctx = ctx_with(Arc::new(CountingAdapter {
            calls: AtomicUsize::new(0),
            crm_id: "crm-1".to_string(),
        }));
        let user = User {
            id: 1,
            email: "a@b".to_string(),
        };

        let first = Synchronizer::attempt(&ctx, &conn, &user, "hubspot").await.unwrap();
        assert_eq!(first, AttemptOutcome::Synced { crm_id: "crm-1".to_string() });

        let second = Synchronizer::attempt(&ctx, &conn, &user, "hubspot").await.unwrap();
        assert_eq!(second, AttemptOutcome::NotModified);

        let row = SyncStateStore::find(&conn, "User", 1, "hubspot").unwrap().unwrap();
        assert_eq!(row.crm_id.as_deref(), Some("crm-1"));
        assert!(row.last_digest.is_some());
        assert_eq!(row.error_count, 0);
    }

    #[tokio::test]
    async fn guard_false_skips_and_resets_errors() {
        let conn = db();
        let ctx = EngineContext::new(Arc::new(NullEnqueuer));
        let adapter: Arc<dyn Adapter> = Arc::new(CountingAdapter {
            calls: AtomicUsize::new(0),
            crm_id: "x".to_string(),
        });
        ctx.crms.register("hubspot", adapter, CrmOptions::default());
        let mut bindings = crate::binding::BindingRegistry::new();
        bindings.insert(
            ModelBindingBuilder::new("User", "hubspot", "users")
                .crm_object_type("contact")
                .guard(|_r| false)
                .build(),
        );
        let ctx = EngineContext { bindings, ..ctx };
        let user = User { id: 1, email: "a@b".into() };
        SyncStateStore::mark_error(&conn, "User", 1, "hubspot", "prior failure").unwrap();

        let outcome = Synchronizer::attempt(&ctx, &conn, &user, "hubspot").await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Skipped);
        let row = SyncStateStore::find(&conn, "User", 1, "hubspot").unwrap().unwrap();
        assert_eq!(row.error_count, 0);
        assert_eq!(row.last_error, None);
    }

    #[tokio::test]
    async fn deferred_on_missing_crm_dependency_makes_zero_adapter_calls() {
        let conn = db();
        let calls = Arc::new(AtomicUsize::new(0));
        struct Counting(Arc<AtomicUsize>);
        #[async_trait]
        impl Adapter for Counting {
            async fn upsert(&self, _p: &Payload, _i: Option<&str>, _o: &str) -> AdapterResult<String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok("x".into())
            }
            async fn delete(&self, _c: &str, _o: &str) -> AdapterResult<bool> {
                Ok(true)
            }
        }
        let ctx = EngineContext::new(Arc::new(NullEnqueuer));
        ctx.crms.register("hubspot", Arc::new(Counting(calls.clone())), CrmOptions::default());
        let mut bindings = crate::binding::BindingRegistry::new();
        bindings.insert(
            ModelBindingBuilder::new("Order", "hubspot", "orders")
                .crm_object_type("deal")
                .crm_dependency(crate::binding::DependencyEdge::new(
                    "customer",
                    "Customer",
                    |_r| vec![crate::binding::ParentRef::new(7)],
                ))
                .build(),
        );
        let ctx = EngineContext { bindings, ..ctx };

        struct Order;
        impl Record for Order {
            fn resource_type(&self) -> &str { "Order" }
            fn resource_id(&self) -> i64 { 1 }
        }

        let outcome = Synchronizer::attempt(&ctx, &conn, &Order, "hubspot").await.unwrap();
        match outcome {
            AttemptOutcome::Deferred(missing) => assert_eq!(missing.len(), 1),
            other => panic!("expected Deferred, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            crate::pending::PendingStore::remaining_for_child(&conn, "Order", 1, "hubspot").unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn error_from_adapter_is_captured_not_raised() {
        let conn = db();
        let ctx = ctx_with(Arc::new(FailingAdapter));
        let user = User { id: 1, email: "a@b".into() };
        let outcome = Synchronizer::attempt(&ctx, &conn, &user, "hubspot").await.unwrap();
        match outcome {
            AttemptOutcome::Error { error_count, .. } => assert_eq!(error_count, 1),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn inline_attempt_raises_on_adapter_failure() {
        let conn = db();
        let ctx = ctx_with(Arc::new(FailingAdapter));
        let user = User { id: 1, email: "a@b".into() };
        let result = Synchronizer::attempt_inline(&ctx, &conn, &user, "hubspot").await;
        assert!(result.is_err());
        let row = SyncStateStore::find(&conn, "User", 1, "hubspot").unwrap().unwrap();
        assert_eq!(row.error_count, 1);
    }

    #[tokio::test]
    async fn s3_chain_resolves_in_order() {
        let conn = db();
        let ctx = ctx_with(Arc::new(CountingAdapter {
            calls: AtomicUsize::new(0),
            crm_id: "c".to_string(),
        }));
        // Reuse the `User`/"hubspot" binding to stand in for A/B/C by id.
        // A=1 depends on B=2, B=2 depends on C=3, C has no deps.
        let mut bindings = crate::binding::BindingRegistry::new();
        bindings.insert(
            ModelBindingBuilder::new("User", "hubspot", "users")
                .crm_object_type("contact")
                .serializer(StructuralSerializer)
                .crm_dependency(crate::binding::DependencyEdge::new("parent", "User", |r| {
                    let id = r.resource_id();
                    if id == 3 {
                        vec![]
                    } else {
                        vec![crate::binding::ParentRef::new(id + 1)]
                    }
                }))
                .build(),
        );
        let ctx = EngineContext { bindings, ..ctx };

        let a = User { id: 1, email: "a".into() };
        let b = User { id: 2, email: "b".into() };
        let c = User { id: 3, email: "c".into() };

        assert!(matches!(
            Synchronizer::attempt(&ctx, &conn, &a, "hubspot").await.unwrap(),
            AttemptOutcome::Deferred(_)
        ));
        assert!(matches!(
            Synchronizer::attempt(&ctx, &conn, &b, "hubspot").await.unwrap(),
            AttemptOutcome::Deferred(_)
        ));
        assert!(matches!(
            Synchronizer::attempt(&ctx, &conn, &c, "hubspot").await.unwrap(),
            AttemptOutcome::Synced { .. }
        ));
        // C synced: B is woken (zero remaining), but not yet synced itself.
        assert!(matches!(
            Synchronizer::attempt(&ctx, &conn, &b, "hubspot").await.unwrap(),
            AttemptOutcome::Synced { .. }
        ));
        assert!(matches!(
            Synchronizer::attempt(&ctx, &conn, &a, "hubspot").await.unwrap(),
            AttemptOutcome::Synced { .. }
        ));
        assert_eq!(
            crate::pending::PendingStore::remaining_for_child(&conn, "User", 1, "hubspot").unwrap(),
            0
        );
    }
}
