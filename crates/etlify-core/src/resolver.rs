//! Dependency Resolver: deferred/pending dependency graph with wake-up
//! on parent success (spec.md §4.5).

use rusqlite::Connection;

use crate::binding::{DependencyEdge, ParentRef, Record};
use crate::context::EngineContext;
use crate::error::Result;
use crate::pending::PendingStore;
use crate::sync_state::SyncStateStore;

/// One unsatisfied parent, identified by type + id (not a loaded
/// `Record` — the resolver never needs more than this to persist a
/// PendingDependency row or enqueue a sync).
#[derive(Debug, Clone, PartialEq)]
pub struct MissingParent {
    pub parent_type: String,
    pub resource_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DependencyCheck {
    pub satisfied: bool,
    pub missing: Vec<MissingParent>,
}

pub struct DependencyResolver;

impl DependencyResolver {
    /// Checks every edge in `edges` against the record's current parents.
    /// A parent is satisfied if (i) its SyncState row has a non-empty
    /// `crm_id`, or (ii) (legacy check, spec.md §4.4) the parent exposes
    /// a non-empty `<crm_name>_id` value via [`ParentRef::legacy_crm_id`].
    pub fn check(
        conn: &Connection,
        record: &dyn Record,
        crm_name: &str,
        edges: &[DependencyEdge],
    ) -> Result<DependencyCheck> {
        let mut missing = Vec::new();
        for edge in edges {
            for parent in (edge.resolve)(record) {
                if !Self::parent_satisfied(conn, &edge.parent_type, &parent, crm_name)? {
                    missing.push(MissingParent {
                        parent_type: edge.parent_type.clone(),
                        resource_id: parent.resource_id,
                    });
                }
            }
        }
        Ok(DependencyCheck {
            satisfied: missing.is_empty(),
            missing,
        })
    }

    fn parent_satisfied(
        conn: &Connection,
        parent_type: &str,
        parent: &ParentRef,
        crm_name: &str,
    ) -> Result<bool> {
        if SyncStateStore::has_remote_id(conn, parent_type, parent.resource_id, crm_name)? {
            return Ok(true);
        }
        Ok(match &parent.legacy_crm_id {
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(serde_json::Value::Null) | None => false,
            Some(_) => true,
        })
    }

    /// Idempotent insert of one PendingDependency row per missing
    /// parent (spec.md §4.5 `register_pending`).
    pub fn register_pending(
        conn: &Connection,
        record: &dyn Record,
        crm_name: &str,
        missing: &[MissingParent],
    ) -> Result<()> {
        for parent in missing {
            PendingStore::register(
                conn,
                record.resource_type(),
                record.resource_id(),
                &parent.parent_type,
                parent.resource_id,
                crm_name,
            )?;
        }
        Ok(())
    }

    /// `true` if `parent` is itself waiting on `child` for this CRM
    /// (spec.md §4.4's cycle detection: a parent already waiting on the
    /// child is NOT buffered a second time).
    pub fn is_cyclic(
        conn: &Connection,
        child_type: &str,
        child_id: i64,
        parent_type: &str,
        parent_id: i64,
        crm_name: &str,
    ) -> Result<bool> {
        PendingStore::reverse_edge_exists(conn, child_type, child_id, parent_type, parent_id, crm_name)
    }

    /// Parent synced successfully: delete the PendingDependency rows
    /// where it's the parent, and for every child left with zero
    /// remaining pending rows for this CRM, enqueue that child's sync
    /// (spec.md §4.5 `resolve_dependents`, §8 invariants 4-5).
    pub fn resolve_dependents(
        ctx: &EngineContext,
        conn: &Connection,
        parent_type: &str,
        parent_id: i64,
        crm_name: &str,
    ) -> Result<Vec<(String, i64)>> {
        let children = PendingStore::resolve_dependents(conn, parent_type, parent_id, crm_name)?;
        let remaining = PendingStore::remaining_counts(conn, &children, crm_name)?;
        let mut woken = Vec::new();
        for (child_type, child_id) in children {
            if remaining.get(&(child_type.clone(), child_id)).copied().unwrap_or(0) == 0 {
                ctx.enqueuer.enqueue(&child_type, child_id, crm_name);
                woken.push((child_type, child_id));
            }
        }
        Ok(woken)
    }

    /// Unconditional cleanup for a child that just synced successfully
    /// (spec.md §4.4 post-hooks, §3 "stale-row cleanup").
    pub fn cleanup_for_child(
        conn: &Connection,
        child_type: &str,
        child_id: i64,
        crm_name: &str,
    ) -> Result<()> {
        PendingStore::cleanup_for_child(conn, child_type, child_id, crm_name)
    }
}
