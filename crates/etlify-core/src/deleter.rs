//! Deleter: remote delete helper, `adapter.delete` wrapped with SyncState
//! housekeeping (spec.md §4.9).

use rusqlite::Connection;

use crate::context::EngineContext;
use crate::error::{EtlifyError, Result};
use crate::sync_state::SyncStateStore;

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// No SyncState row, or one with a blank `crm_id`: nothing to do
    /// remotely.
    NoOp,
    /// `adapter.delete` returned `true` (2xx).
    Deleted,
    /// `adapter.delete` returned `false` (404: already gone remotely).
    AlreadyGone,
}

pub struct Deleter;

impl Deleter {
    pub async fn delete(
        ctx: &EngineContext,
        conn: &Connection,
        resource_type: &str,
        resource_id: i64,
        crm_name: &str,
    ) -> Result<DeleteOutcome> {
        let state = SyncStateStore::find(conn, resource_type, resource_id, crm_name)?;
        let crm_id = match state.and_then(|row| row.crm_id).filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => return Ok(DeleteOutcome::NoOp),
        };

        let binding = ctx
            .bindings
            .get(resource_type, crm_name)
            .ok_or_else(|| EtlifyError::UnknownBinding(resource_type.to_string(), crm_name.to_string()))?;
        let crm_entry = ctx
            .crms
            .fetch(crm_name)
            .ok_or_else(|| EtlifyError::UnknownCrm(crm_name.to_string()))?;

        let deleted = crm_entry
            .adapter
            .delete(&crm_id, &binding.crm_object_type)
            .await
            .map_err(EtlifyError::Adapter)?;

        Ok(if deleted {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::AlreadyGone
        })
    }
}
