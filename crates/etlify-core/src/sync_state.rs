//! SyncState store: one row per `(resource_type, resource_id, crm_name)`
//! (spec.md §3, §6). Created lazily on first sync attempt; never deleted
//! by the engine except via cascading delete of the owning record.

use etlify_sql_support::ConnExt;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::time::now_millis;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncStateRow {
    pub id: i64,
    pub crm_name: String,
    pub crm_id: Option<String>,
    pub last_digest: Option<String>,
    pub last_synced_at: Option<i64>,
    pub last_error: Option<String>,
    pub error_count: u32,
    pub resource_type: String,
    pub resource_id: i64,
}

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncStateRow> {
    Ok(SyncStateRow {
        id: row.get("id")?,
        crm_name: row.get("crm_name")?,
        crm_id: row.get("crm_id")?,
        last_digest: row.get("last_digest")?,
        last_synced_at: row.get("last_synced_at")?,
        last_error: row.get("last_error")?,
        error_count: row.get::<_, i64>("error_count")? as u32,
        resource_type: row.get("resource_type")?,
        resource_id: row.get("resource_id")?,
    })
}

const SELECT_COLUMNS: &str = "id, crm_name, crm_id, last_digest, last_synced_at, last_error, \
     error_count, resource_type, resource_id";

pub struct SyncStateStore;

impl SyncStateStore {
    pub fn find(
        conn: &Connection,
        resource_type: &str,
        resource_id: i64,
        crm_name: &str,
    ) -> Result<Option<SyncStateRow>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM crm_synchronisations \
             WHERE resource_type = ?1 AND resource_id = ?2 AND crm_name = ?3"
        );
        let row = conn
            .query_row(
                &sql,
                params![resource_type, resource_id, crm_name],
                row_to_state,
            )
            .optional()?;
        Ok(row)
    }

    /// Creates the row if absent, leaving all fields at their defaults.
    /// Used by states that need a row to exist before touching fields on
    /// it (skipped, not_modified) without caring whether it already did.
    pub fn ensure(
        conn: &Connection,
        resource_type: &str,
        resource_id: i64,
        crm_name: &str,
    ) -> Result<SyncStateRow> {
        if let Some(existing) = Self::find(conn, resource_type, resource_id, crm_name)? {
            return Ok(existing);
        }
        let now = now_millis();
        conn.execute_cached(
            "INSERT INTO crm_synchronisations \
                (resource_type, resource_id, crm_name, error_count, created_at, updated_at) \
             VALUES (:resource_type, :resource_id, :crm_name, 0, :now, :now) \
             ON CONFLICT(resource_type, resource_id, crm_name) DO NOTHING",
            rusqlite::named_params! {
                ":resource_type": resource_type,
                ":resource_id": resource_id,
                ":crm_name": crm_name,
                ":now": now,
            },
        )?;
        Ok(Self::find(conn, resource_type, resource_id, crm_name)?
            .expect("row was just inserted or already existed"))
    }

    /// Guard-denied (spec.md §4.4): reset `error_count`, clear
    /// `last_error`, touch `last_synced_at`.
    pub fn mark_skipped(
        conn: &Connection,
        resource_type: &str,
        resource_id: i64,
        crm_name: &str,
    ) -> Result<()> {
        Self::ensure(conn, resource_type, resource_id, crm_name)?;
        let now = now_millis();
        conn.execute_cached(
            "UPDATE crm_synchronisations \
             SET error_count = 0, last_error = NULL, last_synced_at = :now, updated_at = :now \
             WHERE resource_type = :resource_type AND resource_id = :resource_id AND crm_name = :crm_name",
            rusqlite::named_params! {
                ":now": now,
                ":resource_type": resource_type,
                ":resource_id": resource_id,
                ":crm_name": crm_name,
            },
        )?;
        Ok(())
    }

    /// Digest matched the stored one: only `last_synced_at` moves.
    pub fn mark_not_modified(
        conn: &Connection,
        resource_type: &str,
        resource_id: i64,
        crm_name: &str,
    ) -> Result<()> {
        Self::ensure(conn, resource_type, resource_id, crm_name)?;
        let now = now_millis();
        conn.execute_cached(
            "UPDATE crm_synchronisations SET last_synced_at = :now, updated_at = :now \
             WHERE resource_type = :resource_type AND resource_id = :resource_id AND crm_name = :crm_name",
            rusqlite::named_params! {
                ":now": now,
                ":resource_type": resource_type,
                ":resource_id": resource_id,
                ":crm_name": crm_name,
            },
        )?;
        Ok(())
    }

    /// Adapter returned a `crm_id`. The existing `crm_id` is preserved if
    /// non-empty (spec.md §4.4: "once assigned, the local crm_id is
    /// never overwritten by a blank adapter result"). Returns the final
    /// `crm_id` stored.
    pub fn mark_synced(
        conn: &Connection,
        resource_type: &str,
        resource_id: i64,
        crm_name: &str,
        adapter_crm_id: &str,
        digest: &str,
    ) -> Result<String> {
        let existing = Self::ensure(conn, resource_type, resource_id, crm_name)?;
        let final_crm_id = match &existing.crm_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => adapter_crm_id.to_string(),
        };
        let now = now_millis();
        conn.execute_cached(
            "UPDATE crm_synchronisations \
             SET crm_id = :crm_id, last_digest = :digest, last_synced_at = :now, \
                 last_error = NULL, error_count = 0, updated_at = :now \
             WHERE resource_type = :resource_type AND resource_id = :resource_id AND crm_name = :crm_name",
            rusqlite::named_params! {
                ":crm_id": final_crm_id,
                ":digest": digest,
                ":now": now,
                ":resource_type": resource_type,
                ":resource_id": resource_id,
                ":crm_name": crm_name,
            },
        )?;
        Ok(final_crm_id)
    }

    /// Any error raised after lock acquisition (spec.md §4.4): persists
    /// `{last_error, error_count += 1}` and returns the new count.
    pub fn mark_error(
        conn: &Connection,
        resource_type: &str,
        resource_id: i64,
        crm_name: &str,
        message: &str,
    ) -> Result<u32> {
        Self::ensure(conn, resource_type, resource_id, crm_name)?;
        let now = now_millis();
        conn.execute_cached(
            "UPDATE crm_synchronisations \
             SET last_error = :message, error_count = error_count + 1, updated_at = :now \
             WHERE resource_type = :resource_type AND resource_id = :resource_id AND crm_name = :crm_name",
            rusqlite::named_params! {
                ":message": message,
                ":now": now,
                ":resource_type": resource_type,
                ":resource_id": resource_id,
                ":crm_name": crm_name,
            },
        )?;
        let row = Self::find(conn, resource_type, resource_id, crm_name)?
            .expect("row was just ensured");
        Ok(row.error_count)
    }

    /// Legacy dependency check, part one (spec.md §4.4): does a
    /// SyncState row exist for this CRM with a non-empty `crm_id`?
    pub fn has_remote_id(
        conn: &Connection,
        resource_type: &str,
        resource_id: i64,
        crm_name: &str,
    ) -> Result<bool> {
        Ok(Self::find(conn, resource_type, resource_id, crm_name)?
            .and_then(|row| row.crm_id)
            .map(|id| !id.is_empty())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::EtlifyConnectionInitializer;
    use etlify_sql_support::test_utils::open_memory_database;

    fn db() -> Connection {
        open_memory_database(&EtlifyConnectionInitializer).unwrap()
    }

    #[test]
    fn ensure_is_idempotent() {
        let conn = db();
        let first = SyncStateStore::ensure(&conn, "User", 1, "hubspot").unwrap();
        let second = SyncStateStore::ensure(&conn, "User", 1, "hubspot").unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn crm_id_is_never_overwritten_with_blank() {
        let conn = db();
        let id = SyncStateStore::mark_synced(&conn, "User", 1, "hubspot", "crm-1", "digest-a").unwrap();
        assert_eq!(id, "crm-1");
        let id = SyncStateStore::mark_synced(&conn, "User", 1, "hubspot", "", "digest-b").unwrap();
        assert_eq!(id, "crm-1");
    }

    #[test]
    fn error_count_increments_then_resets_on_success() {
        let conn = db();
        let count = SyncStateStore::mark_error(&conn, "User", 1, "hubspot", "boom").unwrap();
        assert_eq!(count, 1);
        let count = SyncStateStore::mark_error(&conn, "User", 1, "hubspot", "boom again").unwrap();
        assert_eq!(count, 2);
        SyncStateStore::mark_synced(&conn, "User", 1, "hubspot", "crm-1", "digest").unwrap();
        let row = SyncStateStore::find(&conn, "User", 1, "hubspot").unwrap().unwrap();
        assert_eq!(row.error_count, 0);
        assert_eq!(row.last_error, None);
    }

    #[test]
    fn skip_resets_error_state_and_touches_timestamp() {
        let conn = db();
        SyncStateStore::mark_error(&conn, "User", 1, "hubspot", "boom").unwrap();
        SyncStateStore::mark_skipped(&conn, "User", 1, "hubspot").unwrap();
        let row = SyncStateStore::find(&conn, "User", 1, "hubspot").unwrap().unwrap();
        assert_eq!(row.error_count, 0);
        assert_eq!(row.last_error, None);
        assert!(row.last_synced_at.is_some());
    }

    #[test]
    fn has_remote_id_false_until_synced() {
        let conn = db();
        assert!(!SyncStateStore::has_remote_id(&conn, "User", 1, "hubspot").unwrap());
        SyncStateStore::mark_synced(&conn, "User", 1, "hubspot", "crm-1", "digest").unwrap();
        assert!(SyncStateStore::has_remote_id(&conn, "User", 1, "hubspot").unwrap());
    }
}
