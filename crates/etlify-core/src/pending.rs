//! PendingDependency store: one row per `(child, parent, crm_name)`
//! (spec.md §3, §6), backing the Dependency Resolver.

use std::collections::HashMap;

use etlify_sql_support::{each_chunk, ConnExt};
use rusqlite::Connection;

use crate::error::Result;
use crate::time::now_millis;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingRow {
    pub id: i64,
    pub dependent_type: String,
    pub dependent_id: i64,
    pub dependency_type: String,
    pub dependency_id: i64,
    pub crm_name: String,
}

pub struct PendingStore;

impl PendingStore {
    /// Idempotent insert of one row per (child, parent, crm). Duplicate
    /// inserts are no-ops (spec.md §3).
    pub fn register(
        conn: &Connection,
        dependent_type: &str,
        dependent_id: i64,
        dependency_type: &str,
        dependency_id: i64,
        crm_name: &str,
    ) -> Result<()> {
        let now = now_millis();
        conn.execute_cached(
            "INSERT INTO etlify_pending_syncs \
                (dependent_type, dependent_id, dependency_type, dependency_id, crm_name, \
                 created_at, updated_at) \
             VALUES (:dependent_type, :dependent_id, :dependency_type, :dependency_id, :crm_name, \
                     :now, :now) \
             ON CONFLICT(dependent_type, dependent_id, dependency_type, dependency_id, crm_name) \
               DO NOTHING",
            rusqlite::named_params! {
                ":dependent_type": dependent_type,
                ":dependent_id": dependent_id,
                ":dependency_type": dependency_type,
                ":dependency_id": dependency_id,
                ":crm_name": crm_name,
                ":now": now,
            },
        )?;
        Ok(())
    }

    /// `true` if the reverse edge already exists: `parent` is itself
    /// waiting on `child` for this CRM (spec.md §4.4's cycle detection).
    pub fn reverse_edge_exists(
        conn: &Connection,
        child_type: &str,
        child_id: i64,
        parent_type: &str,
        parent_id: i64,
        crm_name: &str,
    ) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM etlify_pending_syncs \
             WHERE dependent_type = ?1 AND dependent_id = ?2 \
               AND dependency_type = ?3 AND dependency_id = ?4 AND crm_name = ?5",
            rusqlite::params![parent_type, parent_id, child_type, child_id, crm_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// How many pending rows remain for `child` on this CRM (used to
    /// decide whether all the child's deps are now satisfied).
    pub fn remaining_for_child(
        conn: &Connection,
        child_type: &str,
        child_id: i64,
        crm_name: &str,
    ) -> Result<i64> {
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM etlify_pending_syncs \
             WHERE dependent_type = ?1 AND dependent_id = ?2 AND crm_name = ?3",
            rusqlite::params![child_type, child_id, crm_name],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Deletes rows where `(dependency_type, dependency_id)` is the
    /// parent, grouping survivors by child (spec.md §4.5
    /// `resolve_dependents`). Returns the distinct `(child_type,
    /// child_id)` pairs that had at least one row deleted.
    pub fn resolve_dependents(
        conn: &Connection,
        parent_type: &str,
        parent_id: i64,
        crm_name: &str,
    ) -> Result<Vec<(String, i64)>> {
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT dependent_type, dependent_id FROM etlify_pending_syncs \
             WHERE dependency_type = ?1 AND dependency_id = ?2 AND crm_name = ?3",
        )?;
        let mut rows = stmt.query(rusqlite::params![parent_type, parent_id, crm_name])?;
        let mut children = Vec::new();
        while let Some(row) = rows.next()? {
            children.push((row.get::<_, String>(0)?, row.get::<_, i64>(1)?));
        }
        drop(rows);
        drop(stmt);
        conn.prepare_cached(
            "DELETE FROM etlify_pending_syncs \
             WHERE dependency_type = ?1 AND dependency_id = ?2 AND crm_name = ?3",
        )?
        .execute(rusqlite::params![parent_type, parent_id, crm_name])?;
        Ok(children)
    }

    /// Unconditionally deletes all pending rows for `child` / CRM
    /// (spec.md §4.5 `cleanup_for_child`; also called on the child's own
    /// successful sync as stale-row cleanup, spec.md §3).
    pub fn cleanup_for_child(
        conn: &Connection,
        child_type: &str,
        child_id: i64,
        crm_name: &str,
    ) -> Result<()> {
        conn.prepare_cached(
            "DELETE FROM etlify_pending_syncs \
             WHERE dependent_type = ?1 AND dependent_id = ?2 AND crm_name = ?3",
        )?
        .execute(rusqlite::params![child_type, child_id, crm_name])?;
        Ok(())
    }

    /// Count of pending rows per child, across all of `children` at
    /// once, used by the resolver right after a batch delete. Children
    /// are grouped by type and their ids chunked to respect
    /// `SQLITE_LIMIT_VARIABLE_NUMBER`, so waking a parent with many
    /// children costs one `IN (...)` query per chunk rather than one
    /// query per child.
    pub fn remaining_counts(
        conn: &Connection,
        children: &[(String, i64)],
        crm_name: &str,
    ) -> Result<HashMap<(String, i64), i64>> {
        let mut counts: HashMap<(String, i64), i64> =
            children.iter().cloned().map(|key| (key, 0)).collect();

        let mut ids_by_type: HashMap<&str, Vec<i64>> = HashMap::new();
        for (child_type, child_id) in children {
            ids_by_type.entry(child_type.as_str()).or_default().push(*child_id);
        }

        for (child_type, ids) in ids_by_type {
            each_chunk(&ids, |chunk, _offset| -> Result<()> {
                let placeholders = std::iter::repeat("?").take(chunk.len()).collect::<Vec<_>>().join(", ");
                let sql = format!(
                    "SELECT dependent_id, count(*) FROM etlify_pending_syncs \
                     WHERE dependent_type = ? AND crm_name = ? AND dependent_id IN ({placeholders}) \
                     GROUP BY dependent_id"
                );
                let mut stmt = conn.prepare_maybe_cached(&sql, false)?;
                let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(chunk.len() + 2);
                params.push(&child_type);
                params.push(&crm_name);
                params.extend_from_slice(chunk);
                let mut rows = stmt.query(params.as_slice())?;
                while let Some(row) = rows.next()? {
                    let id: i64 = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    counts.insert((child_type.to_string(), id), count);
                }
                Ok(())
            })?;
        }

        Ok(counts)
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
    fn duplicate_register_is_idempotent() {
        let conn = db();
        PendingStore::register(&conn, "Child", 1, "Parent", 2, "hubspot").unwrap();
        PendingStore::register(&conn, "Child", 1, "Parent", 2, "hubspot").unwrap();
        assert_eq!(
            PendingStore::remaining_for_child(&conn, "Child", 1, "hubspot").unwrap(),
            1
        );
    }

    #[test]
    fn resolve_dependents_deletes_and_groups_by_child() {
        let conn = db();
        PendingStore::register(&conn, "Child", 1, "Parent", 9, "hubspot").unwrap();
        PendingStore::register(&conn, "Child", 2, "Parent", 9, "hubspot").unwrap();
        PendingStore::register(&conn, "Child", 1, "Other", 5, "hubspot").unwrap();

        let children = PendingStore::resolve_dependents(&conn, "Parent", 9, "hubspot").unwrap();
        assert_eq!(children.len(), 2);
        // Child 1 still has a pending row on "Other".
        assert_eq!(
            PendingStore::remaining_for_child(&conn, "Child", 1, "hubspot").unwrap(),
            1
        );
        assert_eq!(
            PendingStore::remaining_for_child(&conn, "Child", 2, "hubspot").unwrap(),
            0
        );
    }

    #[test]
    fn remaining_counts_batches_by_child_type() {
        let conn = db();
        PendingStore::register(&conn, "Child", 1, "Other", 5, "hubspot").unwrap();
        PendingStore::register(&conn, "Other", 7, "Parent", 9, "hubspot").unwrap();

        let children = vec![
            ("Child".to_string(), 1),
            ("Child".to_string(), 2),
            ("Other".to_string(), 7),
        ];
        let counts = PendingStore::remaining_counts(&conn, &children, "hubspot").unwrap();
        assert_eq!(counts.get(&("Child".to_string(), 1)), Some(&1));
        assert_eq!(counts.get(&("Child".to_string(), 2)), Some(&0));
        assert_eq!(counts.get(&("Other".to_string(), 7)), Some(&1));
    }

    #[test]
    fn reverse_edge_detected() {
        let conn = db();
        PendingStore::register(&conn, "A", 1, "B", 2, "hubspot").unwrap();
        assert!(PendingStore::reverse_edge_exists(&conn, "B", 2, "A", 1, "hubspot").unwrap());
        assert!(!PendingStore::reverse_edge_exists(&conn, "A", 1, "B", 2, "hubspot").unwrap());
    }

    #[test]
    fn cleanup_for_child_removes_regardless_of_parent() {
        let conn = db();
        PendingStore::register(&conn, "A", 1, "B", 2, "hubspot").unwrap();
        PendingStore::register(&conn, "A", 1, "C", 3, "hubspot").unwrap();
        PendingStore::cleanup_for_child(&conn, "A", 1, "hubspot").unwrap();
        assert_eq!(
            PendingStore::remaining_for_child(&conn, "A", 1, "hubspot").unwrap(),
            0
        );
    }
}
