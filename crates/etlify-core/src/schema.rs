//! SQL schema for the two tables the engine owns (spec.md §6), created by
//! a `sql-support`-style [`ConnectionInitializer`].

use etlify_sql_support::{ConnectionInitializer, Result as SqlResult};
use rusqlite::{Connection, Transaction};

pub const CRM_SYNCHRONISATIONS_TABLE: &str = "crm_synchronisations";
pub const PENDING_SYNCS_TABLE: &str = "etlify_pending_syncs";

#[derive(Clone, Default)]
pub struct EtlifyConnectionInitializer;

impl ConnectionInitializer for EtlifyConnectionInitializer {
    const NAME: &'static str = "etlify sync state store";
    const END_VERSION: u32 = 1;

    fn prepare(&self, conn: &Connection, _db_empty: bool) -> SqlResult<()> {
        let initial_pragmas = "
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = 2;
        ";
        conn.execute_batch(initial_pragmas)?;
        Ok(())
    }

    fn init(&self, db: &Transaction<'_>) -> SqlResult<()> {
        log::debug!("{}: creating schema", Self::NAME);
        db.execute_batch(
            "
            CREATE TABLE crm_synchronisations(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                crm_name TEXT NOT NULL,
                crm_id TEXT,
                last_digest TEXT,
                last_synced_at INTEGER,
                last_error TEXT,
                error_count INTEGER NOT NULL DEFAULT 0,
                resource_type TEXT NOT NULL,
                resource_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(resource_type, resource_id, crm_name)
            );

            CREATE UNIQUE INDEX idx_crm_synchronisations_crm_id
                ON crm_synchronisations(crm_name, resource_type, crm_id)
                WHERE crm_id IS NOT NULL;

            CREATE INDEX idx_crm_synchronisations_lookup
                ON crm_synchronisations(crm_name, resource_type, resource_id);

            CREATE TABLE etlify_pending_syncs(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dependent_type TEXT NOT NULL,
                dependent_id INTEGER NOT NULL,
                dependency_type TEXT NOT NULL,
                dependency_id INTEGER NOT NULL,
                crm_name TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(dependent_type, dependent_id, dependency_type, dependency_id, crm_name)
            );

            CREATE INDEX idx_etlify_pending_syncs_parent
                ON etlify_pending_syncs(dependency_type, dependency_id, crm_name);

            CREATE INDEX idx_etlify_pending_syncs_child
                ON etlify_pending_syncs(dependent_type, dependent_id, crm_name);
            ",
        )?;
        Ok(())
    }

    fn upgrade_from(&self, _db: &Transaction<'_>, version: u32) -> SqlResult<()> {
        Err(etlify_sql_support::Error::MigrationError(format!(
            "no upgrade step from version {version}"
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use etlify_sql_support::test_utils::open_memory_database;

    #[test]
    fn creates_both_tables() {
        let conn = open_memory_database(&EtlifyConnectionInitializer).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN (?, ?)",
                rusqlite::params![CRM_SYNCHRONISATIONS_TABLE, PENDING_SYNCS_TABLE],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
