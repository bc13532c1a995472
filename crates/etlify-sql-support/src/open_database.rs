//! Opens a SQLite connection to the sync state store and brings its schema
//! up to date.
//!
//! The code handles some common cases:
//!
//!   - Opening new databases. If this is the first time opening the
//!     database, initialize it straight to the current schema.
//!
//!   - Migrating existing databases. If this is an existing database, run
//!     `upgrade_from` once per version between the file's `user_version`
//!     and `END_VERSION`.
//!
//!   - Handling migration failures. If opening or migrating results in an
//!     error, we can optionally delete the database file and start over.
use crate::ConnExt;
use rusqlite::{Connection, OpenFlags, Transaction};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Something went wrong while running an `upgrade_from` step; the
    /// database is beyond repair without falling back to recreation.
    #[error("migration error: {0}")]
    MigrationError(String),
    #[error("database version too old: {0}")]
    VersionTooOld(u32),
    #[error("database version too new: {0}")]
    VersionTooNew(u32),
    #[error("error executing SQL: {0}")]
    SqlError(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub enum DatabaseLocation {
    File(PathBuf),
    Memory,
}

impl DatabaseLocation {
    fn exists(&self) -> bool {
        match self {
            DatabaseLocation::Memory => false,
            DatabaseLocation::File(path) => path.exists(),
        }
    }

    fn open(&self, open_flags: OpenFlags) -> Result<Connection> {
        match self {
            DatabaseLocation::Memory => Ok(Connection::open_in_memory_with_flags(open_flags)?),
            DatabaseLocation::File(path) => Ok(Connection::open_with_flags(path, open_flags)?),
        }
    }

    fn delete(&self) -> Result<()> {
        match self {
            DatabaseLocation::Memory => (),
            DatabaseLocation::File(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
            }
        }
        Ok(())
    }
}

/// What to do when `prepare`/`init`/`upgrade_from` return an error.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorHandling {
    /// Delete the file and reinitialize from scratch. The sync state store
    /// can always be rebuilt from the adapters' own state plus a future
    /// stale scan, so losing it is recoverable.
    DeleteAndRecreate,
    /// Surface the error so the caller can decide (used in tests and for
    /// callers that want to preserve a corrupt file for inspection).
    ReturnError,
}

/// Implemented once per database schema. Mirrors how individual components
/// describe their own migrations: a name for logging, PRAGMAs and table
/// creation to run, and per-version upgrade steps.
pub trait ConnectionInitializer {
    const NAME: &'static str;
    const END_VERSION: u32;

    /// Runs on every open, before `init`/`upgrade_from`. `db_empty` tells
    /// you whether this is a brand new file, which matters for PRAGMAs
    /// that only make sense post-creation.
    fn prepare(&self, conn: &Connection, db_empty: bool) -> Result<()>;

    /// Creates the schema for a brand new database, straight at `END_VERSION`.
    fn init(&self, db: &Transaction<'_>) -> Result<()>;

    /// Migrates from `version` to `version + 1`.
    fn upgrade_from(&self, db: &Transaction<'_>, version: u32) -> Result<()>;
}

fn run<CI: ConnectionInitializer>(
    connection_initializer: &CI,
    conn: &mut Connection,
    db_empty: bool,
) -> Result<()> {
    log::debug!("{}: opening database", CI::NAME);
    connection_initializer.prepare(conn, db_empty)?;
    let tx = conn.transaction()?;
    if db_empty {
        connection_initializer.init(&tx)?;
    } else {
        let mut current_version = get_schema_version(&tx)?;
        if current_version > CI::END_VERSION {
            return Err(Error::VersionTooNew(current_version));
        }
        while current_version < CI::END_VERSION {
            log::debug!(
                "{}: upgrading database to {}",
                CI::NAME,
                current_version + 1
            );
            connection_initializer.upgrade_from(&tx, current_version)?;
            current_version += 1;
        }
    }
    set_schema_version(&tx, CI::END_VERSION)?;
    tx.commit()?;
    log::debug!("{}: database open successful", CI::NAME);
    Ok(())
}

pub fn open_database<CI: ConnectionInitializer>(
    path: PathBuf,
    connection_initializer: &CI,
    error_handling: ErrorHandling,
) -> Result<Connection> {
    open_database_with_flags(
        DatabaseLocation::File(path),
        OpenFlags::default(),
        connection_initializer,
        error_handling,
    )
}

pub fn open_database_with_flags<CI: ConnectionInitializer>(
    location: DatabaseLocation,
    open_flags: OpenFlags,
    connection_initializer: &CI,
    error_handling: ErrorHandling,
) -> Result<Connection> {
    let db_empty = !location.exists();
    let mut conn = location.open(open_flags)?;
    let mut result = run(connection_initializer, &mut conn, db_empty);
    if error_handling == ErrorHandling::DeleteAndRecreate {
        result = result.or_else(|e| {
            log::warn!(
                "{}: error while opening database, recreating: {:?}",
                CI::NAME,
                e
            );
            location.delete()?;
            conn = location.open(open_flags)?;
            run(connection_initializer, &mut conn, true)
        });
    }
    result?;
    Ok(conn)
}

fn get_schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_one::<u32>("PRAGMA user_version")?)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
    Ok(())
}

/// Not `#[cfg(test)]` so other crates in the workspace can use it in their
/// own tests.
pub mod test_utils {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    pub fn open_memory_database<CI: ConnectionInitializer>(
        connection_initializer: &CI,
    ) -> Result<Connection> {
        open_database_with_flags(
            DatabaseLocation::Memory,
            OpenFlags::default(),
            connection_initializer,
            ErrorHandling::ReturnError,
        )
    }

    /// A database file we can programmatically run upgrades on.
    ///
    /// We purposefully don't keep a connection around, to force upgrades to
    /// always run against a freshly opened file, as they would in practice.
    pub struct MigratedDatabaseFile<CI: ConnectionInitializer + Clone> {
        _tempdir: TempDir,
        connection_initializer: CI,
        pub path: PathBuf,
    }

    impl<CI: ConnectionInitializer + Clone> MigratedDatabaseFile<CI> {
        pub fn new(connection_initializer: CI, initial_schema: &str) -> Self {
            let tempdir = tempfile::tempdir().unwrap();
            let path = tempdir.path().join(Path::new("db.sql"));
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(initial_schema).unwrap();
            Self {
                _tempdir: tempdir,
                connection_initializer,
                path,
            }
        }

        pub fn run_all_upgrades(&self) {
            let mut conn = self.open();
            run(&self.connection_initializer, &mut conn, false).unwrap();
        }

        pub fn open(&self) -> Connection {
            Connection::open(&self.path).unwrap()
        }
    }
}

#[cfg(test)]
mod test {
    use super::test_utils::MigratedDatabaseFile;
    use super::*;

    #[derive(Clone)]
    struct TestConnectionInitializer;

    const CREATE_TABLE_V1: &str = "CREATE TABLE my_old_table_name(old_col);";

    impl ConnectionInitializer for TestConnectionInitializer {
        const NAME: &'static str = "test db";
        const END_VERSION: u32 = 3;

        fn prepare(&self, conn: &Connection, _db_empty: bool) -> Result<()> {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        }

        fn init(&self, db: &Transaction<'_>) -> Result<()> {
            db.execute_batch("CREATE TABLE my_table(col);")?;
            Ok(())
        }

        fn upgrade_from(&self, db: &Transaction<'_>, version: u32) -> Result<()> {
            match version {
                1 => {
                    db.execute_batch("ALTER TABLE my_old_table_name RENAME TO my_table;")?;
                    Ok(())
                }
                2 => {
                    db.execute_batch("ALTER TABLE my_table RENAME COLUMN old_col TO col;")?;
                    Ok(())
                }
                _ => Err(Error::MigrationError(format!(
                    "no upgrade step from version {}",
                    version
                ))),
            }
        }
    }

    fn seed_v1_file() -> MigratedDatabaseFile<TestConnectionInitializer> {
        let db_file = MigratedDatabaseFile::new(TestConnectionInitializer, CREATE_TABLE_V1);
        set_schema_version(&db_file.open(), 1).unwrap();
        db_file
    }

    #[test]
    fn test_init_fresh_database() {
        let conn =
            test_utils::open_memory_database(&TestConnectionInitializer).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 3);
        conn.execute("INSERT INTO my_table(col) VALUES ('x')", [])
            .unwrap();
    }

    #[test]
    fn test_upgrades_run_in_order() {
        let db_file = seed_v1_file();
        db_file.run_all_upgrades();
        let conn = db_file.open();
        assert_eq!(get_schema_version(&conn).unwrap(), 3);
        conn.execute("INSERT INTO my_table(col) VALUES ('renamed')", [])
            .unwrap();
    }

    #[test]
    fn test_version_too_new() {
        let db_file = seed_v1_file();
        set_schema_version(&db_file.open(), 9).unwrap();
        let mut conn = db_file.open();
        let err = run(&TestConnectionInitializer, &mut conn, false).unwrap_err();
        assert!(matches!(err, Error::VersionTooNew(9)));
    }

    #[test]
    fn test_delete_and_recreate_on_migration_failure() {
        #[derive(Clone)]
        struct BrokenInitializer;
        impl ConnectionInitializer for BrokenInitializer {
            const NAME: &'static str = "broken db";
            const END_VERSION: u32 = 2;

            fn prepare(&self, _conn: &Connection, _db_empty: bool) -> Result<()> {
                Ok(())
            }
            fn init(&self, db: &Transaction<'_>) -> Result<()> {
                db.execute_batch("CREATE TABLE my_table(col);")?;
                Ok(())
            }
            fn upgrade_from(&self, _db: &Transaction<'_>, _version: u32) -> Result<()> {
                Err(Error::MigrationError("always fails".to_string()))
            }
        }

        let db_file = MigratedDatabaseFile::new(BrokenInitializer, CREATE_TABLE_V1);
        set_schema_version(&db_file.open(), 1).unwrap();
        db_file
            .open()
            .execute(
                "INSERT INTO my_old_table_name(old_col) VALUES ('should be gone')",
                [],
            )
            .unwrap();

        let conn = open_database_with_flags(
            DatabaseLocation::File(db_file.path.clone()),
            OpenFlags::default(),
            &BrokenInitializer,
            ErrorHandling::DeleteAndRecreate,
        )
        .unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
        // The old table is gone; the file was recreated from `init`.
        assert!(conn
            .query_one::<i64>(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'my_old_table_name'"
            )
            .unwrap()
            == 0);
    }

    #[test]
    fn test_return_error_preserves_file() {
        #[derive(Clone)]
        struct BrokenInitializer;
        impl ConnectionInitializer for BrokenInitializer {
            const NAME: &'static str = "broken db";
            const END_VERSION: u32 = 2;

            fn prepare(&self, _conn: &Connection, _db_empty: bool) -> Result<()> {
                Ok(())
            }
            fn init(&self, db: &Transaction<'_>) -> Result<()> {
                db.execute_batch("CREATE TABLE my_table(col);")?;
                Ok(())
            }
            fn upgrade_from(&self, _db: &Transaction<'_>, _version: u32) -> Result<()> {
                Err(Error::MigrationError("always fails".to_string()))
            }
        }

        let db_file = MigratedDatabaseFile::new(BrokenInitializer, CREATE_TABLE_V1);
        set_schema_version(&db_file.open(), 1).unwrap();

        let result = open_database_with_flags(
            DatabaseLocation::File(db_file.path.clone()),
            OpenFlags::default(),
            &BrokenInitializer,
            ErrorHandling::ReturnError,
        );
        assert!(matches!(result, Err(Error::MigrationError(_))));
        // The original table is still there; nothing was deleted.
        assert_eq!(
            db_file
                .open()
                .query_one::<i64>(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = 'my_old_table_name'"
                )
                .unwrap(),
            1
        );
    }
}
