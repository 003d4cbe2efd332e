//! Database handle and schema validation

use super::scripts::Scripts;
use super::transaction::Transaction;
use super::{from_micros, StoreOptions};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How to open a store file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing database, no writes
    ReadOnly,
    /// Existing database, writable
    ReadWrite,
    /// Writable, creating the file and its parent directory when missing
    Create,
}

/// One row of the `metadata` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMetadata {
    pub timestamp: DateTime<Utc>,
    pub schema_version: i64,
}

impl SchemaMetadata {
    /// Latest schema version recorded in the database
    pub(crate) fn fetch_latest(conn: &Connection) -> Result<Self> {
        let row = conn
            .query_row(
                "SELECT timestamp, schema_version FROM metadata \
                 ORDER BY schema_version DESC LIMIT 1",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .map_err(|e| Error::Integrity(format!("Invalid metadata schema: {}", e)))?;

        let (timestamp, schema_version) =
            row.ok_or_else(|| Error::Integrity("Empty metadata table".to_string()))?;
        Ok(Self {
            timestamp: from_micros(timestamp)?,
            schema_version,
        })
    }

    /// Record that the database is now at `schema_version`
    pub(crate) fn record(conn: &Connection, schema_version: i64) -> Result<Self> {
        let timestamp = from_micros(Utc::now().timestamp_micros())?;
        conn.execute(
            "INSERT INTO metadata (timestamp, schema_version) VALUES (?1, ?2)",
            params![timestamp.timestamp_micros(), schema_version],
        )?;
        Ok(Self {
            timestamp,
            schema_version,
        })
    }
}

/// An open results store
pub struct Backend {
    conn: Connection,
    path: PathBuf,
    metadata: SchemaMetadata,
}

impl Backend {
    /// Open an existing store for reading
    pub fn open_ro(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, OpenMode::ReadOnly, &StoreOptions::from_env())
    }

    /// Open a store for writing, optionally creating it
    pub fn open_rw(path: impl AsRef<Path>, create_if_missing: bool) -> Result<Self> {
        let mode = if create_if_missing {
            OpenMode::Create
        } else {
            OpenMode::ReadWrite
        };
        Self::open(path, mode, &StoreOptions::from_env())
    }

    /// Open a store and check its schema version.
    ///
    /// An empty database opened for writing is initialized with the current
    /// schema. A database at an older version must be migrated first; one at
    /// a newer version is rejected.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, options: &StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = connect(path, mode)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;

        let metadata = if is_empty(&conn)? {
            if mode == OpenMode::ReadOnly {
                return Err(Error::Store(format!(
                    "Database {} is empty and cannot be initialized read-only",
                    path.display()
                )));
            }
            initialize(&mut conn, options)?
        } else {
            let metadata = SchemaMetadata::fetch_latest(&conn)?;
            check_version(path, metadata.schema_version, options.schema_version)?;
            metadata
        };

        debug!(
            "Opened store {} at schema version {}",
            path.display(),
            metadata.schema_version
        );
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema information read when the store was opened
    pub fn metadata(&self) -> &SchemaMetadata {
        &self.metadata
    }

    /// Begin a transaction; it rolls back unless committed
    pub fn start(&mut self) -> Result<Transaction<'_>> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::Store(format!("Cannot begin transaction: {}", e)))?;
        Ok(Transaction::new(tx))
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("path", &self.path)
            .field("metadata", &self.metadata)
            .finish()
    }
}

fn connect(path: &Path, mode: OpenMode) -> Result<Connection> {
    let flags = match mode {
        OpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
        OpenMode::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE,
        OpenMode::Create => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Store(format!(
                        "Cannot create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        }
    };
    Connection::open_with_flags(path, flags | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        .map_err(|e| Error::Store(format!("Cannot open database {}: {}", path.display(), e)))
}

fn is_empty(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))?;
    Ok(count == 0)
}

fn initialize(conn: &mut Connection, options: &StoreOptions) -> Result<SchemaMetadata> {
    info!("Initializing store with schema version {}", options.schema_version);
    let script = options
        .scripts
        .load(&Scripts::schema_name(options.schema_version))?;

    let tx = conn.transaction()?;
    tx.execute_batch(&script)
        .map_err(|e| Error::Store(format!("Failed to initialize database: {}", e)))?;
    let metadata = SchemaMetadata::record(&tx, options.schema_version)?;
    tx.commit()?;
    Ok(metadata)
}

fn check_version(path: &Path, found: i64, supported: i64) -> Result<()> {
    if found > supported {
        return Err(Error::Integrity(format!(
            "Database {} has schema version {}, which is newer than the supported version {}",
            path.display(),
            found,
            supported
        )));
    }
    if found < supported {
        return Err(Error::OldSchema {
            path: path.display().to_string(),
            version: found,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("store.db")
    }

    #[test]
    fn test_create_initializes_schema() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = Backend::open(store_path(&tmp), OpenMode::Create, &StoreOptions::default())
            .unwrap();
        assert_eq!(2, backend.metadata().schema_version);
    }

    #[test]
    fn test_create_makes_parent_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("sub").join("store.db");
        Backend::open(&path, OpenMode::Create, &StoreOptions::default()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = store_path(&tmp);
        let first = Backend::open(&path, OpenMode::Create, &StoreOptions::default()).unwrap();
        let created = first.metadata().clone();
        drop(first);

        let second = Backend::open(&path, OpenMode::ReadWrite, &StoreOptions::default()).unwrap();
        assert_eq!(created.schema_version, second.metadata().schema_version);

        let rows: i64 = second
            .conn
            .query_row("SELECT COUNT(*) FROM metadata", [], |row| row.get(0))
            .unwrap();
        assert_eq!(1, rows);
    }

    #[test]
    fn test_read_only_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = Backend::open(store_path(&tmp), OpenMode::ReadOnly, &StoreOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn test_read_write_without_create_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = Backend::open(store_path(&tmp), OpenMode::ReadWrite, &StoreOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn test_newer_schema_is_integrity_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = store_path(&tmp);
        let backend = Backend::open(&path, OpenMode::Create, &StoreOptions::default()).unwrap();
        SchemaMetadata::record(&backend.conn, 3).unwrap();
        drop(backend);

        let err = Backend::open(&path, OpenMode::ReadOnly, &StoreOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[test]
    fn test_older_schema_needs_migration() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = store_path(&tmp);
        Backend::open(&path, OpenMode::Create, &StoreOptions::default()).unwrap();

        let newer = StoreOptions {
            schema_version: 3,
            ..StoreOptions::default()
        };
        match Backend::open(&path, OpenMode::ReadOnly, &newer) {
            Err(Error::OldSchema { version, .. }) => assert_eq!(2, version),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_metadata_table() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = store_path(&tmp);
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE unrelated (x INTEGER)")
            .unwrap();

        let err = Backend::open(&path, OpenMode::ReadOnly, &StoreOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }
}
