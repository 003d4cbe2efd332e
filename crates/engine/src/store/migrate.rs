//! Upgrade of stores created with older schema versions

use super::backend::SchemaMetadata;
use super::scripts::Scripts;
use super::StoreOptions;
use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File the store at `path` is copied to before migrating from `version`
pub fn backup_path(path: &Path, version: i64) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".v{}.backup", version));
    PathBuf::from(name)
}

/// Bring the store at `path` to the current schema version.
///
/// The file is first copied to [`backup_path`]. Each version step then runs
/// in its own transaction, so a failure leaves the database at the last
/// version that was reached.
pub fn migrate(path: &Path, options: &StoreOptions) -> Result<()> {
    let mut conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::Store(format!("Cannot open database {}: {}", path.display(), e)))?;
    // Table rebuilds drop referenced tables; references are checked once
    // each step is done.
    conn.execute_batch("PRAGMA foreign_keys = OFF")?;

    let version = SchemaMetadata::fetch_latest(&conn)?.schema_version;
    let target = options.schema_version;
    if version == target {
        return Err(Error::Store(format!(
            "Database {} is already at schema version {}; migration not needed",
            path.display(),
            version
        )));
    }
    if version > target {
        return Err(Error::Integrity(format!(
            "Database {} has schema version {}, which is newer than the supported version {}",
            path.display(),
            version,
            target
        )));
    }

    backup(path, version)?;

    for from in version..target {
        let name = Scripts::migration_name(from);
        let script = options.scripts.load(&name)?;
        info!("Migrating store from schema version {} to {}", from, from + 1);

        let tx = conn.transaction()?;
        tx.execute_batch(&script).map_err(|e| {
            Error::Store(format!(
                "Schema migration from version {} to {} failed: {}",
                from,
                from + 1,
                e
            ))
        })?;
        check_foreign_keys(&tx, from)?;
        SchemaMetadata::record(&tx, from + 1)?;
        tx.commit()?;
    }

    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    info!("Store {} now at schema version {}", path.display(), target);
    Ok(())
}

fn backup(path: &Path, version: i64) -> Result<()> {
    let target = backup_path(path, version);
    if target.exists() {
        warn!("Replacing existing backup {}", target.display());
    }
    std::fs::copy(path, &target).map_err(|e| {
        Error::Store(format!(
            "Cannot back up database to {}: {}",
            target.display(),
            e
        ))
    })?;
    info!("Backed up store to {}", target.display());
    Ok(())
}

fn check_foreign_keys(conn: &Connection, from: i64) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
        let table: String = row.get(0)?;
        return Err(Error::Integrity(format!(
            "Migration from version {} left a dangling reference in table {}",
            from, table
        )));
    }
    Ok(())
}
