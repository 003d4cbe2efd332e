//! Database Migration Command

use anyhow::{Context, Result};
use std::process::ExitCode;

use super::Session;
use kyua_engine::store::{backup_path, migrate, Backend, OpenMode};

pub fn execute(session: &Session) -> Result<ExitCode> {
    let path = &session.store_path;
    migrate(path, &session.store_options)
        .with_context(|| format!("Cannot migrate {}", path.display()))?;

    let backend = Backend::open(path, OpenMode::ReadOnly, &session.store_options)?;
    println!(
        "Migrated {} to schema version {}",
        path.display(),
        backend.metadata().schema_version
    );
    let backups: Vec<_> = (1..backend.metadata().schema_version)
        .map(|v| backup_path(path, v))
        .filter(|p| p.exists())
        .collect();
    for backup in backups {
        println!("Backup kept at {}", backup.display());
    }
    Ok(ExitCode::SUCCESS)
}
