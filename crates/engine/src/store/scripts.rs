//! SQL scripts that create and upgrade the store schema

use crate::config::store_dir;
use crate::{Error, Result};
use std::path::PathBuf;

const BUILTIN: &[(&str, &str)] = &[
    ("schema_v2.sql", include_str!("../../store/schema_v2.sql")),
    ("migrate_v1_v2.sql", include_str!("../../store/migrate_v1_v2.sql")),
];

/// Where schema scripts are read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripts {
    /// Scripts compiled into the library
    Builtin,
    /// Scripts read from a directory at run time
    Directory(PathBuf),
}

impl Scripts {
    /// Honour `KYUA_STOREDIR` when it is set
    pub fn from_env() -> Self {
        match store_dir() {
            Some(dir) => Scripts::Directory(dir),
            None => Scripts::Builtin,
        }
    }

    /// Name of the script creating a fresh database at `version`
    pub fn schema_name(version: i64) -> String {
        format!("schema_v{}.sql", version)
    }

    /// Name of the script upgrading a database from `from` to `from + 1`
    pub fn migration_name(from: i64) -> String {
        format!("migrate_v{}_v{}.sql", from, from + 1)
    }

    /// Read a script by file name
    pub fn load(&self, name: &str) -> Result<String> {
        match self {
            Scripts::Builtin => BUILTIN
                .iter()
                .find(|(builtin, _)| *builtin == name)
                .map(|(_, contents)| contents.to_string())
                .ok_or_else(|| Error::Store(format!("Cannot find store script {}", name))),
            Scripts::Directory(dir) => {
                let path = dir.join(name);
                std::fs::read_to_string(&path).map_err(|e| {
                    Error::Store(format!("Cannot read store script {}: {}", path.display(), e))
                })
            }
        }
    }
}
