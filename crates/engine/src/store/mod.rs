//! Persistent store of actions and test results
//!
//! The store is a single SQLite file. [`Backend`] opens it and validates the
//! schema version, [`Transaction`] reads and writes records, and
//! [`ResultsIterator`] replays the results of one action. Databases created
//! by older versions are upgraded explicitly with [`migrate`].

mod backend;
mod migrate;
mod results;
mod scripts;
mod transaction;

pub use backend::{Backend, OpenMode, SchemaMetadata};
pub use migrate::{backup_path, migrate};
pub use results::ResultsIterator;
pub use scripts::Scripts;
pub use transaction::{Transaction, STDERR_FILE, STDOUT_FILE};

use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};

/// Schema version written by this build
pub const SCHEMA_VERSION: i64 = 2;

/// Settings shared by everything that opens a store
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Source of the schema and migration scripts
    pub scripts: Scripts,
    /// Schema version considered current
    pub schema_version: i64,
}

impl StoreOptions {
    /// Scripts from `KYUA_STOREDIR` when set, built-in otherwise
    pub fn from_env() -> Self {
        Self {
            scripts: Scripts::from_env(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            scripts: Scripts::Builtin,
            schema_version: SCHEMA_VERSION,
        }
    }
}

// Timestamps are stored as microseconds since the Unix epoch.
fn from_micros(value: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_micros(value)
        .single()
        .ok_or_else(|| Error::Integrity(format!("Invalid timestamp {}", value)))
}
