//! Error types for the Kyua engine

use thiserror::Error;

/// Result type alias using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Load of '{path}' failed: {reason}")]
    Load { path: String, reason: String },

    #[error("{kind} with id {id} not found")]
    NotFound { kind: String, id: String },

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("The database at {path} has schema version {version}, which is too old; please migrate it")]
    OldSchema { path: String, version: i64 },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Tester failed: {0}")]
    Tester(String),

    #[error("Tester bug: {0}")]
    TesterBug(String),

    #[error("Invalid value: {0}")]
    Format(String),

    #[error("Interrupted by signal {0}")]
    Interrupted(i32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a not-found error on a numeric row id
    pub fn not_found(kind: &str, id: i64) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    /// Shorthand for a load error
    pub fn load(path: impl AsRef<std::path::Path>, reason: impl Into<String>) -> Self {
        Error::Load {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }
}

// The storage engine's own error type stays inside the store layer.
impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::InvalidColumnType(index, name, kind) => Error::Integrity(format!(
                "Column {} ({}) has unexpected type {}",
                index, name, kind
            )),
            other => Error::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_errors_are_wrapped() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::Store(_)));

        let err: Error =
            rusqlite::Error::InvalidColumnType(2, "name".to_string(), rusqlite::types::Type::Integer)
                .into();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[test]
    fn test_not_found_names_the_id() {
        let err = Error::not_found("Action", 42);
        assert_eq!("Action with id 42 not found", err.to_string());
    }
}
