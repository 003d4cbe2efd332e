//! Reads and writes of store records

use super::results::ResultsIterator;
use crate::context::{Action, Context};
use crate::metadata::Metadata;
use crate::test_program::{TestCase, TestProgram};
use crate::test_result::TestResult;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Name under which a test case's standard output is stored
pub const STDOUT_FILE: &str = "__STDOUT__";

/// Name under which a test case's standard error is stored
pub const STDERR_FILE: &str = "__STDERR__";

/// A unit of work against the store.
///
/// Dropping a transaction without calling [`Transaction::commit`] discards
/// everything it wrote.
pub struct Transaction<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl<'conn> Transaction<'conn> {
    pub(super) fn new(tx: rusqlite::Transaction<'conn>) -> Self {
        Self { tx }
    }

    pub fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .map_err(|e| Error::Store(format!("Failed to commit transaction: {}", e)))
    }

    pub fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .map_err(|e| Error::Store(format!("Failed to roll back transaction: {}", e)))
    }

    pub fn put_context(&self, context: &Context) -> Result<i64> {
        self.tx.execute(
            "INSERT INTO contexts (cwd) VALUES (?1)",
            params![path_str(context.cwd())?],
        )?;
        let context_id = self.tx.last_insert_rowid();

        let mut stmt = self.tx.prepare(
            "INSERT INTO env_vars (context_id, var_name, var_value) VALUES (?1, ?2, ?3)",
        )?;
        for (name, value) in context.env() {
            stmt.execute(params![context_id, name, value])?;
        }
        Ok(context_id)
    }

    pub fn put_action(&self, context_id: i64) -> Result<i64> {
        self.tx.execute(
            "INSERT INTO actions (context_id) VALUES (?1)",
            params![context_id],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn put_test_program(&self, program: &TestProgram, action_id: i64) -> Result<i64> {
        let metadata_id = put_metadata(&self.tx, program.metadata())?;
        self.tx.execute(
            "INSERT INTO test_programs (action_id, absolute_path, root, relative_path, \
                                        test_suite_name, metadata_id, interface) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                action_id,
                path_str(&program.absolute_path())?,
                path_str(program.root())?,
                path_str(program.relative_path())?,
                program.test_suite_name(),
                metadata_id,
                program.interface(),
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn put_test_case(&self, test_case: &TestCase, test_program_id: i64) -> Result<i64> {
        let metadata_id = put_metadata(&self.tx, test_case.metadata())?;
        self.tx.execute(
            "INSERT INTO test_cases (test_program_id, name, metadata_id) VALUES (?1, ?2, ?3)",
            params![test_program_id, test_case.name(), metadata_id],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Store the contents of a file; empty files are not stored
    pub fn put_file(&self, path: &Path) -> Result<Option<i64>> {
        let contents = std::fs::read(path)
            .map_err(|e| Error::Store(format!("Cannot read file {}: {}", path.display(), e)))?;
        if contents.is_empty() {
            return Ok(None);
        }
        self.tx.execute(
            "INSERT INTO files (contents) VALUES (?1)",
            params![contents],
        )?;
        Ok(Some(self.tx.last_insert_rowid()))
    }

    /// Attach a file to a test case under `name`, unless the file is empty
    pub fn put_test_case_file(
        &self,
        name: &str,
        path: &Path,
        test_case_id: i64,
    ) -> Result<Option<i64>> {
        let file_id = match self.put_file(path)? {
            Some(id) => id,
            None => {
                debug!("Not storing empty file {} for test case {}", name, test_case_id);
                return Ok(None);
            }
        };
        self.tx.execute(
            "INSERT INTO test_case_files (test_case_id, file_name, file_id) VALUES (?1, ?2, ?3)",
            params![test_case_id, name, file_id],
        )?;
        Ok(Some(file_id))
    }

    pub fn put_result(
        &self,
        result: &TestResult,
        test_case_id: i64,
        start_time: &DateTime<Utc>,
        end_time: &DateTime<Utc>,
    ) -> Result<i64> {
        self.tx.execute(
            "INSERT INTO test_results (test_case_id, result_type, result_reason, \
                                       start_time, end_time) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                test_case_id,
                result.kind().as_str(),
                result.reason(),
                start_time.timestamp_micros(),
                end_time.timestamp_micros(),
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn get_context(&self, context_id: i64) -> Result<Context> {
        let cwd: String = self
            .tx
            .query_row(
                "SELECT cwd FROM contexts WHERE context_id = ?1",
                params![context_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::not_found("Context", context_id))?;

        let mut stmt = self
            .tx
            .prepare("SELECT var_name, var_value FROM env_vars WHERE context_id = ?1")?;
        let env = stmt
            .query_map(params![context_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;
        Ok(Context::new(cwd, env))
    }

    pub fn get_action(&self, action_id: i64) -> Result<Action> {
        let context_id: i64 = self
            .tx
            .query_row(
                "SELECT context_id FROM actions WHERE action_id = ?1",
                params![action_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::not_found("Action", action_id))?;
        Ok(Action::new(self.get_context(context_id)?))
    }

    /// The most recently stored action and its id
    pub fn get_latest_action(&self) -> Result<(i64, Action)> {
        let action_id: i64 = self
            .tx
            .query_row(
                "SELECT action_id FROM actions ORDER BY action_id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::NotFound {
                kind: "Action".to_string(),
                id: "latest".to_string(),
            })?;
        Ok((action_id, self.get_action(action_id)?))
    }

    /// A stored test program with its metadata and all its cases
    pub fn get_test_program(&self, test_program_id: i64) -> Result<TestProgram> {
        load_test_program(&self.tx, test_program_id)
    }

    /// Contents of a file attached to a test case, if any was stored
    pub fn get_test_case_file(&self, test_case_id: i64, name: &str) -> Result<Option<Vec<u8>>> {
        load_test_case_file(&self.tx, test_case_id, name)
    }

    /// Results of an action, ordered by program path and then case name
    pub fn get_action_results(&self, action_id: i64) -> Result<ResultsIterator<'_>> {
        ResultsIterator::new(&self.tx, action_id)
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::Store(format!("Path {} is not valid UTF-8", path.display())))
}

fn put_metadata(conn: &Connection, metadata: &Metadata) -> Result<i64> {
    let metadata_id: i64 = conn.query_row(
        "SELECT COALESCE(MAX(metadata_id), 0) + 1 FROM metadatas",
        [],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO metadatas (metadata_id, property_name, property_value) VALUES (?1, ?2, ?3)",
    )?;
    for (name, value) in metadata.to_properties() {
        stmt.execute(params![metadata_id, name, value])?;
    }
    Ok(metadata_id)
}

fn load_metadata(conn: &Connection, metadata_id: i64) -> Result<Metadata> {
    let mut stmt = conn.prepare(
        "SELECT property_name, property_value FROM metadatas WHERE metadata_id = ?1",
    )?;
    let props = stmt
        .query_map(params![metadata_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if props.is_empty() {
        return Err(Error::Integrity(format!(
            "Metadata {} has no properties",
            metadata_id
        )));
    }
    Metadata::from_properties(props.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .map_err(|e| Error::Integrity(format!("Invalid metadata {}: {}", metadata_id, e)))
}

pub(super) fn load_test_program(conn: &Connection, test_program_id: i64) -> Result<TestProgram> {
    let (root, relative_path, test_suite_name, metadata_id, interface) = conn
        .query_row(
            "SELECT root, relative_path, test_suite_name, metadata_id, interface \
             FROM test_programs WHERE test_program_id = ?1",
            params![test_program_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| Error::not_found("Test program", test_program_id))?;
    let metadata = load_metadata(conn, metadata_id)?;

    let mut stmt = conn.prepare(
        "SELECT name, metadata_id FROM test_cases \
         WHERE test_program_id = ?1 ORDER BY test_case_id",
    )?;
    let rows = stmt
        .query_map(params![test_program_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let test_cases = rows
        .into_iter()
        .map(|(name, metadata_id)| Ok(TestCase::new(name, load_metadata(conn, metadata_id)?)))
        .collect::<Result<Vec<_>>>()?;

    debug!(
        "Loaded test program {} with {} test cases",
        test_program_id,
        test_cases.len()
    );
    Ok(TestProgram::with_test_cases(
        interface,
        relative_path,
        root,
        test_suite_name,
        metadata,
        test_cases,
    ))
}

pub(super) fn load_test_case_file(
    conn: &Connection,
    test_case_id: i64,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    let contents = conn
        .query_row(
            "SELECT files.contents FROM test_case_files \
                 JOIN files ON test_case_files.file_id = files.file_id \
             WHERE test_case_files.test_case_id = ?1 AND test_case_files.file_name = ?2",
            params![test_case_id, name],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?;
    Ok(contents)
}
