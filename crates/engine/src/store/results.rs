//! Replay of the stored results of an action

use super::from_micros;
use super::transaction::{load_test_case_file, load_test_program};
use super::{STDERR_FILE, STDOUT_FILE};
use crate::test_program::TestProgram;
use crate::test_result::{ResultType, TestResult};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::rc::Rc;
use std::time::Duration;

/// Ordering key of a result row; the cursor resumes strictly after it.
#[derive(Debug, Clone)]
struct RowKey {
    absolute_path: String,
    test_program_id: i64,
    test_case_name: String,
    test_case_id: i64,
}

struct ResultRow {
    key: RowKey,
    result: TestResult,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

const NEXT_ROW_QUERY: &str = "\
    SELECT test_programs.absolute_path, test_programs.test_program_id, \
           test_cases.name, test_cases.test_case_id, \
           test_results.result_type, test_results.result_reason, \
           test_results.start_time, test_results.end_time \
    FROM test_programs \
        JOIN test_cases \
            ON test_programs.test_program_id = test_cases.test_program_id \
        JOIN test_results \
            ON test_cases.test_case_id = test_results.test_case_id \
    WHERE test_programs.action_id = ?1 \
        AND (?2 IS NULL \
             OR (test_programs.absolute_path, test_programs.test_program_id, \
                 test_cases.name, test_cases.test_case_id) > (?2, ?3, ?4, ?5)) \
    ORDER BY test_programs.absolute_path, test_programs.test_program_id, \
             test_cases.name, test_cases.test_case_id \
    LIMIT 1";

/// Cursor over the results of one action.
///
/// Rows come ordered by test program path and then test case name. Only the
/// current row is held in memory: every [`ResultsIterator::advance`] asks the
/// database for the row that follows the current one. The test program
/// behind a row and the captured output files are loaded only when asked
/// for; the most recently loaded program is kept so that consecutive rows of
/// the same program share one copy.
///
/// The fallible accessors report an exhausted iterator as an error. The
/// plain getters must not be called once [`ResultsIterator::is_valid`]
/// returns false.
pub struct ResultsIterator<'a> {
    conn: &'a Connection,
    action_id: i64,
    current: Option<ResultRow>,
    last_program: Option<(i64, Rc<TestProgram>)>,
}

impl<'a> ResultsIterator<'a> {
    pub(super) fn new(conn: &'a Connection, action_id: i64) -> Result<Self> {
        let current = fetch_after(conn, action_id, None)?;
        Ok(Self {
            conn,
            action_id,
            current,
            last_program: None,
        })
    }

    /// Whether the iterator points at a row
    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    /// Move to the next row; a no-op once the iterator is exhausted
    pub fn advance(&mut self) -> Result<()> {
        if let Some(row) = self.current.take() {
            self.current = fetch_after(self.conn, self.action_id, Some(&row.key))?;
        }
        Ok(())
    }

    fn current_row(&self) -> Result<&ResultRow> {
        self.current.as_ref().ok_or_else(|| {
            Error::Store(format!(
                "Results of action {} read past the last row",
                self.action_id
            ))
        })
    }

    fn row(&self) -> &ResultRow {
        match &self.current {
            Some(row) => row,
            None => panic!("ResultsIterator accessed past its last row"),
        }
    }

    /// Test program of the current row, with its metadata and cases
    pub fn test_program(&mut self) -> Result<Rc<TestProgram>> {
        let id = self.current_row()?.key.test_program_id;
        if let Some((cached_id, program)) = &self.last_program {
            if *cached_id == id {
                return Ok(Rc::clone(program));
            }
        }
        let program = Rc::new(load_test_program(self.conn, id)?);
        self.last_program = Some((id, Rc::clone(&program)));
        Ok(program)
    }

    /// # Panics
    ///
    /// If the iterator is exhausted, as for the other plain getters.
    pub fn test_program_id(&self) -> i64 {
        self.row().key.test_program_id
    }

    pub fn test_case_id(&self) -> i64 {
        self.row().key.test_case_id
    }

    pub fn test_case_name(&self) -> &str {
        &self.row().key.test_case_name
    }

    pub fn result(&self) -> &TestResult {
        &self.row().result
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.row().start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.row().end_time
    }

    /// Time between start and end; zero if the clock went backwards
    pub fn duration(&self) -> Duration {
        let row = self.row();
        (row.end_time - row.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Captured standard output, empty when nothing was stored
    pub fn stdout_contents(&self) -> Result<String> {
        self.file_contents(STDOUT_FILE)
    }

    /// Captured standard error, empty when nothing was stored
    pub fn stderr_contents(&self) -> Result<String> {
        self.file_contents(STDERR_FILE)
    }

    fn file_contents(&self, name: &str) -> Result<String> {
        let case_id = self.current_row()?.key.test_case_id;
        let contents = load_test_case_file(self.conn, case_id, name)?;
        Ok(contents
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for ResultsIterator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultsIterator")
            .field("action_id", &self.action_id)
            .field("current", &self.current.as_ref().map(|r| &r.key))
            .finish()
    }
}

fn fetch_after(
    conn: &Connection,
    action_id: i64,
    after: Option<&RowKey>,
) -> Result<Option<ResultRow>> {
    let mut stmt = conn.prepare_cached(NEXT_ROW_QUERY)?;
    let raw = stmt
        .query_row(
            params![
                action_id,
                after.map(|k| k.absolute_path.as_str()),
                after.map(|k| k.test_program_id),
                after.map(|k| k.test_case_name.as_str()),
                after.map(|k| k.test_case_id),
            ],
            |row| {
                Ok((
                    RowKey {
                        absolute_path: row.get(0)?,
                        test_program_id: row.get(1)?,
                        test_case_name: row.get(2)?,
                        test_case_id: row.get(3)?,
                    },
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            },
        )
        .optional()?;

    raw.map(|(key, kind, reason, start, end)| -> Result<ResultRow> {
        Ok(ResultRow {
            result: stored_result(key.test_case_id, &kind, reason)?,
            start_time: from_micros(start)?,
            end_time: from_micros(end)?,
            key,
        })
    })
    .transpose()
}

fn stored_result(test_case_id: i64, kind: &str, reason: Option<String>) -> Result<TestResult> {
    let kind: ResultType = kind.parse().map_err(|_| {
        Error::Integrity(format!(
            "Unknown result type '{}' for test case {}",
            kind, test_case_id
        ))
    })?;
    match (kind, reason) {
        (ResultType::Passed, Some(_)) => Err(Error::Integrity(format!(
            "Passed result for test case {} carries a reason",
            test_case_id
        ))),
        (ResultType::Passed, None) => Ok(TestResult::passed()),
        (kind, reason) => Ok(TestResult::new(kind, Some(reason.unwrap_or_default()))),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Backend, OpenMode, StoreOptions, Transaction};
    use super::*;
    use crate::context::Context;
    use crate::metadata::Metadata;
    use crate::test_program::TestCase;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn at(secs: i64, micros: i64) -> DateTime<Utc> {
        Utc.timestamp_micros(secs * 1_000_000 + micros).unwrap()
    }

    fn program(path: &str, cases: &[&str]) -> TestProgram {
        TestProgram::with_test_cases(
            "plain",
            path,
            "/suite",
            "suite",
            Metadata::default(),
            cases
                .iter()
                .map(|name| TestCase::new(*name, Metadata::default()))
                .collect(),
        )
    }

    fn put_program(
        tx: &Transaction<'_>,
        action_id: i64,
        program: &TestProgram,
        results: &[TestResult],
        start: i64,
    ) {
        let program_id = tx.put_test_program(program, action_id).unwrap();
        let cases = program.loaded_test_cases().unwrap();
        for (offset, (case, result)) in cases.iter().zip(results).enumerate() {
            let case_id = tx.put_test_case(case, program_id).unwrap();
            let begin = start + offset as i64;
            tx.put_result(result, case_id, &at(begin, 0), &at(begin, 250))
                .unwrap();
        }
    }

    #[test]
    fn test_results_are_ordered_and_complete() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut backend =
            Backend::open(tmp.path().join("s.db"), OpenMode::Create, &StoreOptions::default())
                .unwrap();
        let tx = backend.start().unwrap();
        let context_id = tx.put_context(&Context::new("/", BTreeMap::new())).unwrap();
        let action_id = tx.put_action(context_id).unwrap();
        let other_action = tx.put_action(context_id).unwrap();

        let second = program("b_prog", &["one"]);
        let first = program("a_prog", &["zz", "aa"]);
        put_program(&tx, action_id, &second, &[TestResult::failed("oops")], 100);
        put_program(
            &tx,
            action_id,
            &first,
            &[TestResult::passed(), TestResult::skipped("no")],
            200,
        );
        put_program(&tx, other_action, &program("c_prog", &["x"]), &[TestResult::passed()], 300);

        let mut iter = tx.get_action_results(action_id).unwrap();
        let mut seen = Vec::new();
        while iter.is_valid() {
            let program = iter.test_program().unwrap();
            seen.push((
                program.relative_path().display().to_string(),
                iter.test_case_name().to_string(),
                iter.result().clone(),
                iter.duration(),
            ));
            iter.advance().unwrap();
        }
        assert!(!iter.is_valid());
        iter.advance().unwrap();
        assert!(!iter.is_valid());

        assert_eq!(
            vec![
                ("a_prog".to_string(), "aa".to_string(), TestResult::skipped("no"), Duration::from_micros(250)),
                ("a_prog".to_string(), "zz".to_string(), TestResult::passed(), Duration::from_micros(250)),
                ("b_prog".to_string(), "one".to_string(), TestResult::failed("oops"), Duration::from_micros(250)),
            ],
            seen
        );
    }

    #[test]
    fn test_program_cache_is_reused() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut backend =
            Backend::open(tmp.path().join("s.db"), OpenMode::Create, &StoreOptions::default())
                .unwrap();
        let tx = backend.start().unwrap();
        let context_id = tx.put_context(&Context::new("/", BTreeMap::new())).unwrap();
        let action_id = tx.put_action(context_id).unwrap();
        put_program(
            &tx,
            action_id,
            &program("prog", &["a", "b"]),
            &[TestResult::passed(), TestResult::passed()],
            0,
        );

        let mut iter = tx.get_action_results(action_id).unwrap();
        let first = iter.test_program().unwrap();
        iter.advance().unwrap();
        let second = iter.test_program().unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_empty_action() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut backend =
            Backend::open(tmp.path().join("s.db"), OpenMode::Create, &StoreOptions::default())
                .unwrap();
        let tx = backend.start().unwrap();
        let iter = tx.get_action_results(1).unwrap();
        assert!(!iter.is_valid());
    }

    #[test]
    #[should_panic(expected = "past its last row")]
    fn test_access_after_end_panics() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut backend =
            Backend::open(tmp.path().join("s.db"), OpenMode::Create, &StoreOptions::default())
                .unwrap();
        let tx = backend.start().unwrap();
        let iter = tx.get_action_results(1).unwrap();
        iter.test_case_name();
    }

    #[test]
    fn test_fallible_accessors_report_exhaustion() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut backend =
            Backend::open(tmp.path().join("s.db"), OpenMode::Create, &StoreOptions::default())
                .unwrap();
        let tx = backend.start().unwrap();
        let mut iter = tx.get_action_results(7).unwrap();
        assert!(matches!(iter.test_program(), Err(Error::Store(_))));
        assert!(matches!(iter.stdout_contents(), Err(Error::Store(_))));
        assert!(matches!(iter.stderr_contents(), Err(Error::Store(_))));
    }

    #[test]
    fn test_rows_are_fetched_on_advance() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut backend =
            Backend::open(tmp.path().join("s.db"), OpenMode::Create, &StoreOptions::default())
                .unwrap();
        let tx = backend.start().unwrap();
        let context_id = tx.put_context(&Context::new("/", BTreeMap::new())).unwrap();
        let action_id = tx.put_action(context_id).unwrap();
        put_program(&tx, action_id, &program("a_prog", &["x"]), &[TestResult::passed()], 0);

        let mut iter = tx.get_action_results(action_id).unwrap();
        assert_eq!("x", iter.test_case_name());

        // Rows written behind the cursor's position are picked up by the next step.
        put_program(&tx, action_id, &program("b_prog", &["y"]), &[TestResult::passed()], 10);
        iter.advance().unwrap();
        assert!(iter.is_valid());
        assert_eq!("y", iter.test_case_name());
        iter.advance().unwrap();
        assert!(!iter.is_valid());
    }

    #[test]
    fn test_same_path_programs_stay_grouped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut backend =
            Backend::open(tmp.path().join("s.db"), OpenMode::Create, &StoreOptions::default())
                .unwrap();
        let tx = backend.start().unwrap();
        let context_id = tx.put_context(&Context::new("/", BTreeMap::new())).unwrap();
        let action_id = tx.put_action(context_id).unwrap();
        let results = [TestResult::passed(), TestResult::passed()];
        put_program(&tx, action_id, &program("prog", &["b", "a"]), &results, 0);
        put_program(&tx, action_id, &program("prog", &["a", "b"]), &results, 10);

        let mut iter = tx.get_action_results(action_id).unwrap();
        let mut seen = Vec::new();
        while iter.is_valid() {
            seen.push((iter.test_program_id(), iter.test_case_name().to_string()));
            iter.advance().unwrap();
        }
        assert_eq!(4, seen.len());
        assert_eq!(seen[0].0, seen[1].0);
        assert_eq!(seen[2].0, seen[3].0);
        assert_ne!(seen[0].0, seen[2].0);
        assert_eq!(
            vec!["a", "b", "a", "b"],
            seen.iter().map(|(_, name)| name.as_str()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_stored_result_validation() {
        assert_eq!(TestResult::passed(), stored_result(1, "passed", None).unwrap());
        assert_eq!(
            TestResult::broken("x"),
            stored_result(1, "broken", Some("x".to_string())).unwrap()
        );
        assert!(matches!(
            stored_result(1, "passed", Some("x".to_string())),
            Err(Error::Integrity(_))
        ));
        assert!(matches!(stored_result(1, "exploded", None), Err(Error::Integrity(_))));
    }
}
