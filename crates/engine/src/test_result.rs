//! Test case results and the tester result-file format

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Marker used to fold multi-line reasons into a single line
pub const NEWLINE_MARKER: &str = "<<NEWLINE>>";

/// Type of a test case result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Broken,
    ExpectedFailure,
    Failed,
    Passed,
    Skipped,
}

impl ResultType {
    pub const ALL: [ResultType; 5] = [
        ResultType::Broken,
        ResultType::ExpectedFailure,
        ResultType::Failed,
        ResultType::Passed,
        ResultType::Skipped,
    ];

    /// Name used in result files and in the store
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Broken => "broken",
            ResultType::ExpectedFailure => "expected_failure",
            ResultType::Failed => "failed",
            ResultType::Passed => "passed",
            ResultType::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "broken" => Ok(ResultType::Broken),
            "expected_failure" => Ok(ResultType::ExpectedFailure),
            "failed" => Ok(ResultType::Failed),
            "passed" => Ok(ResultType::Passed),
            "skipped" => Ok(ResultType::Skipped),
            other => Err(Error::Format(format!("Unknown result type '{}'", other))),
        }
    }
}

/// Outcome of a single test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    kind: ResultType,
    reason: Option<String>,
}

impl TestResult {
    /// Build a result of the given type.
    ///
    /// Raw newlines and blank lines in the reason are folded into
    /// [`NEWLINE_MARKER`] so that the value survives the result-file format.
    ///
    /// # Panics
    ///
    /// If a passed result is given a reason.
    pub fn new(kind: ResultType, reason: Option<String>) -> Self {
        assert!(
            kind != ResultType::Passed || reason.is_none(),
            "passed results cannot carry a reason"
        );
        Self {
            kind,
            reason: reason.map(|r| normalize_reason(&r)),
        }
    }

    pub fn passed() -> Self {
        Self::new(ResultType::Passed, None)
    }

    pub fn broken(reason: impl Into<String>) -> Self {
        Self::new(ResultType::Broken, Some(reason.into()))
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(ResultType::Failed, Some(reason.into()))
    }

    pub fn expected_failure(reason: impl Into<String>) -> Self {
        Self::new(ResultType::ExpectedFailure, Some(reason.into()))
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::new(ResultType::Skipped, Some(reason.into()))
    }

    pub fn kind(&self) -> ResultType {
        self.kind
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Whether the result counts as a success
    pub fn good(&self) -> bool {
        matches!(
            self.kind,
            ResultType::ExpectedFailure | ResultType::Passed | ResultType::Skipped
        )
    }

    /// Serialize in the result-file format understood by [`TestResult::parse`]
    pub fn format(&self) -> String {
        match &self.reason {
            None => format!("{}\n", self.kind),
            Some(reason) => format!("{}: {}\n", self.kind, reason.replace(NEWLINE_MARKER, "\n")),
        }
    }

    /// Parse the contents of a result file written by a tester
    pub fn parse(contents: &str) -> TestResult {
        let mut lines = contents.lines();
        let status = match lines.next() {
            Some(line) if !line.trim().is_empty() => line,
            _ => return TestResult::broken("Empty result file"),
        };

        if status == "passed" {
            return TestResult::passed();
        }

        let (kind, first) = match status.split_once(": ") {
            Some(parts) => parts,
            None => match status.strip_suffix(':') {
                Some(kind) => (kind, ""),
                None => {
                    return TestResult::broken(format!(
                        "Invalid status line '{}' in result file",
                        status
                    ))
                }
            },
        };

        let kind = match kind.parse::<ResultType>() {
            Ok(kind) => kind,
            Err(_) => return TestResult::broken(format!("Unknown result type '{}'", kind)),
        };
        if kind == ResultType::Passed {
            return TestResult::broken("Passed results cannot have a reason");
        }

        let mut reason = first.to_string();
        for line in lines.take_while(|l| !l.trim().is_empty()) {
            reason.push_str(NEWLINE_MARKER);
            reason.push_str(line);
        }
        TestResult { kind, reason: Some(reason) }
    }

    /// Read and parse a result file from disk
    pub fn load(path: &Path) -> Result<TestResult> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Format(format!("Cannot read result file {}: {}", path.display(), e))
        })?;
        Ok(TestResult::parse(&contents))
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            None => write!(f, "{}", self.kind),
            Some(reason) => write!(f, "{}: {}", self.kind, reason),
        }
    }
}

fn normalize_reason(reason: &str) -> String {
    reason
        .split('\n')
        .flat_map(|line| line.split(NEWLINE_MARKER))
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join(NEWLINE_MARKER)
}
