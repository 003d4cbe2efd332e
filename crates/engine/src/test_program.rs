//! Test programs and their test cases
//!
//! A [`TestProgram`] owns its test cases. Cases do not point back at their
//! program; every operation that needs both takes the pair, and the program
//! always outlives the borrowed case.

use crate::metadata::{Metadata, MetadataBuilder};
use crate::test_result::TestResult;
use crate::tester::{Tester, Testers};
use crate::{Error, Result};
use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Name of the synthetic case standing in for a program whose list failed
pub const LIST_FAILURE_CASE: &str = "__test_cases_list__";

/// One test case within a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    name: String,
    metadata: Metadata,
    fake_result: Option<TestResult>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            name: name.into(),
            metadata,
            fake_result: None,
        }
    }

    /// A case that always yields `result` without invoking a tester
    pub fn with_fake_result(name: impl Into<String>, metadata: Metadata, result: TestResult) -> Self {
        Self {
            name: name.into(),
            metadata,
            fake_result: Some(result),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn fake_result(&self) -> Option<&TestResult> {
        self.fake_result.as_ref()
    }
}

/// A test program as declared by the test suite.
///
/// Two programs are equal when their declarations match and, if both have
/// their cases loaded, the case lists hold the same values. Whether the cases
/// were listed yet does not by itself make programs differ: listing needs a
/// tester, which equality has no access to.
#[derive(Debug, Clone)]
pub struct TestProgram {
    interface: String,
    relative_path: PathBuf,
    root: PathBuf,
    test_suite_name: String,
    metadata: Metadata,
    test_cases: OnceCell<Vec<TestCase>>,
}

impl TestProgram {
    /// A program whose cases are listed through its tester on first use
    pub fn new(
        interface: impl Into<String>,
        relative_path: impl Into<PathBuf>,
        root: impl Into<PathBuf>,
        test_suite_name: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            interface: interface.into(),
            relative_path: relative_path.into(),
            root: root.into(),
            test_suite_name: test_suite_name.into(),
            metadata,
            test_cases: OnceCell::new(),
        }
    }

    /// A program with a known list of cases
    pub fn with_test_cases(
        interface: impl Into<String>,
        relative_path: impl Into<PathBuf>,
        root: impl Into<PathBuf>,
        test_suite_name: impl Into<String>,
        metadata: Metadata,
        test_cases: Vec<TestCase>,
    ) -> Self {
        let program = Self::new(interface, relative_path, root, test_suite_name, metadata);
        let _ = program.test_cases.set(test_cases);
        program
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn absolute_path(&self) -> PathBuf {
        self.root.join(&self.relative_path)
    }

    pub fn test_suite_name(&self) -> &str {
        &self.test_suite_name
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Cases of the program, listing them through the tester if not yet known.
    ///
    /// Listing failures never surface as errors: they turn into a single
    /// [`LIST_FAILURE_CASE`] with a broken fake result.
    pub fn test_cases(&self, testers: &Testers) -> &[TestCase] {
        self.test_cases.get_or_init(|| match self.list_test_cases(testers) {
            Ok(cases) => cases,
            Err(e) => {
                warn!(
                    "Failed to list test cases of {}: {}",
                    self.relative_path.display(),
                    e
                );
                vec![TestCase::with_fake_result(
                    LIST_FAILURE_CASE,
                    self.metadata.clone(),
                    TestResult::broken(format!("Failed to load list of test cases: {}", e)),
                )]
            }
        })
    }

    /// Cases of the program if they have already been loaded
    pub fn loaded_test_cases(&self) -> Option<&[TestCase]> {
        self.test_cases.get().map(Vec::as_slice)
    }

    /// Look up a case by name
    pub fn find(&self, testers: &Testers, name: &str) -> Result<&TestCase> {
        self.test_cases(testers)
            .iter()
            .find(|case| case.name() == name)
            .ok_or_else(|| Error::NotFound {
                kind: "Test case".to_string(),
                id: format!("{}:{}", self.relative_path.display(), name),
            })
    }

    fn list_test_cases(&self, testers: &Testers) -> Result<Vec<TestCase>> {
        let tester = Tester::new(testers, &self.interface, None, None)?;
        let output = tester.list(&self.absolute_path())?;
        parse_test_cases(&output, &self.metadata)
    }
}

impl PartialEq for TestProgram {
    fn eq(&self, other: &Self) -> bool {
        let cases_match = match (self.test_cases.get(), other.test_cases.get()) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        };
        self.interface == other.interface
            && self.relative_path == other.relative_path
            && self.root == other.root
            && self.test_suite_name == other.test_suite_name
            && self.metadata == other.metadata
            && cases_match
    }
}

impl Eq for TestProgram {}

/// Parse a tester listing into test cases.
///
/// Each non-blank line has the form `test_case{name="x", key="value", ...}`.
/// Case metadata starts as a copy of `defaults` and listed keys override it.
pub fn parse_test_cases(output: &str, defaults: &Metadata) -> Result<Vec<TestCase>> {
    let mut cases: Vec<TestCase> = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let case = parse_test_case(line.trim(), defaults)?;
        if cases.iter().any(|c| c.name() == case.name()) {
            return Err(Error::Format(format!(
                "Duplicate test case '{}' in list",
                case.name()
            )));
        }
        cases.push(case);
    }
    if cases.is_empty() {
        return Err(Error::Format("Empty test cases list".to_string()));
    }
    Ok(cases)
}

fn parse_test_case(line: &str, defaults: &Metadata) -> Result<TestCase> {
    let body = line
        .strip_prefix("test_case{")
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| Error::Format(format!("Invalid test case definition '{}'", line)))?;

    let mut name = None;
    let mut builder = MetadataBuilder::from_metadata(defaults);
    for (key, value) in parse_properties(body)? {
        if key == "name" {
            name = Some(value);
        } else {
            builder.set_string(&key, &value)?;
        }
    }

    match name {
        Some(name) if !name.is_empty() => Ok(TestCase::new(name, builder.build())),
        _ => Err(Error::Format(format!(
            "Test case definition '{}' lacks a name",
            line
        ))),
    }
}

fn parse_properties(body: &str) -> Result<Vec<(String, String)>> {
    let malformed = || Error::Format(format!("Malformed properties '{}'", body));
    let mut props = Vec::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        for c in chars.by_ref() {
            if c == '=' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_string();
        if key.is_empty() || chars.next() != Some('"') {
            return Err(malformed());
        }

        let mut value = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            match c {
                '\\' => value.push(chars.next().ok_or_else(malformed)?),
                '"' => {
                    closed = true;
                    break;
                }
                other => value.push(other),
            }
        }
        if !closed {
            return Err(malformed());
        }
        props.push((key, value));

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(_) => return Err(malformed()),
        }
    }
    Ok(props)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::UserRequirement;
    use std::time::Duration;

    #[test]
    fn test_parse_single_case() {
        let cases = parse_test_cases("test_case{name=\"main\"}\n", &Metadata::default()).unwrap();
        assert_eq!(1, cases.len());
        assert_eq!("main", cases[0].name());
        assert_eq!(&Metadata::default(), cases[0].metadata());
    }

    #[test]
    fn test_parse_metadata_overrides_defaults() {
        let mut defaults = MetadataBuilder::new();
        defaults
            .set_timeout(Duration::from_secs(60))
            .set_description("program");
        let defaults = defaults.build();

        let output = concat!(
            "test_case{name=\"first\", required_user=\"root\", description=\"say \\\"hi\\\"\"}\n",
            "\n",
            "test_case{name=\"second\", timeout=\"5\", custom.X-foo=\"a, b\"}\n",
        );
        let cases = parse_test_cases(output, &defaults).unwrap();

        assert_eq!(2, cases.len());
        assert_eq!(UserRequirement::Root, cases[0].metadata().required_user());
        assert_eq!("say \"hi\"", cases[0].metadata().description());
        assert_eq!(Duration::from_secs(60), cases[0].metadata().timeout());

        assert_eq!("program", cases[1].metadata().description());
        assert_eq!(Duration::from_secs(5), cases[1].metadata().timeout());
        assert_eq!(Some(&"a, b".to_string()), cases[1].metadata().custom().get("X-foo"));
    }

    #[test]
    fn test_parse_errors() {
        let md = Metadata::default();
        assert!(parse_test_cases("", &md).is_err());
        assert!(parse_test_cases("garbage\n", &md).is_err());
        assert!(parse_test_cases("test_case{timeout=\"3\"}\n", &md).is_err());
        assert!(parse_test_cases("test_case{name=\"a\" timeout=\"3\"}\n", &md).is_err());
        assert!(parse_test_cases("test_case{name=\"a}\n", &md).is_err());
        assert!(parse_test_cases("test_case{name=\"a\", bogus=\"1\"}\n", &md).is_err());
        assert!(parse_test_cases("test_case{name=\"a\"}\ntest_case{name=\"a\"}\n", &md).is_err());
    }

    #[test]
    fn test_absolute_path() {
        let program = TestProgram::new("plain", "dir/prog", "/root", "suite", Metadata::default());
        assert_eq!(PathBuf::from("/root/dir/prog"), program.absolute_path());
    }

    #[test]
    fn test_list_failure_becomes_fake_case() {
        let tmp = tempfile::TempDir::new().unwrap();
        let testers = Testers::new(tmp.path());
        let program = TestProgram::new("missing", "prog", tmp.path(), "suite", Metadata::default());

        let cases = program.test_cases(&testers);
        assert_eq!(1, cases.len());
        assert_eq!(LIST_FAILURE_CASE, cases[0].name());
        let result = cases[0].fake_result().unwrap();
        assert!(result
            .reason()
            .unwrap()
            .starts_with("Failed to load list of test cases"));
    }

    #[test]
    fn test_equality_compares_case_values() {
        let case = TestCase::new("a", Metadata::default());
        let p1 = TestProgram::with_test_cases("plain", "p", "/r", "s", Metadata::default(), vec![case.clone()]);
        let p2 = TestProgram::with_test_cases("plain", "p", "/r", "s", Metadata::default(), vec![case]);
        let p3 = TestProgram::with_test_cases("plain", "p", "/r", "s", Metadata::default(), vec![]);
        assert_eq!(p1, p2);
        assert_ne!(p1, p3);
    }

    #[test]
    fn test_equality_ignores_load_state() {
        let loaded = TestProgram::with_test_cases(
            "plain",
            "p",
            "/r",
            "s",
            Metadata::default(),
            vec![TestCase::new("a", Metadata::default())],
        );
        let lazy = TestProgram::new("plain", "p", "/r", "s", Metadata::default());
        assert_eq!(loaded, lazy);
        assert_eq!(lazy, loaded);
        assert_ne!(TestProgram::new("plain", "q", "/r", "s", Metadata::default()), loaded);

        // Once listed, the cases take part in the comparison.
        let testers = Testers::new("/nonexistent");
        assert_eq!(LIST_FAILURE_CASE, lazy.test_cases(&testers)[0].name());
        assert_ne!(loaded, lazy);
    }

    #[test]
    fn test_find() {
        let program = TestProgram::with_test_cases(
            "plain",
            "p",
            "/r",
            "s",
            Metadata::default(),
            vec![TestCase::new("main", Metadata::default())],
        );
        let testers = Testers::new("/nonexistent");
        assert_eq!("main", program.find(&testers, "main").unwrap().name());
        assert!(matches!(
            program.find(&testers, "other"),
            Err(Error::NotFound { .. })
        ));
    }
}
