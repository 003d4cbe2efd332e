//! Selection of test programs and test cases
//!
//! A filter is either `path`, selecting the program at that relative path and
//! every program below it when it names a directory, or `path:case`, selecting
//! a single test case.

use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// A single program or test case selector
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestFilter {
    program: PathBuf,
    test_case: Option<String>,
}

impl TestFilter {
    pub fn new(program: impl AsRef<Path>, test_case: Option<&str>) -> Result<Self> {
        let raw = program.as_ref();
        if raw.is_absolute() {
            return Err(Error::Format(format!(
                "Invalid filter '{}': program path must be relative",
                raw.display()
            )));
        }

        let mut program = PathBuf::new();
        for component in raw.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => program.push(part),
                _ => {
                    return Err(Error::Format(format!(
                        "Invalid filter '{}': path must not leave the suite",
                        raw.display()
                    )))
                }
            }
        }
        if program.as_os_str().is_empty() {
            return Err(Error::Format("Invalid filter: program path is empty".to_string()));
        }

        if let Some(case) = test_case {
            if case.is_empty() {
                return Err(Error::Format(format!(
                    "Invalid filter '{}:': test case name is empty",
                    program.display()
                )));
            }
        }

        Ok(Self {
            program,
            test_case: test_case.map(String::from),
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn test_case(&self) -> Option<&str> {
        self.test_case.as_deref()
    }

    /// Whether any case of the program at `path` can match
    pub fn matches_test_program(&self, path: &Path) -> bool {
        match self.test_case {
            Some(_) => path == self.program,
            None => path.starts_with(&self.program),
        }
    }

    pub fn matches_test_case(&self, path: &Path, test_case: &str) -> bool {
        match &self.test_case {
            Some(name) => path == self.program && name == test_case,
            None => self.matches_test_program(path),
        }
    }

    /// Whether everything `other` selects is also selected by this filter
    pub fn contains(&self, other: &TestFilter) -> bool {
        match &self.test_case {
            Some(_) => self == other,
            None => other.program.starts_with(&self.program),
        }
    }
}

impl FromStr for TestFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((program, case)) => Self::new(program, Some(case)),
            None => Self::new(s, None),
        }
    }
}

impl fmt::Display for TestFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.test_case {
            Some(case) => write!(f, "{}:{}", self.program.display(), case),
            None => write!(f, "{}", self.program.display()),
        }
    }
}

/// A set of disjoint filters that remembers which ones matched something
#[derive(Debug, Clone, Default)]
pub struct TestFilters {
    filters: BTreeSet<TestFilter>,
    used: BTreeSet<TestFilter>,
}

impl TestFilters {
    /// Build a filter set; an empty set selects everything
    pub fn new(filters: BTreeSet<TestFilter>) -> Result<Self> {
        for a in &filters {
            for b in &filters {
                if a != b && a.contains(b) {
                    return Err(Error::Format(format!(
                        "Filters '{}' and '{}' are not disjoint",
                        a, b
                    )));
                }
            }
        }
        Ok(Self {
            filters,
            used: BTreeSet::new(),
        })
    }

    /// Whether the program may contain selected cases
    pub fn match_test_program(&self, path: &Path) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.matches_test_program(path))
    }

    /// Whether a case is selected, marking the selecting filter as used
    pub fn match_test_case(&mut self, path: &Path, test_case: &str) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        match self
            .filters
            .iter()
            .find(|f| f.matches_test_case(path, test_case))
        {
            Some(filter) => {
                self.used.insert(filter.clone());
                true
            }
            None => false,
        }
    }

    /// Filters that have not matched any test case so far
    pub fn unused(&self) -> BTreeSet<TestFilter> {
        self.filters.difference(&self.used).cloned().collect()
    }
}

/// Parse a list of command-line filters
pub fn parse_filters<I, S>(args: I) -> Result<BTreeSet<TestFilter>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter().map(|arg| arg.as_ref().parse()).collect()
}
