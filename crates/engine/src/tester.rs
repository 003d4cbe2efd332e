//! Tester protocol client
//!
//! A tester is an external binary named `kyua-<interface>-tester` that knows
//! how to list and run the test cases of programs written against one test
//! interface. Its command line is:
//!
//! ```text
//! tester [-uUID] [-gGID] [-tSECONDS] list <program>
//! tester [-uUID] [-gGID] [-tSECONDS] test [-vKEY=VALUE]... <program> <case> <result-file>
//! ```

use crate::config::{self, UnprivilegedUser};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;
use tracing::debug;

/// Replacement for line breaks in single-line error messages
const NEWLINE_MARKER: &str = "<<NEWLINE>>";

/// Locator for tester binaries with a per-interface path cache.
///
/// Lookups are cached for the lifetime of the value; a new value is needed
/// to notice testers installed after the first lookup.
#[derive(Debug)]
pub struct Testers {
    dir: PathBuf,
    cache: Mutex<HashMap<String, PathBuf>>,
}

impl Testers {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Use the directory named by `KYUA_TESTERSDIR`, or the built-in default
    pub fn from_env() -> Self {
        Self::new(config::testers_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path to the tester for an interface
    pub fn find(&self, interface: &str) -> Result<PathBuf> {
        if let Some(path) = self.cache.lock().get(interface) {
            return Ok(path.clone());
        }

        let path = self.dir.join(format!("kyua-{}-tester", interface));
        if !path.is_file() {
            return Err(Error::Tester(format!(
                "Unknown interface {} (no tester at {})",
                interface,
                path.display()
            )));
        }

        debug!("Found tester for interface {} at {}", interface, path.display());
        self.cache
            .lock()
            .insert(interface.to_string(), path.clone());
        Ok(path)
    }
}

/// Client for one tester binary bound to a set of common arguments
#[derive(Debug, Clone)]
pub struct Tester {
    path: PathBuf,
    common_args: Vec<String>,
}

impl Tester {
    /// Bind a tester for `interface`.
    ///
    /// # Panics
    ///
    /// If `timeout` is not a whole number of seconds.
    pub fn new(
        testers: &Testers,
        interface: &str,
        user: Option<&UnprivilegedUser>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let path = testers.find(interface)?;

        let mut common_args = Vec::new();
        if let Some(user) = user {
            common_args.push(format!("-u{}", user.uid()));
            common_args.push(format!("-g{}", user.gid()));
        }
        if let Some(timeout) = timeout {
            assert_eq!(
                0,
                timeout.subsec_nanos(),
                "tester timeouts must be whole seconds"
            );
            common_args.push(format!("-t{}", timeout.as_secs()));
        }

        Ok(Self { path, common_args })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn common_args(&self) -> &[String] {
        &self.common_args
    }

    /// Ask the tester for the test cases of a program and return its raw listing
    pub fn list(&self, program: &Path) -> Result<String> {
        debug!("Listing test cases of {}", program.display());
        let output = Command::new(&self.path)
            .args(&self.common_args)
            .arg("list")
            .arg(program)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                Error::Tester(format!("Failed to execute {}: {}", self.path.display(), e))
            })?;

        if !output.status.success() {
            return Err(Error::Tester(format!(
                "Tester did not exit cleanly: {}; stdout: {}; stderr: {}",
                describe_status(output.status),
                single_line(&String::from_utf8_lossy(&output.stdout)),
                single_line(&String::from_utf8_lossy(&output.stderr)),
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run one test case, leaving its outcome in `result_file`.
    ///
    /// Exit codes 0 and 1 are both clean terminations; anything else means
    /// the tester itself misbehaved.
    pub fn test(
        &self,
        program: &Path,
        test_case: &str,
        result_file: &Path,
        stdout_file: &Path,
        stderr_file: &Path,
        vars: &BTreeMap<String, String>,
    ) -> Result<()> {
        debug!("Running test case {}:{}", program.display(), test_case);
        let stdout = File::create(stdout_file)?;
        let stderr = File::create(stderr_file)?;

        let status = Command::new(&self.path)
            .args(&self.common_args)
            .arg("test")
            .args(vars.iter().map(|(k, v)| format!("-v{}={}", k, v)))
            .arg(program)
            .arg(test_case)
            .arg(result_file)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .map_err(|e| {
                Error::Tester(format!("Failed to execute {}: {}", self.path.display(), e))
            })?;

        match status.code() {
            Some(0) | Some(1) => Ok(()),
            _ => Err(Error::TesterBug(format!(
                "Tester {}; this is a bug in the tester",
                describe_status(status)
            ))),
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exited with code {}", code),
        (None, Some(signal)) => format!("received signal {}", signal),
        (None, None) => "terminated abnormally".to_string(),
    }
}

fn single_line(text: &str) -> String {
    text.trim_end_matches('\n').replace('\n', NEWLINE_MARKER)
}
