//! Execution of a single test case
//!
//! Every failure of the test case itself, whether it is a skipped
//! requirement, a missing binary, a crashing tester or a garbled result file,
//! is reported as a [`TestResult`]. Nothing in here returns an error to the
//! caller.

use crate::config::{Config, UnprivilegedUser};
use crate::metadata::{Metadata, UserRequirement};
use crate::requirements::check_reqs;
use crate::test_program::{TestCase, TestProgram};
use crate::test_result::TestResult;
use crate::tester::{Tester, Testers};
use crate::Result;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Callbacks receiving the captured output of a test case
pub trait TestCaseHooks {
    /// Called with the file holding the test's standard output
    fn got_stdout(&mut self, _path: &Path) {}

    /// Called with the file holding the test's standard error
    fn got_stderr(&mut self, _path: &Path) {}
}

/// Hooks that ignore all output
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl TestCaseHooks for NoHooks {}

const RESULT_FILE: &str = "result.txt";
const STDOUT_FILE: &str = "stdout.txt";
const STDERR_FILE: &str = "stderr.txt";

/// Run a test case, capturing its output into temporary files
pub fn run_test_case(
    program: &TestProgram,
    test_case: &TestCase,
    config: &Config,
    testers: &Testers,
    hooks: &mut dyn TestCaseHooks,
) -> TestResult {
    let work_dir = match work_directory() {
        Ok(dir) => dir,
        Err(e) => return unexpected(e),
    };
    let stdout = work_dir.path().join(STDOUT_FILE);
    let stderr = work_dir.path().join(STDERR_FILE);
    run_test_case_safe(
        program,
        test_case,
        config,
        testers,
        hooks,
        work_dir.path(),
        &stdout,
        &stderr,
    )
}

/// Run a test case sending its output to caller-chosen files
pub fn debug_test_case(
    program: &TestProgram,
    test_case: &TestCase,
    config: &Config,
    testers: &Testers,
    hooks: &mut dyn TestCaseHooks,
    stdout: &Path,
    stderr: &Path,
) -> TestResult {
    let work_dir = match work_directory() {
        Ok(dir) => dir,
        Err(e) => return unexpected(e),
    };
    run_test_case_safe(
        program,
        test_case,
        config,
        testers,
        hooks,
        work_dir.path(),
        stdout,
        stderr,
    )
}

#[allow(clippy::too_many_arguments)]
fn run_test_case_safe(
    program: &TestProgram,
    test_case: &TestCase,
    config: &Config,
    testers: &Testers,
    hooks: &mut dyn TestCaseHooks,
    work_dir: &Path,
    stdout: &Path,
    stderr: &Path,
) -> TestResult {
    if let Some(result) = test_case.fake_result() {
        return result.clone();
    }

    if let Some(reason) = check_reqs(test_case.metadata(), config, program.test_suite_name()) {
        debug!("Skipping {}: {}", test_case.name(), reason);
        return TestResult::skipped(reason);
    }

    if !program.absolute_path().exists() {
        return TestResult::broken("Test program does not exist");
    }

    match execute(program, test_case, config, testers, hooks, work_dir, stdout, stderr) {
        Ok(result) => result,
        Err(e) => unexpected(e),
    }
}

#[allow(clippy::too_many_arguments)]
fn execute(
    program: &TestProgram,
    test_case: &TestCase,
    config: &Config,
    testers: &Testers,
    hooks: &mut dyn TestCaseHooks,
    work_dir: &Path,
    stdout: &Path,
    stderr: &Path,
) -> Result<TestResult> {
    let metadata = test_case.metadata();
    let vars = tester_vars(program, metadata, config);
    let user = tester_user(metadata, config);
    let result_file = work_dir.join(RESULT_FILE);

    let outcome = Tester::new(
        testers,
        program.interface(),
        user,
        Some(whole_seconds(metadata.timeout())),
    )
    .and_then(|tester| {
        tester.test(
            &program.absolute_path(),
            test_case.name(),
            &result_file,
            stdout,
            stderr,
            &vars,
        )
    });

    if stdout.exists() {
        hooks.got_stdout(stdout);
    }
    if stderr.exists() {
        hooks.got_stderr(stderr);
    }

    outcome?;
    TestResult::load(&result_file)
}

/// Variables passed to the tester with `-v`
fn tester_vars(
    program: &TestProgram,
    metadata: &Metadata,
    config: &Config,
) -> BTreeMap<String, String> {
    let mut vars = config
        .test_suite(program.test_suite_name())
        .cloned()
        .unwrap_or_default();
    if let Some(user) = &config.unprivileged_user {
        vars.insert("unprivileged-user".to_string(), user.name().to_string());
    }
    vars.insert("has.cleanup".to_string(), metadata.has_cleanup().to_string());
    vars
}

fn tester_user<'a>(metadata: &Metadata, config: &'a Config) -> Option<&'a UnprivilegedUser> {
    match metadata.required_user() {
        UserRequirement::Unprivileged => config.unprivileged_user.as_ref(),
        _ => None,
    }
}

fn whole_seconds(timeout: Duration) -> Duration {
    let extra = u64::from(timeout.subsec_nanos() > 0);
    Duration::from_secs(timeout.as_secs() + extra)
}

fn work_directory() -> std::io::Result<tempfile::TempDir> {
    tempfile::Builder::new().prefix("kyua.").tempdir()
}

fn unexpected(e: impl std::fmt::Display) -> TestResult {
    TestResult::broken(format!("Caught unexpected exception: {}", e))
}
