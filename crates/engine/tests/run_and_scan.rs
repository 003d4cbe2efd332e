//! Running a suite through mock testers and replaying the stored action

mod common;

use common::{Fixture, STANDARD_PROGRAM, UNLISTABLE_PROGRAM};
use kyua_engine::drivers::list_tests::{self, ListHooks};
use kyua_engine::drivers::run_tests::{self, RunHooks};
use kyua_engine::drivers::scan_results::{self, ScanHooks};
use kyua_engine::filters::parse_filters;
use kyua_engine::store::{ResultsIterator, StoreOptions, STDOUT_FILE};
use kyua_engine::test_program::LIST_FAILURE_CASE;
use kyua_engine::{Action, Config, ResultType, TestCase, TestProgram, TestResult};
use std::time::Duration;

const KYUAFILE: &str = r#"
test_suite = "suite"

[[test_program]]
interface = "mock"
path = "prog"

[[test_program]]
interface = "mock"
path = "sub/other"
"#;

#[derive(Default)]
struct Progress {
    results: Vec<(String, ResultType)>,
}

impl RunHooks for Progress {
    fn got_result(
        &mut self,
        program: &TestProgram,
        test_case: &TestCase,
        result: &TestResult,
        _duration: Duration,
    ) {
        self.results.push((
            format!("{}:{}", program.relative_path().display(), test_case.name()),
            result.kind(),
        ));
    }
}

#[derive(Debug, PartialEq)]
struct Replayed {
    id: String,
    result: TestResult,
    stdout: String,
    stderr: String,
}

#[derive(Default)]
struct Replay {
    action: Option<Action>,
    rows: Vec<Replayed>,
}

impl ScanHooks for Replay {
    fn got_action(&mut self, _action_id: i64, action: &Action) -> kyua_engine::Result<()> {
        self.action = Some(action.clone());
        Ok(())
    }

    fn got_result(&mut self, iter: &mut ResultsIterator<'_>) -> kyua_engine::Result<()> {
        let program = iter.test_program()?;
        assert_eq!("suite", program.test_suite_name());
        assert!(iter.start_time() <= iter.end_time());
        self.rows.push(Replayed {
            id: format!("{}:{}", program.relative_path().display(), iter.test_case_name()),
            result: iter.result().clone(),
            stdout: iter.stdout_contents()?,
            stderr: iter.stderr_contents()?,
        });
        Ok(())
    }
}

fn prepare() -> Fixture {
    let fixture = Fixture::new();
    fixture.add_program("prog", STANDARD_PROGRAM);
    fixture.add_program("sub/other", UNLISTABLE_PROGRAM);
    fixture
}

fn run(fixture: &Fixture, filters: &[&str], config: &Config) -> (run_tests::RunOutcome, Progress) {
    let kyuafile = fixture.kyuafile(KYUAFILE);
    let mut progress = Progress::default();
    let outcome = run_tests::drive(
        &kyuafile,
        None,
        &fixture.store_path(),
        &StoreOptions::default(),
        parse_filters(filters.iter().copied()).unwrap(),
        config,
        &fixture.testers(),
        &mut progress,
    )
    .unwrap();
    (outcome, progress)
}

fn replay(fixture: &Fixture, action_id: Option<i64>) -> Replay {
    let mut replay = Replay::default();
    scan_results::drive(
        &fixture.store_path(),
        &StoreOptions::default(),
        action_id,
        &mut replay,
    )
    .unwrap();
    replay
}

#[test]
fn test_run_then_scan() {
    let fixture = prepare();
    let (outcome, progress) = run(&fixture, &[], &Config::default());
    assert!(outcome.unused_filters.is_empty());

    let reported: Vec<(&str, ResultType)> = progress
        .results
        .iter()
        .map(|(id, kind)| (id.as_str(), *kind))
        .collect();
    let list_failure = format!("sub/other:{}", LIST_FAILURE_CASE);
    assert_eq!(
        vec![
            ("prog:pass", ResultType::Passed),
            ("prog:fail", ResultType::Failed),
            ("prog:crash", ResultType::Broken),
            ("prog:vars", ResultType::Passed),
            (list_failure.as_str(), ResultType::Broken),
        ],
        reported
    );

    let replay = replay(&fixture, None);
    let action = replay.action.unwrap();
    assert_eq!(std::env::current_dir().unwrap(), action.context().cwd());

    let ids: Vec<&str> = replay.rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(
        vec![
            "prog:crash",
            "prog:fail",
            "prog:pass",
            "prog:vars",
            list_failure.as_str()
        ],
        ids
    );

    assert_eq!(
        Replayed {
            id: "prog:pass".to_string(),
            result: TestResult::passed(),
            stdout: "stdout of pass\n".to_string(),
            stderr: String::new(),
        },
        replay.rows[2]
    );
    assert_eq!(
        Replayed {
            id: "prog:fail".to_string(),
            result: TestResult::failed("Fails on purpose"),
            stdout: String::new(),
            stderr: "stderr of fail\n".to_string(),
        },
        replay.rows[1]
    );
    assert_eq!("before crash\n", replay.rows[0].stdout);
    assert!(replay.rows[0]
        .result
        .reason()
        .unwrap()
        .contains("signal 6"));
    assert!(replay.rows[4]
        .result
        .reason()
        .unwrap()
        .contains("cannot list"));
}

#[test]
fn test_empty_output_is_not_stored() {
    let fixture = prepare();
    let (outcome, _) = run(&fixture, &["prog:pass"], &Config::default());

    let conn = rusqlite::Connection::open(fixture.store_path()).unwrap();
    let names: Vec<String> = conn
        .prepare(
            "SELECT file_name FROM test_case_files \
             JOIN test_cases ON test_cases.test_case_id = test_case_files.test_case_id \
             JOIN test_programs ON test_programs.test_program_id = test_cases.test_program_id \
             WHERE test_programs.action_id = ?1",
        )
        .unwrap()
        .query_map([outcome.action_id], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    assert_eq!(vec![STDOUT_FILE.to_string()], names);
}

#[test]
fn test_unused_filters_and_commit() {
    let fixture = prepare();
    let (outcome, progress) = run(
        &fixture,
        &["prog:pass", "sub/other:missing", "nothing"],
        &Config::default(),
    );

    let unused: Vec<String> = outcome.unused_filters.iter().map(|f| f.to_string()).collect();
    assert_eq!(vec!["nothing", "sub/other:missing"], unused);
    assert_eq!(1, progress.results.len());

    let replay = replay(&fixture, Some(outcome.action_id));
    assert_eq!(1, replay.rows.len());
    assert_eq!("prog:pass", replay.rows[0].id);
}

#[test]
fn test_suite_configuration_reaches_tests() {
    let fixture = prepare();
    let mut config = Config::default();
    config.set("test_suites.suite.color", "blue").unwrap();

    run(&fixture, &["prog:vars"], &config);
    let replay = replay(&fixture, None);
    assert_eq!(1, replay.rows.len());
    assert!(replay.rows[0].stdout.contains("color=blue"));
    assert!(replay.rows[0].stdout.contains("has.cleanup=true"));
}

#[test]
fn test_consecutive_runs_create_separate_actions() {
    let fixture = prepare();
    let (first, _) = run(&fixture, &["prog:pass"], &Config::default());
    let (second, _) = run(&fixture, &["prog:fail"], &Config::default());
    assert!(second.action_id > first.action_id);

    assert_eq!("prog:fail", replay(&fixture, None).rows[0].id);
    assert_eq!("prog:pass", replay(&fixture, Some(first.action_id)).rows[0].id);
}

#[test]
fn test_list_through_testers() {
    struct Names(Vec<String>);

    impl ListHooks for Names {
        fn got_test_case(&mut self, program: &TestProgram, test_case: &TestCase) {
            self.0
                .push(format!("{}:{}", program.relative_path().display(), test_case.name()));
        }
    }

    let fixture = prepare();
    let kyuafile = fixture.kyuafile(KYUAFILE);
    let mut names = Names(Vec::new());
    let unused = list_tests::drive(
        &kyuafile,
        None,
        parse_filters(["prog"]).unwrap(),
        &fixture.testers(),
        &mut names,
    )
    .unwrap();
    assert!(unused.is_empty());
    assert_eq!(vec!["prog:pass", "prog:fail", "prog:crash", "prog:vars"], names.0);
    assert!(!fixture.store_path().exists());
}
