//! Report Command

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use std::process::ExitCode;

use super::Session;
use crate::output::{print_list, result_label, OutputFormat, TableDisplay};
use kyua_engine::drivers::scan_results::{self, ScanHooks};
use kyua_engine::store::ResultsIterator;
use kyua_engine::{Action, ResultType};

#[derive(Args)]
pub struct ReportArgs {
    /// Action to report on; the most recent one when omitted
    #[arg(long)]
    pub action: Option<i64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Plain)]
    pub format: OutputFormat,

    /// Include captured output of test cases that did not succeed
    #[arg(long)]
    pub show_output: bool,
}

/// One recorded test case result
#[derive(Debug, Serialize)]
pub struct ResultDisplay {
    pub test_case: String,
    pub result: ResultType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub start_time: DateTime<Utc>,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl TableDisplay for ResultDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Test case", "Result", "Reason", "Duration"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.test_case.clone(),
            result_label(self.result),
            self.reason.clone().unwrap_or_default(),
            format!("{:.3}s", self.duration_secs),
        ]
    }
}

struct Collector {
    show_output: bool,
    action: Option<(i64, Action)>,
    results: Vec<ResultDisplay>,
}

impl ScanHooks for Collector {
    fn got_action(&mut self, action_id: i64, action: &Action) -> kyua_engine::Result<()> {
        self.action = Some((action_id, action.clone()));
        Ok(())
    }

    fn got_result(&mut self, iter: &mut ResultsIterator<'_>) -> kyua_engine::Result<()> {
        let program = iter.test_program()?;
        let result = iter.result().clone();
        let (stdout, stderr) = if self.show_output && !result.good() {
            (Some(iter.stdout_contents()?), Some(iter.stderr_contents()?))
        } else {
            (None, None)
        };
        self.results.push(ResultDisplay {
            test_case: format!("{}:{}", program.relative_path().display(), iter.test_case_name()),
            result: result.kind(),
            reason: result.reason().map(str::to_string),
            start_time: iter.start_time(),
            duration_secs: iter.duration().as_secs_f64(),
            stdout,
            stderr,
        });
        Ok(())
    }
}

pub fn execute(args: ReportArgs, session: &Session) -> Result<ExitCode> {
    let mut collector = Collector {
        show_output: args.show_output,
        action: None,
        results: Vec::new(),
    };
    scan_results::drive(
        &session.store_path,
        &session.store_options,
        args.action,
        &mut collector,
    )?;

    if args.format != OutputFormat::Json {
        if let Some((action_id, action)) = &collector.action {
            println!(
                "===> Action {} (run in {})",
                action_id,
                action.context().cwd().display()
            );
        }
    }
    print_list(&collector.results, args.format);
    if args.format != OutputFormat::Json {
        print_output(&collector.results);
        println!("===> {}", summary(&collector.results));
    }

    let all_good = collector.results.iter().all(|r| {
        matches!(
            r.result,
            ResultType::Passed | ResultType::ExpectedFailure | ResultType::Skipped
        )
    });
    Ok(if all_good {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_output(results: &[ResultDisplay]) {
    for result in results {
        for (name, contents) in [("stdout", &result.stdout), ("stderr", &result.stderr)] {
            if let Some(text) = contents.as_deref().filter(|t| !t.is_empty()) {
                println!("===> {} {}", result.test_case, name);
                print!("{}", text);
                if !text.ends_with('\n') {
                    println!();
                }
            }
        }
    }
}

fn summary(results: &[ResultDisplay]) -> String {
    let total_secs = results.iter().fold(0.0, |acc, r| acc + r.duration_secs);
    let parts: Vec<String> = ResultType::ALL
        .iter()
        .filter_map(|kind| {
            let count = results.iter().filter(|r| r.result == *kind).count();
            (count > 0).then(|| format!("{} {}", count, kind))
        })
        .collect();
    format!(
        "{} test cases ({}) in {:.3}s",
        results.len(),
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        },
        total_secs
    )
}
