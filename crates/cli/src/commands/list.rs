//! List Command

use anyhow::Result;
use clap::Args;
use std::process::ExitCode;

use super::Session;
use crate::output::print_warning;
use kyua_engine::drivers::list_tests::{self, ListHooks};
use kyua_engine::filters::parse_filters;
use kyua_engine::{TestCase, TestProgram};

#[derive(Args)]
pub struct ListArgs {
    /// Show the metadata of every test case
    #[arg(long)]
    pub metadata: bool,

    /// Test filters (program or program:case); all tests when empty
    pub filters: Vec<String>,
}

struct Printer {
    metadata: bool,
    lines: Vec<String>,
}

impl ListHooks for Printer {
    fn got_test_case(&mut self, program: &TestProgram, test_case: &TestCase) {
        self.lines.push(format!(
            "{}:{}",
            program.relative_path().display(),
            test_case.name()
        ));
        if self.metadata {
            self.lines
                .push(format!("    test_suite_name = {}", program.test_suite_name()));
            for (key, value) in test_case.metadata().to_properties() {
                self.lines.push(format!("    {} = {}", key, value));
            }
        }
    }
}

pub fn execute(args: ListArgs, session: &Session) -> Result<ExitCode> {
    let filters = parse_filters(&args.filters)?;
    let mut printer = Printer {
        metadata: args.metadata,
        lines: Vec::new(),
    };
    let unused = list_tests::drive(
        &session.kyuafile,
        session.build_root(),
        filters,
        &session.testers,
        &mut printer,
    )?;

    for line in &printer.lines {
        println!("{}", line);
    }
    for filter in &unused {
        print_warning(&format!("No test cases matched by the filter '{}'", filter));
    }

    Ok(if unused.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
