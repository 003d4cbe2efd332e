//! Debug Command

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::process::ExitCode;

use super::Session;
use crate::output::result_label;
use kyua_engine::drivers::debug_test;
use kyua_engine::TestFilter;

#[derive(Args)]
pub struct DebugArgs {
    /// Where to send the standard output of the test case
    #[arg(long, default_value = "/dev/stdout")]
    pub stdout: PathBuf,

    /// Where to send the standard error of the test case
    #[arg(long, default_value = "/dev/stderr")]
    pub stderr: PathBuf,

    /// Test case to run, as program:case
    pub filter: TestFilter,
}

pub fn execute(args: DebugArgs, session: &Session) -> Result<ExitCode> {
    let result = debug_test::drive(
        &session.kyuafile,
        session.build_root(),
        &args.filter,
        &session.config,
        &session.testers,
        &args.stdout,
        &args.stderr,
    )?;

    match result.reason() {
        Some(reason) => println!("{}  ->  {}: {}", args.filter, result_label(result.kind()), reason),
        None => println!("{}  ->  {}", args.filter, result_label(result.kind())),
    }

    Ok(if result.good() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
