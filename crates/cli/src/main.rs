//! Kyua CLI - Main Entry Point
//!
//! Runs test suites described by `Kyuafile.toml` files, records their
//! results in a SQLite store and reports on recorded runs.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod output;

use commands::{db_migrate, debug, list, report, test, Session};
use kyua_engine::config::Override;
use kyua_engine::kyuafile::KYUAFILE_NAME;

/// Kyua - Test Suite Runner
#[derive(Parser)]
#[command(name = "kyua")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Runtime configuration file [default: ~/.kyua/kyua.conf]
    #[arg(short, long, global = true, env = "KYUA_CONFIG")]
    config: Option<PathBuf>,

    /// Override a configuration setting (key=value)
    #[arg(long = "variable", global = true, value_parser = parse_override)]
    variables: Vec<Override>,

    /// Results store [default: ~/.kyua/store.db]
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// Test suite descriptor
    #[arg(short, long, default_value = KYUAFILE_NAME, global = true)]
    kyuafile: PathBuf,

    /// Directory holding the built test programs
    #[arg(long, global = true)]
    build_root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests and record their results
    Test(test::TestArgs),

    /// List test cases without running them
    List(list::ListArgs),

    /// Run a single test case with its output on the terminal
    Debug(debug::DebugArgs),

    /// Show the results of a recorded run
    Report(report::ReportArgs),

    /// Upgrade a results store to the current schema
    DbMigrate,
}

fn parse_override(s: &str) -> Result<Override, String> {
    s.parse().map_err(|e: kyua_engine::Error| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let session = Session::new(
        cli.config,
        &cli.variables,
        cli.store,
        cli.kyuafile,
        cli.build_root,
    )?;

    match cli.command {
        Commands::Test(args) => test::execute(args, &session),
        Commands::List(args) => list::execute(args, &session),
        Commands::Debug(args) => debug::execute(args, &session),
        Commands::Report(args) => report::execute(args, &session),
        Commands::DbMigrate => db_migrate::execute(&session),
    }
}
