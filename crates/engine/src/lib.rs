//! Kyua Engine
//!
//! Runs test suites through external tester binaries and records the
//! outcome of every test case in a versioned SQLite store.

pub mod config;
pub mod context;
pub mod drivers;
pub mod error;
pub mod filters;
pub mod kyuafile;
pub mod metadata;
pub mod requirements;
pub mod runner;
pub mod signals;
pub mod store;
pub mod test_program;
pub mod test_result;
pub mod tester;

// Re-export commonly used types
pub use config::Config;
pub use context::{Action, Context};
pub use error::{Error, Result};
pub use filters::{TestFilter, TestFilters};
pub use kyuafile::{Kyuafile, SuiteLoader};
pub use metadata::{Metadata, MetadataBuilder};
pub use test_program::{TestCase, TestProgram};
pub use test_result::{ResultType, TestResult};
pub use tester::Testers;

/// Kyua engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
