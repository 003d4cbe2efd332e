//! Runtime context and actions

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Working directory and environment captured when a run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    cwd: PathBuf,
    env: BTreeMap<String, String>,
}

impl Context {
    pub fn new(cwd: impl Into<PathBuf>, env: BTreeMap<String, String>) -> Self {
        Self {
            cwd: cwd.into(),
            env,
        }
    }

    /// Capture the context of the current process.
    ///
    /// Environment variables that are not valid Unicode are skipped.
    pub fn current() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let env = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Ok(Self { cwd, env })
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}

/// One invocation of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    context: Context,
}

impl Action {
    pub fn new(context: Context) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}
