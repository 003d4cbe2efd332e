//! Test suite descriptors
//!
//! A suite is described by a `Kyuafile.toml` at the top of its source tree:
//!
//! ```toml
//! test_suite = "mysuite"
//! include = ["subdir/Kyuafile.toml"]
//!
//! [[test_program]]
//! interface = "atf"
//! path = "foo_test"
//!
//! [[test_program]]
//! interface = "plain"
//! path = "bar_test"
//! test_suite = "other"
//!
//! [test_program.metadata]
//! timeout = 60
//! required_programs = "/bin/ls"
//! ```
//!
//! Program paths are relative to the file that declares them. Included files
//! inherit the suite name of their parent unless they set their own.

use crate::config::Scalar;
use crate::metadata::MetadataBuilder;
use crate::test_program::TestProgram;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Conventional name of the top-level descriptor
pub const KYUAFILE_NAME: &str = "Kyuafile.toml";

/// Source of the test programs making up a suite
pub trait SuiteLoader {
    /// Load every test program, rooted at `build_root` when given
    fn load(&self, build_root: Option<&Path>) -> Result<Vec<TestProgram>>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    test_suite: Option<String>,
    #[serde(default)]
    include: Vec<PathBuf>,
    #[serde(default, rename = "test_program")]
    test_programs: Vec<ProgramEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProgramEntry {
    interface: String,
    path: PathBuf,
    test_suite: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, Scalar>,
}

/// A TOML suite descriptor on disk
#[derive(Debug, Clone)]
pub struct Kyuafile {
    path: PathBuf,
}

impl Kyuafile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing the top-level descriptor
    pub fn source_root(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

impl SuiteLoader for Kyuafile {
    fn load(&self, build_root: Option<&Path>) -> Result<Vec<TestProgram>> {
        let mut state = LoadState {
            root: build_root.unwrap_or_else(|| self.source_root()).to_path_buf(),
            source_root: self.source_root().to_path_buf(),
            stack: Vec::new(),
            programs: Vec::new(),
        };
        state.load_file(&self.path, Path::new(""), None)?;
        debug!(
            "Loaded {} test programs from {}",
            state.programs.len(),
            self.path.display()
        );
        Ok(state.programs)
    }
}

struct LoadState {
    root: PathBuf,
    source_root: PathBuf,
    stack: Vec<PathBuf>,
    programs: Vec<TestProgram>,
}

impl LoadState {
    /// Load one descriptor; `rel_dir` is its directory relative to the top
    fn load_file(&mut self, file: &Path, rel_dir: &Path, parent_suite: Option<&str>) -> Result<()> {
        if self.stack.iter().any(|f| f == file) {
            return Err(Error::load(file, "Include cycle detected"));
        }

        let content = std::fs::read_to_string(file).map_err(|e| Error::load(file, e.to_string()))?;
        let doc: Document = toml::from_str(&content).map_err(|e| Error::load(file, e.to_string()))?;
        let suite = doc.test_suite.as_deref().or(parent_suite);

        self.stack.push(file.to_path_buf());
        for entry in &doc.test_programs {
            let program = self.program(file, rel_dir, suite, entry)?;
            self.programs.push(program);
        }
        for include in &doc.include {
            let rel_include = relative(file, include)?;
            let rel_path = rel_dir.join(&rel_include);
            let include_dir = rel_path.parent().map(Path::to_path_buf).unwrap_or_default();
            let include_file = self.source_root.join(&rel_path);
            self.load_file(&include_file, &include_dir, suite)?;
        }
        self.stack.pop();
        Ok(())
    }

    fn program(
        &self,
        file: &Path,
        rel_dir: &Path,
        suite: Option<&str>,
        entry: &ProgramEntry,
    ) -> Result<TestProgram> {
        let relative_path = rel_dir.join(relative(file, &entry.path)?);
        let suite = entry.test_suite.as_deref().or(suite).ok_or_else(|| {
            Error::load(
                file,
                format!("No test suite defined for {}", relative_path.display()),
            )
        })?;

        if !self.root.join(&relative_path).exists() {
            return Err(Error::load(
                file,
                format!("Non-existent test program '{}'", relative_path.display()),
            ));
        }

        let mut metadata = MetadataBuilder::new();
        for (key, value) in &entry.metadata {
            metadata
                .set_string(key, &value.to_string())
                .map_err(|e| Error::load(file, e.to_string()))?;
        }

        Ok(TestProgram::new(
            &entry.interface,
            relative_path,
            &self.root,
            suite,
            metadata.build(),
        ))
    }
}

/// Normalize a path that must stay below the declaring file's directory
fn relative(file: &Path, path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => out.push(part),
            _ => {
                return Err(Error::load(
                    file,
                    format!("Path '{}' must be relative and below the Kyuafile", path.display()),
                ))
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(Error::load(file, "Empty path"));
    }
    Ok(out)
}
