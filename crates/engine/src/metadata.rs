//! Test program and test case metadata
//!
//! Metadata is an immutable record of requirements and properties. It is
//! assembled with a [`MetadataBuilder`], which can start empty or from a copy
//! of an existing record (test cases inherit their program's metadata this
//! way), and is consumed when the record is built.
//!
//! For storage and for the tester listing protocol, metadata converts to and
//! from a flat map of string properties.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Timeout applied when metadata does not specify one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Prefix of user-defined property names
pub const CUSTOM_PREFIX: &str = "custom.";

/// Names of the fixed properties, in storage order
pub const PROPERTY_NAMES: [&str; 10] = [
    "allowed_architectures",
    "allowed_platforms",
    "description",
    "has_cleanup",
    "required_configs",
    "required_files",
    "required_memory",
    "required_programs",
    "required_user",
    "timeout",
];

/// User a test needs to run as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRequirement {
    #[default]
    Any,
    Root,
    Unprivileged,
}

impl UserRequirement {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRequirement::Any => "",
            UserRequirement::Root => "root",
            UserRequirement::Unprivileged => "unprivileged",
        }
    }
}

impl FromStr for UserRequirement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(UserRequirement::Any),
            "root" => Ok(UserRequirement::Root),
            "unprivileged" => Ok(UserRequirement::Unprivileged),
            other => Err(Error::Format(format!("Invalid required user '{}'", other))),
        }
    }
}

impl fmt::Display for UserRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable metadata record.
///
/// Only [`MetadataBuilder`] creates one, so every value it holds survives a
/// trip through [`Metadata::to_properties`] unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    allowed_architectures: BTreeSet<String>,
    allowed_platforms: BTreeSet<String>,
    custom: BTreeMap<String, String>,
    description: String,
    has_cleanup: bool,
    required_configs: BTreeSet<String>,
    required_files: BTreeSet<PathBuf>,
    required_memory: u64,
    required_programs: BTreeSet<PathBuf>,
    required_user: UserRequirement,
    timeout: Duration,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            allowed_architectures: BTreeSet::new(),
            allowed_platforms: BTreeSet::new(),
            custom: BTreeMap::new(),
            description: String::new(),
            has_cleanup: false,
            required_configs: BTreeSet::new(),
            required_files: BTreeSet::new(),
            required_memory: 0,
            required_programs: BTreeSet::new(),
            required_user: UserRequirement::Any,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Metadata {
    pub fn allowed_architectures(&self) -> &BTreeSet<String> {
        &self.allowed_architectures
    }

    pub fn allowed_platforms(&self) -> &BTreeSet<String> {
        &self.allowed_platforms
    }

    pub fn custom(&self) -> &BTreeMap<String, String> {
        &self.custom
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn has_cleanup(&self) -> bool {
        self.has_cleanup
    }

    pub fn required_configs(&self) -> &BTreeSet<String> {
        &self.required_configs
    }

    pub fn required_files(&self) -> &BTreeSet<PathBuf> {
        &self.required_files
    }

    /// Required physical memory in bytes
    pub fn required_memory(&self) -> u64 {
        self.required_memory
    }

    pub fn required_programs(&self) -> &BTreeSet<PathBuf> {
        &self.required_programs
    }

    pub fn required_user(&self) -> UserRequirement {
        self.required_user
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Flatten into string properties; custom entries carry [`CUSTOM_PREFIX`]
    pub fn to_properties(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        props.insert(
            "allowed_architectures".to_string(),
            join_words(self.allowed_architectures.iter().map(String::as_str)),
        );
        props.insert(
            "allowed_platforms".to_string(),
            join_words(self.allowed_platforms.iter().map(String::as_str)),
        );
        for (key, value) in &self.custom {
            props.insert(format!("{}{}", CUSTOM_PREFIX, key), value.clone());
        }
        props.insert("description".to_string(), self.description.clone());
        props.insert("has_cleanup".to_string(), self.has_cleanup.to_string());
        props.insert(
            "required_configs".to_string(),
            join_words(self.required_configs.iter().map(String::as_str)),
        );
        props.insert(
            "required_files".to_string(),
            join_paths(&self.required_files),
        );
        props.insert(
            "required_memory".to_string(),
            self.required_memory.to_string(),
        );
        props.insert(
            "required_programs".to_string(),
            join_paths(&self.required_programs),
        );
        props.insert(
            "required_user".to_string(),
            self.required_user.as_str().to_string(),
        );
        props.insert(
            "timeout".to_string(),
            self.timeout.as_secs().to_string(),
        );
        props
    }

    /// Rebuild metadata from string properties
    pub fn from_properties<'a, I>(props: I) -> Result<Metadata>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut builder = MetadataBuilder::new();
        for (key, value) in props {
            builder.set_string(key, value)?;
        }
        Ok(builder.build())
    }
}

/// Incremental constructor for [`Metadata`]
#[derive(Debug, Clone, Default)]
pub struct MetadataBuilder {
    metadata: Metadata,
}

impl MetadataBuilder {
    /// Start from default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a copy of an existing record
    pub fn from_metadata(base: &Metadata) -> Self {
        Self {
            metadata: base.clone(),
        }
    }

    pub fn add_allowed_architecture(&mut self, arch: impl Into<String>) -> &mut Self {
        self.metadata.allowed_architectures.insert(arch.into());
        self
    }

    pub fn add_allowed_platform(&mut self, platform: impl Into<String>) -> &mut Self {
        self.metadata.allowed_platforms.insert(platform.into());
        self
    }

    pub fn add_custom(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.metadata.custom.insert(key.into(), value.into());
        self
    }

    pub fn add_required_config(&mut self, name: impl Into<String>) -> &mut Self {
        self.metadata.required_configs.insert(name.into());
        self
    }

    /// Required files must be absolute paths
    pub fn add_required_file(&mut self, path: impl Into<PathBuf>) -> Result<&mut Self> {
        let path = path.into();
        check_utf8("file", &path)?;
        if !path.is_absolute() {
            return Err(Error::Format(format!(
                "Required file '{}' must be an absolute path",
                path.display()
            )));
        }
        self.metadata.required_files.insert(path);
        Ok(self)
    }

    /// Required programs are absolute paths or bare names looked up in PATH
    pub fn add_required_program(&mut self, path: impl Into<PathBuf>) -> Result<&mut Self> {
        let path = path.into();
        check_utf8("program", &path)?;
        if !path.is_absolute() && path.components().count() != 1 {
            return Err(Error::Format(format!(
                "Relative path '{}' not allowed as a required program",
                path.display()
            )));
        }
        self.metadata.required_programs.insert(path);
        Ok(self)
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.metadata.description = description.into();
        self
    }

    pub fn set_has_cleanup(&mut self, has_cleanup: bool) -> &mut Self {
        self.metadata.has_cleanup = has_cleanup;
        self
    }

    pub fn set_required_memory(&mut self, bytes: u64) -> &mut Self {
        self.metadata.required_memory = bytes;
        self
    }

    pub fn set_required_user(&mut self, user: UserRequirement) -> &mut Self {
        self.metadata.required_user = user;
        self
    }

    /// Timeouts are kept in whole seconds; a fractional value rounds up.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        let extra = u64::from(timeout.subsec_nanos() > 0);
        self.metadata.timeout = Duration::from_secs(timeout.as_secs().saturating_add(extra));
        self
    }

    /// Set a property from its string form.
    ///
    /// Set-valued properties replace any previous contents.
    pub fn set_string(&mut self, key: &str, value: &str) -> Result<&mut Self> {
        if let Some(name) = key.strip_prefix(CUSTOM_PREFIX) {
            if name.is_empty() {
                return Err(Error::Format("Empty custom property name".to_string()));
            }
            return Ok(self.add_custom(name, value));
        }

        match key {
            "allowed_architectures" => {
                self.metadata.allowed_architectures = split_words(value).map(String::from).collect();
            }
            "allowed_platforms" => {
                self.metadata.allowed_platforms = split_words(value).map(String::from).collect();
            }
            "description" => {
                self.metadata.description = value.to_string();
            }
            "has_cleanup" => {
                self.metadata.has_cleanup = parse_bool(key, value)?;
            }
            "required_configs" => {
                self.metadata.required_configs = split_words(value).map(String::from).collect();
            }
            "required_files" => {
                self.metadata.required_files.clear();
                for word in split_words(value) {
                    self.add_required_file(word)?;
                }
            }
            "required_memory" => {
                self.metadata.required_memory = parse_bytes(value)?;
            }
            "required_programs" => {
                self.metadata.required_programs.clear();
                for word in split_words(value) {
                    self.add_required_program(word)?;
                }
            }
            "required_user" => {
                self.metadata.required_user = value.parse()?;
            }
            "timeout" => {
                let secs = value.trim().parse::<u64>().map_err(|_| {
                    Error::Format(format!("Invalid timeout '{}'; must be whole seconds", value))
                })?;
                self.metadata.timeout = Duration::from_secs(secs);
            }
            other => {
                return Err(Error::Format(format!("Unknown metadata property '{}'", other)));
            }
        }
        Ok(self)
    }

    /// Finish the record
    pub fn build(self) -> Metadata {
        self.metadata
    }
}

/// Parse a byte count with an optional K, M, G or T suffix
pub fn parse_bytes(value: &str) -> Result<u64> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }
    let (digits, multiplier) = match value.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&value[..value.len() - 1], 1u64 << 10),
        Some('M') => (&value[..value.len() - 1], 1u64 << 20),
        Some('G') => (&value[..value.len() - 1], 1u64 << 30),
        Some('T') => (&value[..value.len() - 1], 1u64 << 40),
        _ => (value, 1),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| Error::Format(format!("Invalid byte quantity '{}'", value)))
}

/// Render a byte count with the largest whole unit
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(u64, &str); 4] = [(1 << 40, "T"), (1 << 30, "G"), (1 << 20, "M"), (1 << 10, "K")];
    for (size, suffix) in UNITS {
        if bytes >= size {
            return format!("{:.2}{}", bytes as f64 / size as f64, suffix);
        }
    }
    bytes.to_string()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "yes" => Ok(true),
        "false" | "no" => Ok(false),
        _ => Err(Error::Format(format!(
            "Invalid boolean '{}' for property {}",
            value, key
        ))),
    }
}

fn split_words(value: &str) -> impl Iterator<Item = &str> {
    value.split_whitespace()
}

fn join_words<'a>(words: impl Iterator<Item = &'a str>) -> String {
    words.collect::<Vec<_>>().join(" ")
}

fn check_utf8(kind: &str, path: &Path) -> Result<()> {
    match path.to_str() {
        Some(_) => Ok(()),
        None => Err(Error::Format(format!(
            "Required {} '{}' is not valid UTF-8",
            kind,
            path.display()
        ))),
    }
}

// Builder checks guarantee every stored path converts.
fn join_paths(paths: &BTreeSet<PathBuf>) -> String {
    join_words(paths.iter().map(|p| p.to_str().unwrap_or_default()))
}
