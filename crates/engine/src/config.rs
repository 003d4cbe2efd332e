//! Runtime configuration
//!
//! The configuration is a TOML file:
//!
//! ```toml
//! architecture = "x86_64"
//! platform = "linux"
//! unprivileged_user = "nobody"
//!
//! [test_suites.netbsd]
//! iterations = 10
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable overriding the testers directory
pub const TESTERS_DIR_ENV: &str = "KYUA_TESTERSDIR";

/// Environment variable overriding the store scripts directory
pub const STORE_DIR_ENV: &str = "KYUA_STOREDIR";

/// Testers directory used when the environment does not name one
pub const DEFAULT_TESTERS_DIR: &str = "/usr/local/libexec/kyua";

/// Directory holding the tester binaries
pub fn testers_dir() -> PathBuf {
    std::env::var_os(TESTERS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TESTERS_DIR))
}

/// Directory holding store SQL scripts, if overridden
pub fn store_dir() -> Option<PathBuf> {
    std::env::var_os(STORE_DIR_ENV).map(PathBuf::from)
}

/// Default results store path
pub fn default_store_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kyua")
        .join("store.db")
}

/// Default runtime configuration file
pub fn default_config_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kyua")
        .join("kyua.conf")
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Account used to drop privileges for tests that require it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnprivilegedUser {
    name: String,
    uid: u32,
    gid: u32,
}

impl UnprivilegedUser {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
        }
    }

    /// Resolve a user name or numeric uid through the password database
    pub fn lookup(name_or_uid: &str) -> Result<Self> {
        let user = match name_or_uid.parse::<u32>() {
            Ok(uid) => nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid)),
            Err(_) => nix::unistd::User::from_name(name_or_uid),
        }
        .map_err(|e| Error::Format(format!("Cannot look up user '{}': {}", name_or_uid, e)))?
        .ok_or_else(|| Error::Format(format!("Unknown user '{}'", name_or_uid)))?;

        Ok(Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }
}

impl Serialize for UnprivilegedUser {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for UnprivilegedUser {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let user = String::deserialize(deserializer)?;
        Self::lookup(&user).map_err(serde::de::Error::custom)
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Architecture reported to allowed_architectures checks
    pub architecture: String,

    /// Platform reported to allowed_platforms checks
    pub platform: String,

    /// Account for tests requiring an unprivileged user
    pub unprivileged_user: Option<UnprivilegedUser>,

    /// Per test-suite properties, passed to testers as variables
    #[serde(deserialize_with = "deserialize_suites")]
    pub test_suites: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            architecture: std::env::consts::ARCH.to_string(),
            platform: std::env::consts::OS.to_string(),
            unprivileged_user: None,
            test_suites: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if it is absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| Error::load(path, e.to_string()))
        } else {
            Ok(Self::default())
        }
    }

    /// Look up a setting by its dotted name.
    ///
    /// `unprivileged-user` is accepted as an alias of `unprivileged_user`.
    pub fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "architecture" => Some(self.architecture.clone()),
            "platform" => Some(self.platform.clone()),
            "unprivileged_user" | "unprivileged-user" => {
                self.unprivileged_user.as_ref().map(|u| u.name().to_string())
            }
            _ => {
                let (suite, name) = split_suite_key(key)?;
                self.test_suites.get(suite)?.get(name).cloned()
            }
        }
    }

    /// Override a setting by its dotted name
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "architecture" => self.architecture = value.to_string(),
            "platform" => self.platform = value.to_string(),
            "unprivileged_user" | "unprivileged-user" => {
                self.unprivileged_user = Some(UnprivilegedUser::lookup(value)?)
            }
            _ => {
                let (suite, name) = split_suite_key(key)
                    .ok_or_else(|| Error::Format(format!("Unknown configuration key '{}'", key)))?;
                self.test_suites
                    .entry(suite.to_string())
                    .or_default()
                    .insert(name.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    /// Properties configured for one test suite
    pub fn test_suite(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.test_suites.get(name)
    }
}

fn split_suite_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix("test_suites.")?;
    let (suite, name) = rest.split_once('.')?;
    (!suite.is_empty() && !name.is_empty()).then_some((suite, name))
}

/// Scalar accepted as a test-suite property
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Scalar {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::String(s) => f.write_str(s),
            Scalar::Integer(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Boolean(b) => write!(f, "{}", b),
        }
    }
}

fn deserialize_suites<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, BTreeMap<String, Scalar>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(suite, props)| {
            let props = props.into_iter().map(|(k, v)| (k, v.to_string())).collect();
            (suite, props)
        })
        .collect())
}

/// `key=value` override given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub key: String,
    pub value: String,
}

impl FromStr for Override {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok(Self {
                key: key.to_string(),
                value: value.to_string(),
            }),
            _ => Err(Error::Format(format!(
                "Invalid override '{}'; must be of the form key=value",
                s
            ))),
        }
    }
}
