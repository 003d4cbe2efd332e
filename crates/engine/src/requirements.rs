//! Requirement checks applied before running a test case

use crate::config::Config;
use crate::metadata::{format_bytes, Metadata, UserRequirement};
use std::ffi::OsString;
use std::path::Path;
use tracing::warn;

/// Facts about the host that requirements are checked against
#[derive(Debug, Clone)]
pub struct Host {
    /// Whether the effective user is root
    pub is_root: bool,
    /// Physical memory in bytes; 0 when unknown
    pub physical_memory: u64,
    /// Search path for bare program names
    pub path: Option<OsString>,
}

impl Host {
    /// Inspect the running process and machine
    pub fn current() -> Self {
        Self {
            is_root: nix::unistd::geteuid().is_root(),
            physical_memory: physical_memory(),
            path: std::env::var_os("PATH"),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn physical_memory() -> u64 {
    match nix::sys::sysinfo::sysinfo() {
        Ok(info) => info.ram_total(),
        Err(e) => {
            warn!("Failed to query physical memory: {}", e);
            0
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn physical_memory() -> u64 {
    0
}

/// Check the requirements of a test case against the current host.
///
/// Returns the reason to skip the test, or `None` if it can run.
pub fn check_reqs(metadata: &Metadata, config: &Config, test_suite: &str) -> Option<String> {
    check_reqs_on(metadata, config, test_suite, &Host::current())
}

/// Check requirements against an explicit host description.
///
/// Checks run in a fixed order and only the first failure is reported:
/// configuration variables, architecture, platform, user, files, programs
/// and memory.
pub fn check_reqs_on(
    metadata: &Metadata,
    config: &Config,
    test_suite: &str,
    host: &Host,
) -> Option<String> {
    check_configs(metadata, config, test_suite)
        .or_else(|| check_allowed_architectures(metadata, config))
        .or_else(|| check_allowed_platforms(metadata, config))
        .or_else(|| check_required_user(metadata, config, host))
        .or_else(|| check_required_files(metadata))
        .or_else(|| check_required_programs(metadata, host))
        .or_else(|| check_required_memory(metadata, host))
}

fn check_configs(metadata: &Metadata, config: &Config, test_suite: &str) -> Option<String> {
    for name in metadata.required_configs() {
        let key = match name.as_str() {
            "unprivileged-user" | "unprivileged_user" => "unprivileged_user".to_string(),
            other => format!("test_suites.{}.{}", test_suite, other),
        };
        if config.lookup(&key).is_none() {
            return Some(format!(
                "Required configuration property '{}' not defined",
                name
            ));
        }
    }
    None
}

fn check_allowed_architectures(metadata: &Metadata, config: &Config) -> Option<String> {
    let allowed = metadata.allowed_architectures();
    if !allowed.is_empty() && !allowed.contains(&config.architecture) {
        return Some(format!(
            "Current architecture '{}' not supported",
            config.architecture
        ));
    }
    None
}

fn check_allowed_platforms(metadata: &Metadata, config: &Config) -> Option<String> {
    let allowed = metadata.allowed_platforms();
    if !allowed.is_empty() && !allowed.contains(&config.platform) {
        return Some(format!(
            "Current platform '{}' not supported",
            config.platform
        ));
    }
    None
}

fn check_required_user(metadata: &Metadata, config: &Config, host: &Host) -> Option<String> {
    match metadata.required_user() {
        UserRequirement::Any => None,
        UserRequirement::Root if !host.is_root => Some("Requires root privileges".to_string()),
        UserRequirement::Root => None,
        UserRequirement::Unprivileged if host.is_root && config.unprivileged_user.is_none() => Some(
            "Requires an unprivileged user but the unprivileged-user configuration variable is \
             not defined"
                .to_string(),
        ),
        UserRequirement::Unprivileged => None,
    }
}

fn check_required_files(metadata: &Metadata) -> Option<String> {
    for file in metadata.required_files() {
        debug_assert!(file.is_absolute(), "required files are absolute");
        if !file.exists() {
            return Some(format!("Required file '{}' not found", file.display()));
        }
    }
    None
}

fn check_required_programs(metadata: &Metadata, host: &Host) -> Option<String> {
    for program in metadata.required_programs() {
        let found = if program.is_absolute() {
            program.exists()
        } else {
            find_in_path(program, host.path.as_deref()).is_some()
        };
        if !found {
            return Some(format!("Required program '{}' not found", program.display()));
        }
    }
    None
}

fn check_required_memory(metadata: &Metadata, host: &Host) -> Option<String> {
    let required = metadata.required_memory();
    if required == 0 {
        return None;
    }
    if host.physical_memory == 0 {
        warn!("Physical memory unknown; not checking required_memory");
        return None;
    }
    if required > host.physical_memory {
        return Some(format!(
            "Requires {} bytes of physical memory but only {} available",
            format_bytes(required),
            format_bytes(host.physical_memory)
        ));
    }
    None
}

/// Locate a bare program name in a search path
pub fn find_in_path(name: &Path, path: Option<&std::ffi::OsStr>) -> Option<std::path::PathBuf> {
    let path = path?;
    std::env::split_paths(path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
