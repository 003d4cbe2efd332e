//! Shared fixtures for integration tests
//!
//! The mock tester delegates all work to the test program itself: programs
//! are shell scripts that print their listing when called with `list` and
//! run a case when called with `test <case> <result-file>`. Variables passed
//! with `-v` reach the program through `MOCK_VARS`.

#![allow(dead_code)]

use kyua_engine::{Kyuafile, Testers};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const MOCK_TESTER: &str = r#"#!/bin/sh
while getopts g:t:u: opt; do :; done
shift $((OPTIND - 1))
command="$1"; shift
case "${command}" in
list)
    exec "$1" list
    ;;
test)
    vars=""
    OPTIND=1
    while getopts v: opt; do vars="${vars} ${OPTARG}"; done
    shift $((OPTIND - 1))
    MOCK_VARS="${vars}" exec "$1" test "$2" "$3"
    ;;
*)
    echo "Unknown command ${command}" >&2
    exit 3
    ;;
esac
"#;

pub const BOOM_TESTER: &str = r#"#!/bin/sh
echo "some output"
echo "first line" >&2
echo "boom" >&2
exit 1
"#;

/// A program with one case per interesting outcome
pub const STANDARD_PROGRAM: &str = r#"#!/bin/sh
if [ "$1" = list ]; then
    echo 'test_case{name="pass"}'
    echo 'test_case{name="fail", description="Fails on purpose"}'
    echo 'test_case{name="crash"}'
    echo 'test_case{name="vars", has_cleanup="true"}'
    exit 0
fi
result="$3"
case "$2" in
pass)
    echo "stdout of pass"
    echo "passed" >"${result}"
    ;;
fail)
    echo "stderr of fail" >&2
    echo "failed: Fails on purpose" >"${result}"
    exit 1
    ;;
crash)
    echo "before crash"
    ulimit -c 0
    kill -s ABRT $$
    ;;
vars)
    echo "${MOCK_VARS}"
    echo "passed" >"${result}"
    ;;
esac
"#;

/// A program whose listing fails
pub const UNLISTABLE_PROGRAM: &str = r#"#!/bin/sh
echo "cannot list" >&2
exit 1
"#;

pub fn write_executable(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Temporary testers directory, suite tree and store location
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let fixture = Self { dir };
        write_executable(&fixture.testers_dir().join("kyua-mock-tester"), MOCK_TESTER);
        write_executable(&fixture.testers_dir().join("kyua-boom-tester"), BOOM_TESTER);
        std::fs::create_dir_all(fixture.suite_dir()).unwrap();
        fixture
    }

    pub fn testers_dir(&self) -> PathBuf {
        self.dir.path().join("testers")
    }

    pub fn testers(&self) -> Testers {
        Testers::new(self.testers_dir())
    }

    pub fn suite_dir(&self) -> PathBuf {
        self.dir.path().join("suite")
    }

    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join("store.db")
    }

    pub fn scratch(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn add_program(&self, relative_path: &str, content: &str) -> PathBuf {
        let path = self.suite_dir().join(relative_path);
        write_executable(&path, content);
        path
    }

    pub fn kyuafile(&self, content: &str) -> Kyuafile {
        let path = self.suite_dir().join("Kyuafile.toml");
        std::fs::write(&path, content).unwrap();
        Kyuafile::new(path)
    }
}
