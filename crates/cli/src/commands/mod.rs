//! CLI Commands

pub mod db_migrate;
pub mod debug;
pub mod list;
pub mod report;

use anyhow::{Context as _, Result};
use kyua_engine::config::{self, Override};
use kyua_engine::store::StoreOptions;
use kyua_engine::{Config, Kyuafile, Testers};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Settings shared by every command
pub struct Session {
    pub config: Config,
    pub store_path: PathBuf,
    pub store_options: StoreOptions,
    pub kyuafile: Kyuafile,
    pub build_root: Option<PathBuf>,
    pub testers: Testers,
}

impl Session {
    pub fn new(
        config_path: Option<PathBuf>,
        overrides: &[Override],
        store_path: Option<PathBuf>,
        kyuafile: PathBuf,
        build_root: Option<PathBuf>,
    ) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(config::default_config_path);
        let mut config = Config::load(&config_path)
            .with_context(|| format!("Cannot load configuration {}", config_path.display()))?;
        for item in overrides {
            config
                .set(&item.key, &item.value)
                .with_context(|| format!("Invalid override {}={}", item.key, item.value))?;
        }
        debug!("Using configuration {:?}", config);

        Ok(Self {
            config,
            store_path: store_path.unwrap_or_else(config::default_store_path),
            store_options: StoreOptions::from_env(),
            kyuafile: Kyuafile::new(kyuafile),
            build_root,
            testers: Testers::from_env(),
        })
    }

    pub fn build_root(&self) -> Option<&Path> {
        self.build_root.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_on_top_of_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("kyua.conf");
        std::fs::write(&path, "architecture = \"vax\"\n").unwrap();

        let overrides = vec![
            "platform=amiga".parse().unwrap(),
            "test_suites.s.color=red".parse().unwrap(),
        ];
        let session = Session::new(
            Some(path),
            &overrides,
            Some(tmp.path().join("store.db")),
            PathBuf::from("Kyuafile.toml"),
            None,
        )
        .unwrap();

        assert_eq!("vax", session.config.architecture);
        assert_eq!("amiga", session.config.platform);
        assert_eq!(
            Some("red".to_string()),
            session.config.lookup("test_suites.s.color")
        );
        assert!(session.build_root().is_none());
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let overrides = vec!["nonsense=1".parse().unwrap()];
        let result = Session::new(
            Some(tmp.path().join("missing.conf")),
            &overrides,
            None,
            PathBuf::from("Kyuafile.toml"),
            None,
        );
        assert!(result.is_err());
    }
}
