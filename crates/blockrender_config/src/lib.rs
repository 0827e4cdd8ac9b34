use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::{
    logger::LoggerConfig,
    targets::{TargetTable, TargetTableError},
};

pub(crate) mod defaults;
pub mod logger;
pub mod targets;

pub use defaults::DEFAULT_SERVICE_TAG;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing)]
    path: Option<Utf8PathBuf>,

    /// Render targets by key, the first entry is the fallback for unknown keys
    #[serde(default = "defaults::default_targets")]
    pub targets: IndexMap<String, Url>,

    /// `source` tag inbound messages must carry to be trusted
    #[serde(default = "defaults::default_service_tag")]
    pub service_tag: String,

    /// Fail renders that get no reply within this many milliseconds.
    /// Renders wait indefinitely when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_timeout_ms: Option<u64>,

    #[serde(default)]
    pub logger: LoggerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: None,
            targets: defaults::default_targets(),
            service_tag: defaults::default_service_tag(),
            render_timeout_ms: None,
            logger: LoggerConfig::default(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_path(mut self, path: &Utf8PathBuf) -> Self {
        self.path = Some(path.clone());
        self
    }

    pub fn path(&self) -> Utf8PathBuf {
        self.path.clone().unwrap_or(Self::default_path())
    }

    /// Loads config from a json file
    ///
    /// # Errors
    ///
    /// This function will return an error if the config path does not exist or the content is invalid
    pub fn load(path: &Utf8PathBuf) -> Result<Self> {
        debug!("Loading config from {path}");

        if !path.exists() {
            anyhow::bail!("Config file does not exist: {path}");
        }

        let contents =
            fs::read_to_string(path).context(format!("Failed reading config: {path} "))?;

        let mut cfg: Self =
            serde_json::from_str(&contents).context(format!("Failed loading config: {path} "))?;
        cfg.path = Some(path.clone());

        cfg.target_table()
            .context(format!("Invalid targets in config: {path}"))?;

        Ok(cfg)
    }

    /// Loads config from a json file, using the built-in defaults when the
    /// file does not exist
    ///
    /// # Errors
    ///
    /// This function will return an error if the file exists but is invalid
    pub fn load_or_default(path: &Utf8PathBuf) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No config at {path}, using defaults");
            Ok(Self::default().with_path(path))
        }
    }

    /// Saves config to json file, falling back on default path if none is provided
    ///
    /// # Errors
    /// This function will error if it fails writing the config
    pub fn save(&self) -> Result<()> {
        let dest = self.path();
        debug!("Saving config to {dest}");
        let contents = serde_json::to_string_pretty(self).unwrap_or(json!(self).to_string());

        fs::write(&dest, contents).context(format!("Failed writing config: {dest}"))?;

        Ok(())
    }

    /// Default config path is ./blockrender.json
    pub fn default_path() -> Utf8PathBuf {
        Utf8PathBuf::new().join("blockrender.json")
    }

    /// # Errors
    ///
    /// Returns an error if no targets are configured
    pub fn target_table(&self) -> Result<TargetTable, TargetTableError> {
        TargetTable::from_map(&self.targets)
    }

    pub fn render_timeout(&self) -> Option<Duration> {
        self.render_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "missing.json");

        assert!(Config::load(&path).is_err());

        let cfg = Config::load_or_default(&path).unwrap();
        assert_eq!(cfg.path(), path);
        assert_eq!(cfg.service_tag, "makecode");
        assert_eq!(cfg.targets.len(), 5);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "blockrender.json");

        let mut cfg = Config::default().with_path(&path);
        cfg.render_timeout_ms = Some(1500);
        cfg.save().unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.render_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(loaded.targets, cfg.targets);
        assert_eq!(loaded.path(), path);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "partial.json");
        fs::write(
            &path,
            r#"{ "targets": { "local": "http://localhost:3232/" }, "logger": { "level": "debug" } }"#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.service_tag, DEFAULT_SERVICE_TAG);
        assert!(cfg.render_timeout().is_none());
        assert_eq!(cfg.target_table().unwrap().default_target().key, "local");
    }

    #[test]
    fn test_empty_targets_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "empty.json");
        fs::write(&path, r#"{ "targets": {} }"#).unwrap();

        assert!(Config::load(&path).is_err());
    }
}
