//! Recorder configuration using Figment
//!
//! Settings are loaded from:
//! 1. `config/acq_loop.toml` (base configuration)
//! 2. Environment variables prefixed with `ACQ_LOOP_`, with `__` separating
//!    nested keys (`ACQ_LOOP_RECORDER__STORE_KEY=scan`)
//!
//! Every field has a default, so a missing file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use acq_loop::config::RecorderSettings;
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = RecorderSettings::load()?;
//! settings.validate().map_err(anyhow::Error::msg)?;
//! let recorder = settings.build_recorder()?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::recorder::LoopRecorder;
use crate::store::FileStore;
use crate::tracing_setup::OutputFormat;
use crate::value::is_reserved;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/acq_loop.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "ACQ_LOOP_";

/// Top-level recorder configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderSettings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Recording behaviour
    #[serde(default)]
    pub recorder: RecorderConfig,
    /// Where recordings are written
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log line format (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Recorder behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Write a snapshot to the store after every append
    #[serde(default)]
    pub save_on_edit: bool,
    /// Store key the recording is written under
    #[serde(default = "default_store_key")]
    pub store_key: String,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Output directory for store files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Store file name inside `output_dir`
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

// Default value functions
fn default_name() -> String {
    "acq_loop".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_store_key() -> String {
    "loop".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_file_name() -> String {
    "loop.json".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            save_on_edit: false,
            store_key: default_store_key(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_name: default_file_name(),
        }
    }
}

impl RecorderSettings {
    /// Load configuration from `config/acq_loop.toml` and the environment
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let key = &self.recorder.store_key;
        if key.is_empty() {
            return Err("store_key must not be empty".to_string());
        }
        if is_reserved(key) {
            return Err(format!("store_key '{key}' uses the reserved '__' prefix"));
        }

        if self.storage.file_name.is_empty() {
            return Err("file_name must not be empty".to_string());
        }

        Ok(())
    }

    /// Full path of the store file
    pub fn store_path(&self) -> PathBuf {
        self.storage.output_dir.join(&self.storage.file_name)
    }

    /// Render the configuration as TOML, e.g. to seed a config file
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize recorder settings")
    }

    /// Create a recorder writing to the configured file store
    pub fn build_recorder(&self) -> Result<LoopRecorder> {
        let dir = &self.storage.output_dir;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        let store = FileStore::open(self.store_path())?;
        Ok(LoopRecorder::new()
            .with_store(self.recorder.store_key.clone(), Box::new(store))
            .with_save_on_edit(self.recorder.save_on_edit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::store::{FileStore, Store};
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = RecorderSettings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, RecorderSettings::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("acq_loop.toml");
        std::fs::write(
            &path,
            "[recorder]\nsave_on_edit = true\nstore_key = \"scan\"\n\n[storage]\nfile_name = \"scan.json\"\n",
        )
        .unwrap();

        let settings = RecorderSettings::load_from(&path).unwrap();
        assert!(settings.recorder.save_on_edit);
        assert_eq!(settings.recorder.store_key, "scan");
        assert_eq!(settings.storage.file_name, "scan.json");
        assert_eq!(settings.application.log_level, "info");
        assert_eq!(settings.application.log_format, OutputFormat::Pretty);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("acq_loop.toml");
        std::fs::write(
            &path,
            "[application]\nlog_level = \"warn\"\nlog_format = \"compact\"\n",
        )
        .unwrap();

        std::env::set_var("ACQ_LOOP_APPLICATION__LOG_LEVEL", "debug");
        let settings = RecorderSettings::load_from(&path);
        std::env::remove_var("ACQ_LOOP_APPLICATION__LOG_LEVEL");

        let settings = settings.unwrap();
        assert_eq!(settings.application.log_level, "debug");
        assert_eq!(settings.application.log_format, OutputFormat::Compact);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = RecorderSettings::default();
        settings.application.log_level = "verbose".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_reserved_store_key() {
        let mut settings = RecorderSettings::default();
        settings.recorder.store_key = "__loop_shape__".to_string();
        assert!(settings.validate().is_err());
        settings.recorder.store_key = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let settings = RecorderSettings::default();
        let text = settings.to_toml_string().unwrap();
        let parsed: RecorderSettings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_build_recorder_writes_store_file() {
        let dir = tempdir().unwrap();
        let mut settings = RecorderSettings::default();
        settings.storage.output_dir = dir.path().join("out");
        settings.recorder.save_on_edit = true;

        let recorder = settings.build_recorder().unwrap();
        recorder.append(fields! { "x" => 1.0 }).unwrap();
        drop(recorder);

        let store = FileStore::open(settings.store_path()).unwrap();
        assert!(store.get("loop").is_some());
    }
}
