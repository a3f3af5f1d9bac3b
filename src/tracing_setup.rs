//! Tracing initialization
//!
//! The recorder emits `tracing` events (level open/close at `debug`, finalize at
//! `info`, deferred errors, failed autosaves and clamped levels at `warn`). This
//! module installs one `tracing-subscriber` fmt layer to print them, in the format
//! named by `application.log_format`. `RUST_LOG` takes precedence over
//! `application.log_level`.
//!
//! # Example
//! ```no_run
//! use acq_loop::{config::RecorderSettings, tracing_setup};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = RecorderSettings::load()?;
//! tracing_setup::init_from_settings(&settings)?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::RecorderSettings;

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, colored; for interactive sessions
    #[default]
    Pretty,
    /// One line per event, no colors; for log files
    Compact,
    /// One JSON object per event; for log aggregation
    Json,
}

/// What [`init`] installs
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
}

impl TracingConfig {
    /// Pretty output at `level`
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::default(),
        }
    }

    /// Level and format from recorder settings
    pub fn from_settings(settings: &RecorderSettings) -> Result<Self, String> {
        let level = parse_log_level(&settings.application.log_level)?;
        Ok(Self::new(level).with_format(settings.application.log_format))
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Initialize tracing from recorder settings
pub fn init_from_settings(settings: &RecorderSettings) -> Result<(), String> {
    init(TracingConfig::from_settings(settings)?)
}

/// Install the global subscriber.
///
/// Idempotent: if a global subscriber is already installed this returns
/// `Ok(())`, so tests and embedding applications can call it freely.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => fmt::layer().pretty().boxed(),
        OutputFormat::Compact => fmt::layer().compact().with_ansi(false).boxed(),
        OutputFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            // Expected when a test harness or host program got there first
            if e.to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    level.parse::<Level>().map_err(|_| {
        format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )
    })
}
