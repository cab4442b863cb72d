//! Runtime settings.
//!
//! Sources are layered with the `config` crate, later ones winning:
//!
//! 1. built-in defaults (every field has one)
//! 2. an optional TOML file
//! 3. `IDOBATA__<SECTION>__<KEY>` environment variables, e.g.
//!    `IDOBATA__HISTORY__PAGE_SIZE=100`

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    domain::BackoffPolicy,
    usecase::{PlaybackConfig, WaveformConfig},
};

const ENV_PREFIX: &str = "IDOBATA";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] ConfigError),

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub history: HistorySettings,
    pub reconnect: ReconnectSettings,
    pub playback: PlaybackSettings,
    pub waveform: WaveformSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub page_size: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self { page_size: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub load_timeout_ms: u64,
    pub status_interval_ms: u64,
    /// Where the playback rate preference is stored; in-memory when unset
    pub preference_path: Option<PathBuf>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            load_timeout_ms: 5_000,
            status_interval_ms: 250,
            preference_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WaveformSettings {
    pub bar_count: usize,
    pub min_magnitude: f32,
}

impl Default for WaveformSettings {
    fn default() -> Self {
        Self {
            bar_count: 40,
            min_magnitude: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the optional file at `path` and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        Self::from_sources(path.map(File::from), environment())
    }

    fn from_sources(
        file: Option<File<config::FileSourceFile, config::FileFormat>>,
        env: Environment,
    ) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(file);
        }
        let settings: Settings = builder.add_source(env).build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.history.page_size == 0 {
            return Err(invalid("history.page_size", "must be at least 1"));
        }
        if self.reconnect.initial_backoff_ms == 0 {
            return Err(invalid("reconnect.initial_backoff_ms", "must be positive"));
        }
        if self.reconnect.max_backoff_ms < self.reconnect.initial_backoff_ms {
            return Err(invalid(
                "reconnect.max_backoff_ms",
                "must not be below initial_backoff_ms",
            ));
        }
        if self.reconnect.multiplier.is_nan() || self.reconnect.multiplier < 1.0 {
            return Err(invalid("reconnect.multiplier", "must be at least 1.0"));
        }
        if self.playback.load_timeout_ms == 0 || self.playback.status_interval_ms == 0 {
            return Err(invalid("playback", "timeouts and intervals must be positive"));
        }
        if self.waveform.bar_count == 0 {
            return Err(invalid("waveform.bar_count", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.waveform.min_magnitude) {
            return Err(invalid("waveform.min_magnitude", "must be within 0..=1"));
        }
        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.reconnect.initial_backoff_ms),
            max: Duration::from_millis(self.reconnect.max_backoff_ms),
            multiplier: self.reconnect.multiplier,
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            load_timeout: Duration::from_millis(self.playback.load_timeout_ms),
            status_interval: Duration::from_millis(self.playback.status_interval_ms),
        }
    }

    pub fn waveform_config(&self) -> WaveformConfig {
        WaveformConfig {
            bar_count: self.waveform.bar_count,
            min_magnitude: self.waveform.min_magnitude,
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

fn invalid(key: &'static str, reason: &str) -> SettingsError {
    SettingsError::Invalid {
        key,
        reason: reason.to_string(),
    }
}
