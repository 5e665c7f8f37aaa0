//! Engine configuration loading
//!
//! Resolution order for the configuration file:
//! 1. Command-line argument (highest priority)
//! 2. `CLIPMIX_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/clipmix/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! Individual keys can then be overridden by `CLIPMIX_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "CLIPMIX_CONFIG";

/// Tunables for scheduling, retry and output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lookahead horizon: clips starting within this window get a voice
    pub schedule_ahead_secs: f64,
    /// Period of the scheduling tick while playing
    pub reschedule_interval_secs: f64,
    /// Failed loads retried automatically until this many attempts
    pub max_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Playhead jumps larger than this are treated as seeks
    pub seek_threshold_secs: f64,
    /// Sample rate for offline rendering and preferred device rate
    pub sample_rate: u32,
    /// Output device name (None = system default)
    pub output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schedule_ahead_secs: 0.5,
            reschedule_interval_secs: 0.25,
            max_retry_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 10_000,
            seek_threshold_secs: 0.1,
            sample_rate: 48_000,
            output_device: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Loads configuration following the resolution order above.
    ///
    /// A missing file is not an error: defaults are used.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path) {
            Some(path) => {
                info!("Loading engine config from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Applies `CLIPMIX_*` environment overrides. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self) {
        override_from_env("CLIPMIX_SCHEDULE_AHEAD_SECS", &mut self.schedule_ahead_secs);
        override_from_env("CLIPMIX_RESCHEDULE_INTERVAL_SECS", &mut self.reschedule_interval_secs);
        override_from_env("CLIPMIX_MAX_RETRY_ATTEMPTS", &mut self.max_retry_attempts);
        override_from_env("CLIPMIX_RETRY_BASE_DELAY_MS", &mut self.retry_base_delay_ms);
        override_from_env("CLIPMIX_RETRY_MAX_DELAY_MS", &mut self.retry_max_delay_ms);
        override_from_env("CLIPMIX_SEEK_THRESHOLD_SECS", &mut self.seek_threshold_secs);
        override_from_env("CLIPMIX_SAMPLE_RATE", &mut self.sample_rate);
        if let Ok(device) = std::env::var("CLIPMIX_OUTPUT_DEVICE") {
            self.output_device = Some(device);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.schedule_ahead_secs > 0.0) {
            return Err(Error::Config("schedule_ahead_secs must be positive".to_string()));
        }
        if !(self.reschedule_interval_secs > 0.0) {
            return Err(Error::Config("reschedule_interval_secs must be positive".to_string()));
        }
        if !(self.seek_threshold_secs > 0.0) {
            return Err(Error::Config("seek_threshold_secs must be positive".to_string()));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(Error::Config(format!(
                "retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn schedule_ahead(&self) -> Duration {
        Duration::from_secs_f64(self.schedule_ahead_secs)
    }

    pub fn reschedule_interval(&self) -> Duration {
        Duration::from_secs_f64(self.reschedule_interval_secs)
    }

    /// Backoff before the automatic retry following failure number `attempts`
    /// (1-based): `base * 2^(attempts-1)`, capped at the maximum delay.
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        let delay = self.retry_base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.retry_max_delay_ms))
    }
}

fn override_from_env<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Ignoring unparseable {}={}", name, raw),
        }
    }
}

/// Locates the config file (see module docs for priority)
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }

    dirs::config_dir()
        .map(|d| d.join("clipmix").join("config.toml"))
        .filter(|p| p.exists())
}
