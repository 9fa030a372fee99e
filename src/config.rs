//! Configuration for the breath monitor.

use crate::calibration::PressureTransform;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the breath monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Sampling cadence
    pub sampling: SamplingConfig,

    /// Breath timing limits
    pub timing: TimingConfig,

    /// Sensor count to pascal conversion
    pub pressure: PressureTransform,

    /// Path for calibration and breath statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("breath-monitor");

        Self {
            sampling: SamplingConfig::default(),
            timing: TimingConfig::default(),
            pressure: PressureTransform::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            Self::from_json(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the detector cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sampling.validate()
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("breath-monitor")
            .join("config.json")
    }

    /// Path of the persisted breath calibration.
    pub fn calibration_path(&self) -> PathBuf {
        self.data_path.join("calibration.json")
    }

    /// Path of the persisted breath statistics.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("breath_stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }
}

/// Sampling cadence of the periodic worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// ADC sample rate of the pressure channel
    pub sample_rate_hz: u32,

    /// Largest batch read from the source per tick
    pub max_samples_per_tick: usize,

    /// Time between ticks
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1000,
            max_samples_per_tick: 16,
            tick_interval: Duration::from_millis(4),
        }
    }
}

impl SamplingConfig {
    /// Every sample must span a whole number of milliseconds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.sample_rate_hz;
        if rate == 0 || rate > 1000 || 1000 % rate != 0 {
            return Err(ConfigError::InvalidValue(format!(
                "sample_rate_hz must divide 1000, got {rate}"
            )));
        }
        if self.max_samples_per_tick == 0 {
            return Err(ConfigError::InvalidValue(
                "max_samples_per_tick must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Milliseconds represented by one sample. Exact only for a
    /// configuration that passes [`validate`](Self::validate).
    pub fn sample_period_ms(&self) -> u32 {
        (1000 / self.sample_rate_hz.max(1)).max(1)
    }
}

/// Breath period limits and holdoff durations, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Substituted when the previous breath is too long ago (20 BPM)
    pub default_breath_period_ms: u32,
    /// Shortest plausible breath period (40 BPM)
    pub min_breath_period_ms: u32,
    /// Longest plausible breath period (8 BPM)
    pub max_breath_period_ms: u32,
    /// Silence that raises the apnea alarm
    pub apnea_detection_period_ms: u32,
    /// Holdoff after the detector starts
    pub holdoff_startup_ms: u32,
    /// Holdoff after each breath
    pub holdoff_standard_ms: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            default_breath_period_ms: 3000,
            min_breath_period_ms: 1500,
            max_breath_period_ms: 7500,
            apnea_detection_period_ms: 15000,
            holdoff_startup_ms: 1500,
            holdoff_standard_ms: 1500,
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::InvalidValue(e) => write!(f, "Invalid value: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration, as milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
