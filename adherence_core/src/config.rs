//! Configuration file support for medtrack.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/medtrack/config.toml`.

use crate::{Error, Result};
use chrono::{Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Overdue sweep cadence and grace period
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            grace_minutes: default_grace_minutes(),
        }
    }
}

impl SweepConfig {
    pub fn grace(&self) -> Result<Duration> {
        Duration::try_minutes(self.grace_minutes).ok_or_else(|| {
            Error::Config(format!("sweep.grace_minutes out of range: {}", self.grace_minutes))
        })
    }

    pub fn interval(&self) -> Result<std::time::Duration> {
        self.interval_minutes
            .checked_mul(60)
            .map(std::time::Duration::from_secs)
            .ok_or_else(|| {
                Error::Config(format!(
                    "sweep.interval_minutes out of range: {}",
                    self.interval_minutes
                ))
            })
    }
}

/// Schedule expansion parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Length of the schedule when a prescription has no end date
    #[serde(default = "default_window_days")]
    pub default_window_days: u32,

    /// Wall-clock offset in which reminder times and calendar days are read
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            default_window_days: default_window_days(),
            utc_offset_minutes: 0,
        }
    }
}

impl ScheduleConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                Error::Config(format!(
                    "utc_offset_minutes out of range: {}",
                    self.utc_offset_minutes
                ))
            })
    }
}

/// Persistence parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of operations in one atomic batch
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local/share")
    });
    base.join("medtrack")
}

fn default_interval_minutes() -> u64 {
    30
}

fn default_grace_minutes() -> i64 {
    15
}

fn default_window_days() -> u32 {
    30
}

fn default_batch_limit() -> usize {
    500
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(".config")
        });
        base.join("medtrack").join("config.toml")
    }

    /// Reject values the sweeper or store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.store.batch_limit == 0 {
            return Err(Error::Config("store.batch_limit must be at least 1".into()));
        }
        if self.sweep.interval_minutes == 0 {
            return Err(Error::Config("sweep.interval_minutes must be at least 1".into()));
        }
        if self.sweep.grace_minutes < 0 {
            return Err(Error::Config("sweep.grace_minutes must not be negative".into()));
        }
        self.sweep.grace()?;
        self.sweep.interval()?;
        self.schedule.offset()?;
        Ok(())
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
