//! TOML configuration for the joystick daemon.
//!
//! Every section carries its own defaults, so a partial file only overrides
//! what it names. A missing file is created with the defaults on first start.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::controller::sensor::IndicatorColor;
use crate::controller::stabilizer::{SettingsError, StabilizerSettings};

const CONFIG_DIR: &str = "joynav";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "JOYNAV_CONFIG";

// Highest 7-bit I2C address
const MAX_I2C_ADDRESS: u16 = 0x7F;

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub sensor: SensorConfig,
    pub stabilizer: StabilizerSettings,
    pub poll: PollConfig,
    pub indicator: IndicatorConfig,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SensorBackend {
    I2c,
    Gamepad,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    pub backend: SensorBackend,
    pub i2c_bus: u8,
    pub i2c_address: u16,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            backend: SensorBackend::I2c,
            i2c_bus: 1,
            i2c_address: 0x63,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PollConfig {
    pub loop_delay_ms: u64,
    pub report_channel_capacity: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            loop_delay_ms: 20,
            report_channel_capacity: 100,
        }
    }
}

impl PollConfig {
    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub active_color: IndicatorColor,
    pub startup_flash_ms: u64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            active_color: IndicatorColor::Blue,
            startup_flash_ms: 250,
        }
    }
}

impl IndicatorConfig {
    pub fn startup_flash(&self) -> Duration {
        Duration::from_millis(self.startup_flash_ms)
    }
}

// Config errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid stabilizer settings: {0}")]
    Stabilizer(#[from] SettingsError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl Config {
    // JOYNAV_CONFIG wins over the per-user config directory
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }

        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stabilizer.validate()?;

        if self.sensor.i2c_address > MAX_I2C_ADDRESS {
            return Err(ConfigError::Invalid(format!(
                "i2c_address {:#x} is not a 7-bit address",
                self.sensor.i2c_address
            )));
        }
        if self.poll.loop_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "loop_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.poll.report_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "report_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| io_error(path, source))?;
        Self::from_toml(&content, path)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(parent, source))?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .map_err(|source| io_error(path, source))?;
        Ok(())
    }

    // Writes the defaults when nothing is there yet, then loads
    pub async fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| io_error(path, source))?;

        if !exists {
            info!("Creating default configuration at {}", path.display());
            Config::default().save(path).await?;
        }

        Self::load(path).await
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("joynav-test-{}-{}", std::process::id(), name));
        path.push(CONFIG_FILE);
        path
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sensor.i2c_address, 0x63);
        assert_eq!(config.poll.loop_delay(), Duration::from_millis(20));
        assert_eq!(config.indicator.active_color, IndicatorColor::Blue);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let content = r#"
            [sensor]
            backend = "gamepad"

            [stabilizer]
            direction_ratio = 1.7
            report_interval_ms = 250

            [indicator]
            active_color = "red"
        "#;

        let config = Config::from_toml(content, Path::new("inline.toml")).unwrap();
        assert_eq!(config.sensor.backend, SensorBackend::Gamepad);
        assert_eq!(config.sensor.i2c_bus, 1);
        assert_eq!(config.stabilizer.direction_ratio, 1.7);
        assert_eq!(config.stabilizer.report_interval_ms, 250);
        assert_eq!(config.stabilizer.stable_threshold, 3);
        assert_eq!(config.indicator.active_color, IndicatorColor::Red);
        assert_eq!(config.indicator.startup_flash_ms, 250);
    }

    #[test]
    fn hex_address_is_accepted() {
        let config =
            Config::from_toml("[sensor]\ni2c_address = 0x5a\n", Path::new("inline.toml")).unwrap();
        assert_eq!(config.sensor.i2c_address, 0x5A);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let ratio = Config::from_toml("[stabilizer]\ndirection_ratio = 0.9\n", Path::new("a.toml"));
        assert!(matches!(ratio, Err(ConfigError::Stabilizer(SettingsError::DirectionRatio(_)))));

        let address = Config::from_toml("[sensor]\ni2c_address = 300\n", Path::new("b.toml"));
        assert!(matches!(address, Err(ConfigError::Invalid(_))));

        let delay = Config::from_toml("[poll]\nloop_delay_ms = 0\n", Path::new("c.toml"));
        assert!(matches!(delay, Err(ConfigError::Invalid(_))));

        let backend = Config::from_toml("[sensor]\nbackend = \"spi\"\n", Path::new("d.toml"));
        assert!(matches!(backend, Err(ConfigError::Parse { .. })));
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let path = scratch_path("create");
        let _ = tokio::fs::remove_file(&path).await;

        let config = Config::load_or_create(&path).await.unwrap();
        assert_eq!(config, Config::default());
        assert!(tokio::fs::try_exists(&path).await.unwrap());

        let mut changed = config.clone();
        changed.stabilizer.deadzone = 900;
        changed.save(&path).await.unwrap();
        assert_eq!(Config::load_or_create(&path).await.unwrap(), changed);

        if let Some(dir) = path.parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }
}
