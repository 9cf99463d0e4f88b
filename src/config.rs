//! # Configuration
//!
//! One TOML file with a section per concern. Every field has a default, so a
//! missing file or a partial file still yields a complete configuration:
//!
//! ```toml
//! [mqtt]
//! host = "broker.emqx.io"
//! namespace = "pilyavin"
//!
//! [serial]
//! sensor_port = "/dev/ttyACM0"
//! actuator_port = "/dev/ttyACM0"
//!
//! [bridge]
//! interval_secs = 10
//!
//! [controller]
//! threshold = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::mqtt::config::MqttConfig;

const CONFIG_DIR: &str = "greenhouse-bridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub serial: SerialConfig,
    pub bridge: BridgeConfig,
    pub controller: ControllerConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    /// Device the luminosity sensor is attached to
    pub sensor_port: String,
    /// Device the light is attached to, may equal `sensor_port`
    pub actuator_port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// Boards reset when the port opens and ignore input until booted
    pub boot_delay_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            sensor_port: "COM3".to_string(),
            actuator_port: "COM5".to_string(),
            baud_rate: 9600,
            read_timeout_ms: 1000,
            boot_delay_ms: 2000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub settle_ms: u64,
    pub interval_secs: u64,
    /// Zero polls until interrupted
    pub iterations: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            settle_ms: 100,
            interval_secs: 10,
            iterations: 1800,
        }
    }
}

impl BridgeConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn iteration_limit(&self) -> Option<u64> {
        (self.iterations > 0).then_some(self.iterations)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub threshold: i64,
    /// Zero runs until interrupted
    pub run_for_secs: u64,
    pub max_status_lines: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            threshold: 30,
            run_for_secs: 1800,
            max_status_lines: 8,
        }
    }
}

impl ControllerConfig {
    pub fn run_for(&self) -> Option<Duration> {
        (self.run_for_secs > 0).then(|| Duration::from_secs(self.run_for_secs))
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Loads `path`, or the default location when `path` is `None`.
    ///
    /// A file that does not exist yields the built-in defaults; a file that
    /// exists but cannot be read or parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            info!("No config directory available, using built-in defaults");
            return Ok(Self::default());
        };

        if !path.exists() {
            info!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;

        info!("Loaded config from {}", path.display());
        debug!("Effective config: {:?}", config);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_field_deployment() {
        let config = Config::default();
        assert_eq!(config.mqtt.host, "broker.emqx.io");
        assert_eq!(config.mqtt.qos, 2);
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.bridge.interval(), Duration::from_secs(10));
        assert_eq!(config.bridge.settle(), Duration::from_millis(100));
        assert_eq!(config.bridge.iteration_limit(), Some(1800));
        assert_eq!(config.controller.threshold, 30);
        assert_eq!(config.controller.run_for(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config = Config::from_toml(
            r#"
            [mqtt]
            host = "localhost"
            namespace = "lab"

            [serial]
            sensor_port = "/dev/ttyACM0"

            [controller]
            threshold = 55
            "#,
        )
        .unwrap();

        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topics().luminosity, "lab/greenhouse/luminosity");
        assert_eq!(config.serial.sensor_port, "/dev/ttyACM0");
        assert_eq!(config.serial.actuator_port, "COM5");
        assert_eq!(config.controller.threshold, 55);
        assert_eq!(config.bridge, BridgeConfig::default());
    }

    #[test]
    fn zero_limits_mean_unbounded() {
        let config = Config::from_toml(
            "[bridge]\niterations = 0\n[controller]\nrun_for_secs = 0\n",
        )
        .unwrap();
        assert_eq!(config.bridge.iteration_limit(), None);
        assert_eq!(config.controller.run_for(), None);
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(Config::from_toml("[mqtt]\nport = \"not a port\"").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("greenhouse-bridge-does-not-exist.toml");
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config, Config::default());
    }
}
