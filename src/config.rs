//! Configuration for the Heliotherm MQTT bridge.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Baud rates the controller can be configured for.
pub const ALLOWED_BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// MQTT broker settings
    pub mqtt: MqttConfig,

    /// Heat-pump connection settings
    #[serde(default)]
    pub heatpump: HeatPumpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Optional features
    #[serde(default)]
    pub features: FeatureConfig,
}

/// MQTT broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host or IP
    pub host: String,

    /// Broker port (default: 1883)
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Username, if the broker requires authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password, if the broker requires authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Client identifier (default: "mqtt-bridge-heliotherm")
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic root for state/values topics (default: "heliotherm")
    #[serde(default = "default_topic_root")]
    pub topic_root: String,

    /// Quality-of-service level for all publications: 0 or 1 (default: 0)
    #[serde(default)]
    pub qos: u8,

    /// Home Assistant discovery prefix (default: "homeassistant")
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Keep-alive interval in seconds (default: 60)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "mqtt-bridge-heliotherm".to_string()
}

fn default_topic_root() -> String {
    "heliotherm".to_string()
}

fn default_discovery_prefix() -> String {
    "homeassistant".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

/// Serial connection to the heat pump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatPumpConfig {
    /// Serial device path (default: "/dev/ttyUSB0")
    #[serde(default = "default_device")]
    pub device: String,

    /// Baud rate, as configured on the heat pump (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Per-request timeout in milliseconds (default: 5000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Highest parameter number scanned by a bulk query (default: 105)
    #[serde(default = "default_scan_limit")]
    pub register_scan_limit: u16,
}

fn default_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_scan_limit() -> u16 {
    105
}

impl Default for HeatPumpConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            register_scan_limit: default_scan_limit(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file; rotated daily when set
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Independently toggleable features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Correct device clock drift nightly (default: true)
    #[serde(default = "default_clock_sync")]
    pub clock_sync: bool,

    /// Append one CSV record per successful poll cycle to this file
    #[serde(default)]
    pub csv_export: Option<PathBuf>,
}

fn default_clock_sync() -> bool {
    true
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            clock_sync: default_clock_sync(),
            csv_export: None,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.is_empty() {
            return Err(ConfigError::Validation(
                "MQTT host cannot be empty".to_string(),
            ));
        }

        if self.mqtt.qos > 1 {
            return Err(ConfigError::Validation(format!(
                "Invalid QoS level {} (use 0 or 1)",
                self.mqtt.qos
            )));
        }

        if self.mqtt.topic_root.is_empty() || self.mqtt.topic_root.ends_with('/') {
            return Err(ConfigError::Validation(format!(
                "Invalid topic root '{}'",
                self.mqtt.topic_root
            )));
        }

        if !ALLOWED_BAUD_RATES.contains(&self.heatpump.baud_rate) {
            return Err(ConfigError::Validation(format!(
                "Invalid baud rate {} (allowed: {:?})",
                self.heatpump.baud_rate, ALLOWED_BAUD_RATES
            )));
        }

        Ok(())
    }
}
