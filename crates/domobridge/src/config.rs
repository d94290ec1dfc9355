//! Configuration file parsing and structures.
//!
//! domobridge is configured with a single TOML file:
//! - `[logging]`: log level and per-target overrides
//! - `[mqtt]`: broker connection, topics and delivery levels
//! - `[bridge]`: reconnect policy and listener limits

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

use crate::bridge::BridgeConfig;
use crate::bus::Qos;
use crate::device::DeviceId;
use crate::supervisor::SupervisorConfig;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub bridge: BridgeSettings,
}

/// Verbosity for `[logging] level` and per-target overrides, spelled in
/// lowercase in the config file
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"domobridge::codec" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "domobridge".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_publish_topic() -> String {
    "domoticz/in".to_string()
}

fn default_subscribe_topic() -> String {
    "domoticz/out".to_string()
}

fn default_publish_qos() -> Qos {
    Qos::AtLeastOnce
}

fn default_subscribe_qos() -> Qos {
    Qos::ExactlyOnce
}

/// MQTT broker connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// MQTT broker hostname or IP address
    pub broker: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Topic Domoticz reads commands from
    #[serde(default = "default_publish_topic")]
    pub publish_topic: String,

    /// Topic Domoticz publishes device state on
    #[serde(default = "default_subscribe_topic")]
    pub subscribe_topic: String,

    #[serde(default = "default_publish_qos")]
    pub publish_qos: Qos,

    #[serde(default = "default_subscribe_qos")]
    pub subscribe_qos: Qos,

    /// Publish commands with the retain flag set
    #[serde(default)]
    pub retain: bool,
}

fn default_reconnect_delay_secs() -> u64 {
    2
}

fn default_max_listeners() -> Option<usize> {
    Some(16)
}

/// Reconnect policy and listener limits
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSettings {
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Maximum number of listeners; omit for the default of 16
    #[serde(default = "default_max_listeners")]
    pub max_listeners: Option<usize>,

    /// Devices whose updates are logged and refreshed on every connect
    #[serde(default)]
    pub watch: Vec<DeviceId>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_listeners: default_max_listeners(),
            watch: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.broker must not be empty".to_string()));
        }
        if self.mqtt.publish_topic.is_empty() || self.mqtt.subscribe_topic.is_empty() {
            return Err(ConfigError::Invalid("mqtt topics must not be empty".to_string()));
        }
        if self.bridge.reconnect_delay_secs == 0 {
            return Err(ConfigError::Invalid(
                "bridge.reconnect_delay_secs must be at least 1".to_string(),
            ));
        }
        if self.bridge.max_listeners == Some(0) {
            return Err(ConfigError::Invalid(
                "bridge.max_listeners must be at least 1".to_string(),
            ));
        }
        if self.bridge.watch.contains(&0) {
            return Err(ConfigError::Invalid(
                "bridge.watch must only contain positive device ids".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for [`crate::Bridge::new`]
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            supervisor: SupervisorConfig {
                subscribe_topic: self.mqtt.subscribe_topic.clone(),
                subscribe_qos: self.mqtt.subscribe_qos,
                reconnect_delay: Duration::from_secs(self.bridge.reconnect_delay_secs),
            },
            publish_topic: self.mqtt.publish_topic.clone(),
            publish_qos: self.mqtt.publish_qos,
            retain: self.mqtt.retain,
            max_listeners: self.bridge.max_listeners,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
