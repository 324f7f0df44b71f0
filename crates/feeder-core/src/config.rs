//! TOML configuration for both daemon roles.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::broker::BrokerAddr;

/// Longest client id the backend registry accepts.
pub const MAX_CLIENT_ID_LEN: usize = 60;

/// Longest software version the backend registry accepts.
pub const MAX_SOFTWARE_VERSION_LEN: usize = 60;

/// Shortest keep-alive interval the MQTT client supports.
pub const MIN_KEEP_ALIVE_SECS: u16 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub server: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    #[serde(default = "default_retry_delay")]
    pub connect_retry_delay_secs: u16,
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub data_dir: PathBuf,
    /// Milliseconds the actuator has to turn to drop one portion.
    pub portion_ms: u64,
    /// GPIO pin driving the feeder servo.
    #[serde(default = "default_servo_pin")]
    pub servo_pin: u8,
    #[serde(default = "default_software_version")]
    pub software_version: String,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub data_dir: PathBuf,
    pub mqtt: MqttConfig,
}

fn default_keep_alive() -> u16 {
    30
}

fn default_retry_delay() -> u16 {
    5
}

fn default_publish_timeout() -> u16 {
    10
}

fn default_servo_pin() -> u8 {
    17
}

fn default_software_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

impl MqttConfig {
    pub fn broker(&self) -> Result<BrokerAddr, ConfigError> {
        BrokerAddr::parse(&self.server).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.into())
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_secs(self.connect_retry_delay_secs.into())
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs.into())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker()?;
        if self.client_id.is_empty() {
            return Err(ConfigError::Invalid("mqtt.client_id is required".into()));
        }
        if self.client_id.len() > MAX_CLIENT_ID_LEN {
            return Err(ConfigError::Invalid(format!(
                "mqtt.client_id must be at most {MAX_CLIENT_ID_LEN} characters"
            )));
        }
        if self.client_id.contains(['/', '+', '#']) {
            return Err(ConfigError::Invalid(
                "mqtt.client_id must not contain '/', '+' or '#'".into(),
            ));
        }
        if self.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::Invalid(format!(
                "mqtt.keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}"
            )));
        }
        if self.connect_retry_delay_secs == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.connect_retry_delay_secs must be > 0".into(),
            ));
        }
        if self.publish_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.publish_timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl DeviceConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: DeviceConfig = toml::from_str(&read(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn portion_duration(&self) -> Duration {
        Duration::from_millis(self.portion_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.portion_ms == 0 {
            return Err(ConfigError::Invalid("portion_ms must be > 0".into()));
        }
        if self.servo_pin == 0 {
            return Err(ConfigError::Invalid("servo_pin must be > 0".into()));
        }
        if self.software_version.len() > MAX_SOFTWARE_VERSION_LEN {
            return Err(ConfigError::Invalid(format!(
                "software_version must be at most {MAX_SOFTWARE_VERSION_LEN} characters"
            )));
        }
        self.mqtt.validate()
    }
}

impl BackendConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: BackendConfig = toml::from_str(&read(path)?)?;
        config.mqtt.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: &str = r#"
data_dir = "/var/lib/feeder"
portion_ms = 1200

[mqtt]
server = "tcp://broker.local:1883"
username = "feeder"
password = "secret"
client_id = "rpi-01"
keep_alive_secs = 15
"#;

    #[test]
    fn test_parse_device() {
        let config: DeviceConfig = toml::from_str(DEVICE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.portion_duration(), Duration::from_millis(1200));
        assert_eq!(config.mqtt.keep_alive(), Duration::from_secs(15));
        assert_eq!(config.mqtt.connect_retry_delay_secs, 5);
        assert_eq!(config.mqtt.username.as_deref(), Some("feeder"));
        assert_eq!(config.servo_pin, 17);
    }

    #[test]
    fn test_parse_backend_minimal() {
        let toml_str = r#"
data_dir = "./data"

[mqtt]
server = "localhost"
client_id = "feeder-backend"
"#;
        let config: BackendConfig = toml::from_str(toml_str).unwrap();
        config.mqtt.validate().unwrap();
        assert_eq!(config.mqtt.broker().unwrap().port, 1883);
        assert!(config.mqtt.password.is_none());
    }

    #[test]
    fn test_rejects_zero_portion() {
        let mut config: DeviceConfig = toml::from_str(DEVICE).unwrap();
        config.portion_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_long_client_id() {
        let mut config: DeviceConfig = toml::from_str(DEVICE).unwrap();
        config.mqtt.client_id = "x".repeat(61);
        assert!(config.validate().is_err());
        config.mqtt.client_id = "x".repeat(60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_long_software_version() {
        let mut config: DeviceConfig = toml::from_str(DEVICE).unwrap();
        config.software_version = "v".repeat(MAX_SOFTWARE_VERSION_LEN + 1);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.software_version = "v".repeat(MAX_SOFTWARE_VERSION_LEN);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_short_keep_alive() {
        let mut config: DeviceConfig = toml::from_str(DEVICE).unwrap();
        config.mqtt.keep_alive_secs = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_wildcard_client_id() {
        let mut config: DeviceConfig = toml::from_str(DEVICE).unwrap();
        config.mqtt.client_id = "rpi/01".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.toml");
        std::fs::write(&path, DEVICE).unwrap();
        let config = DeviceConfig::from_file(&path).unwrap();
        assert_eq!(config.mqtt.client_id, "rpi-01");

        let missing = DeviceConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
