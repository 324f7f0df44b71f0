pub mod broker;
pub mod config;
pub mod topics;
pub mod types;

pub use broker::BrokerAddr;
pub use config::{BackendConfig, ConfigError, DeviceConfig, MqttConfig};
pub use topics::{TopicError, TopicKind};
pub use types::*;
