//! Broker address parsing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 1883;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerAddr {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerAddrError {
    #[error("unsupported broker scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid broker address: {0}")]
    Invalid(String),
}

impl BrokerAddr {
    /// Accepts `tcp://host:port`, `mqtt://host:port` or bare `host[:port]`.
    pub fn parse(server: &str) -> Result<Self, BrokerAddrError> {
        let rest = match server.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => rest,
            Some((scheme, _)) => return Err(BrokerAddrError::UnsupportedScheme(scheme.to_string())),
            None => server,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| BrokerAddrError::Invalid(server.to_string()))?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };

        if host.is_empty() || host.contains('/') {
            return Err(BrokerAddrError::Invalid(server.to_string()));
        }

        Ok(BrokerAddr {
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for BrokerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
