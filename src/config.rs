//! Server configuration, loaded from environment variables.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::signaling::{DEFAULT_SIGNALING_PORT, Keepalive, RelayConfig};

pub const DEFAULT_NEGOTIATION_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_PING_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_PONG_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket bind address (default: "0.0.0.0:8443").
    pub bind_address: String,

    /// Seconds an endpoint may take from creation to connected.
    pub negotiation_timeout_seconds: u64,

    pub ping_interval_seconds: u64,

    pub pong_timeout_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("CHORUS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_SIGNALING_PORT));

        let negotiation_timeout_seconds = parse_seconds(
            vars,
            "CHORUS_NEGOTIATION_TIMEOUT_SECONDS",
            DEFAULT_NEGOTIATION_TIMEOUT_SECONDS,
        )?;
        let ping_interval_seconds = parse_seconds(
            vars,
            "CHORUS_PING_INTERVAL_SECONDS",
            DEFAULT_PING_INTERVAL_SECONDS,
        )?;
        let pong_timeout_seconds = parse_seconds(
            vars,
            "CHORUS_PONG_TIMEOUT_SECONDS",
            DEFAULT_PONG_TIMEOUT_SECONDS,
        )?;

        Ok(Config {
            bind_address,
            negotiation_timeout_seconds,
            ping_interval_seconds,
            pong_timeout_seconds,
        })
    }

    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            negotiation_timeout: Duration::from_secs(self.negotiation_timeout_seconds),
        }
    }

    pub fn keepalive(&self) -> Keepalive {
        Keepalive {
            ping_interval: Duration::from_secs(self.ping_interval_seconds),
            pong_timeout: Duration::from_secs(self.pong_timeout_seconds),
        }
    }
}

/// Positive number of seconds, or `default` when unset.
fn parse_seconds(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue(format!("{key} must be greater than 0"))),
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::InvalidValue(format!("{key}={raw}: {e}"))),
    }
}
