//! Gateway configuration loading.
//!
//! Environment variables are the sole config source, read once at startup.
//!
//! # Required
//! - `API_BASE_URL` — base URL of the persistence service
//! - `JWT_SECRET` — HS256 signing secret shared with the token issuer
//!
//! # Optional (with defaults)
//! - `BIND_ADDR` (`0.0.0.0:8080`)
//! - `API_TIMEOUT_MS` (`8000`)
//! - `REDIS_URL` — absent selects the in-process loopback broker
//! - `HEARTBEAT_INTERVAL_SECS` (`30`); sessions idle for three intervals
//!   are closed
//! - `SERVICE_NAME` (`im-gateway`) — sent as `X-Internal-Service`

use std::env;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub api_base_url: String,
    pub api_timeout: Duration,
    pub redis_url: Option<String>,
    pub heartbeat_interval: Duration,
    pub jwt_secret: String,
    pub service_name: String,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url =
            env::var("API_BASE_URL").map_err(|_| ConfigError::Missing("API_BASE_URL"))?;
        let jwt_secret = env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
        let api_timeout_ms = parse_var("API_TIMEOUT_MS", 8_000, "integer (milliseconds)")?;
        let heartbeat_secs = parse_var("HEARTBEAT_INTERVAL_SECS", 30, "integer (seconds)")?;
        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            api_base_url,
            api_timeout: Duration::from_millis(api_timeout_ms),
            redis_url: env::var("REDIS_URL").ok(),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            jwt_secret,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "im-gateway".to_owned()),
        })
    }

    /// Idle window after which a silent connection is closed.
    pub fn idle_timeout(&self) -> Duration {
        self.heartbeat_interval * 3
    }
}

fn parse_var(var: &'static str, default: u64, expected: &'static str) -> Result<u64, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { var, expected }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timeout_is_three_heartbeat_intervals() {
        let cfg = GatewayConfig {
            bind_addr: "127.0.0.1:0".to_owned(),
            api_base_url: "http://127.0.0.1:1".to_owned(),
            api_timeout: Duration::from_secs(2),
            redis_url: None,
            heartbeat_interval: Duration::from_secs(30),
            jwt_secret: "test-secret".to_owned(),
            service_name: "im-gateway-test".to_owned(),
        };
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(90));
    }
}
