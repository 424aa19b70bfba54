//! Relay configuration, read from the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_WS_PATH: &str = "/ws";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Request path that accepts WebSocket upgrades
    pub ws_path: String,
    /// How often each connection is pinged
    pub ping_interval: Duration,
    /// How long to wait for a Pong before dropping the connection
    pub pong_timeout: Duration,
    /// Per-peer outbound queue depth; messages beyond it are dropped
    pub outbound_queue: usize,
    /// Also send `{"type":"ping"}` text frames for clients that cannot see
    /// control frames
    pub app_keepalive: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            ws_path: DEFAULT_WS_PATH.to_string(),
            ping_interval: Duration::from_secs(25),
            pong_timeout: Duration::from_secs(10),
            outbound_queue: 64,
            app_keepalive: true,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("RELAY_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, "PORT")? {
            config.port = port;
        }
        if let Some(path) = lookup("RELAY_WS_PATH") {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid {
                    var: "RELAY_WS_PATH",
                    value: path,
                });
            }
            config.ws_path = path;
        }
        if let Some(secs) = parse_secs(&lookup, "RELAY_PING_INTERVAL_SECS")? {
            config.ping_interval = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "RELAY_PONG_TIMEOUT_SECS")? {
            config.pong_timeout = secs;
        }
        if let Some(depth) = parse_var::<usize, _>(&lookup, "RELAY_OUTBOUND_QUEUE")? {
            if depth == 0 {
                return Err(ConfigError::Invalid {
                    var: "RELAY_OUTBOUND_QUEUE",
                    value: depth.to_string(),
                });
            }
            config.outbound_queue = depth;
        }
        if let Some(flag) = parse_var(&lookup, "RELAY_APP_KEEPALIVE")? {
            config.app_keepalive = flag;
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn parse_secs<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var::<u64, F>(lookup, var)? {
        Some(0) => Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
        }),
        other => Ok(other.map(Duration::from_secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = RelayConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.ws_path, "/ws");
    }

    #[test]
    fn reads_overrides() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("RELAY_HOST", "127.0.0.1"),
            ("PORT", "9100"),
            ("RELAY_WS_PATH", "/signal"),
            ("RELAY_PING_INTERVAL_SECS", "5"),
            ("RELAY_PONG_TIMEOUT_SECS", "2"),
            ("RELAY_OUTBOUND_QUEUE", "8"),
            ("RELAY_APP_KEEPALIVE", "false"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr(), "127.0.0.1:9100");
        assert_eq!(config.ws_path, "/signal");
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.pong_timeout, Duration::from_secs(2));
        assert_eq!(config.outbound_queue, 8);
        assert!(!config.app_keepalive);
    }

    #[test]
    fn rejects_bad_port() {
        let err = RelayConfig::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "PORT",
                value: "eighty".to_string()
            }
        );
    }

    #[test]
    fn rejects_zero_queue_and_interval() {
        assert!(RelayConfig::from_lookup(lookup_from(&[("RELAY_OUTBOUND_QUEUE", "0")])).is_err());
        assert!(
            RelayConfig::from_lookup(lookup_from(&[("RELAY_PING_INTERVAL_SECS", "0")])).is_err()
        );
    }

    #[test]
    fn rejects_relative_path() {
        assert!(RelayConfig::from_lookup(lookup_from(&[("RELAY_WS_PATH", "ws")])).is_err());
    }
}
