//! Server configuration: listen address from the first argument, everything else from
//! `SIGNAL_*` environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use log::LevelFilter;
use thiserror::Error;

use crate::engine::{EngineConfig, IceServer};

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_WS_PATH: &str = "ws";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address {value:?}: {source}")]
    Address {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServerConfig {
    pub address: SocketAddr,
    /// Single path segment the websocket is served on.
    pub ws_path: String,
    pub engine: EngineConfig,
    pub negotiation_timeout: Duration,
    /// Empty means any origin may connect.
    pub allowed_origins: Vec<String>,
    pub log_level: LevelFilter,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        ServerConfig::from_lookup(std::env::args().nth(1), |key| std::env::var(key).ok())
    }

    /// Build the configuration from an optional address argument and a variable lookup.
    pub fn from_lookup<F>(address: Option<String>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = address.unwrap_or_else(|| DEFAULT_ADDRESS.to_owned());
        let address = SocketAddr::from_str(&address).map_err(|source| ConfigError::Address {
            value: address.clone(),
            source,
        })?;

        let ws_path = lookup("SIGNAL_WS_PATH").unwrap_or_else(|| DEFAULT_WS_PATH.to_owned());
        let ws_path = ws_path.trim_matches('/').to_owned();
        if ws_path.is_empty() || ws_path.contains('/') {
            return Err(ConfigError::Invalid {
                key: "SIGNAL_WS_PATH",
                value: ws_path,
            });
        }

        let urls = match lookup("SIGNAL_ICE_SERVERS") {
            Some(value) => split_list(&value),
            None => vec![DEFAULT_STUN_SERVER.to_owned()],
        };
        for url in &urls {
            if !["stun:", "stuns:", "turn:", "turns:"]
                .iter()
                .any(|scheme| url.starts_with(scheme))
            {
                return Err(ConfigError::Invalid {
                    key: "SIGNAL_ICE_SERVERS",
                    value: url.clone(),
                });
            }
        }
        let ice_servers = if urls.is_empty() {
            Vec::new()
        } else {
            vec![IceServer {
                urls,
                username: lookup("SIGNAL_ICE_USERNAME"),
                credential: lookup("SIGNAL_ICE_CREDENTIAL"),
            }]
        };

        let negotiation_timeout = match lookup("SIGNAL_NEGOTIATION_TIMEOUT_SECS") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "SIGNAL_NEGOTIATION_TIMEOUT_SECS",
                        value,
                    })
                }
            },
            None => DEFAULT_NEGOTIATION_TIMEOUT,
        };

        let allowed_origins = lookup("SIGNAL_ALLOWED_ORIGINS")
            .map(|value| split_list(&value))
            .unwrap_or_default();

        let log_level = match lookup("SIGNAL_LOG_LEVEL") {
            Some(value) => {
                LevelFilter::from_str(value.trim()).map_err(|_| ConfigError::Invalid {
                    key: "SIGNAL_LOG_LEVEL",
                    value,
                })?
            }
            None => LevelFilter::Debug,
        };

        Ok(ServerConfig {
            address,
            ws_path,
            engine: EngineConfig { ice_servers },
            negotiation_timeout,
            allowed_origins,
            log_level,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn config(address: Option<&str>, vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(address.map(str::to_owned), |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(None, &[]).unwrap();
        assert_eq!(config.address, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.ws_path, "ws");
        assert_eq!(
            config.engine.ice_servers,
            vec![IceServer {
                urls: vec![DEFAULT_STUN_SERVER.to_owned()],
                username: None,
                credential: None,
            }]
        );
        assert_eq!(config.negotiation_timeout, Duration::from_secs(10));
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[test]
    fn test_overrides() {
        let config = config(
            Some("0.0.0.0:9000"),
            &[
                ("SIGNAL_WS_PATH", "/signal/"),
                (
                    "SIGNAL_ICE_SERVERS",
                    "stun:stun.example.org:3478, turn:turn.example.org:3478",
                ),
                ("SIGNAL_ICE_USERNAME", "alice"),
                ("SIGNAL_ICE_CREDENTIAL", "hunter2"),
                ("SIGNAL_NEGOTIATION_TIMEOUT_SECS", "3"),
                (
                    "SIGNAL_ALLOWED_ORIGINS",
                    "https://a.example.org,https://b.example.org",
                ),
                ("SIGNAL_LOG_LEVEL", "warn"),
            ],
        )
        .unwrap();
        assert_eq!(config.address.port(), 9000);
        assert_eq!(config.ws_path, "signal");
        assert_eq!(config.engine.ice_servers.len(), 1);
        assert_eq!(config.engine.ice_servers[0].urls.len(), 2);
        assert_eq!(
            config.engine.ice_servers[0].username.as_deref(),
            Some("alice")
        );
        assert_eq!(config.negotiation_timeout, Duration::from_secs(3));
        assert_eq!(config.allowed_origins.len(), 2);
        assert_eq!(config.log_level, LevelFilter::Warn);
    }

    #[test]
    fn test_empty_ice_server_list_disables_ice_servers() {
        let config = config(None, &[("SIGNAL_ICE_SERVERS", "")]).unwrap();
        assert!(config.engine.ice_servers.is_empty());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config(Some("localhost"), &[]),
            Err(ConfigError::Address { .. })
        ));
        for (key, value) in [
            ("SIGNAL_WS_PATH", "a/b"),
            ("SIGNAL_WS_PATH", "/"),
            ("SIGNAL_ICE_SERVERS", "http://stun.example.org"),
            ("SIGNAL_NEGOTIATION_TIMEOUT_SECS", "0"),
            ("SIGNAL_NEGOTIATION_TIMEOUT_SECS", "soon"),
            ("SIGNAL_LOG_LEVEL", "loud"),
        ] {
            match config(None, &[(key, value)]) {
                Err(ConfigError::Invalid { key: reported, .. }) => assert_eq!(reported, key),
                other => panic!("{key}={value} accepted: {other:?}"),
            }
        }
    }
}
