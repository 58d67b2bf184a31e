//! Server Configuration
//!
//! Defaults suit a local install next to the game client; every value
//! can be overridden from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::core::entity::EntityId;
use crate::game::buffer::{DEFAULT_BUFFER_CAP, DEFAULT_QUORUM};

/// The game client pushes to this port and it cannot be changed.
pub const DEFAULT_GSI_ADDR: &str = "0.0.0.0:3000";

/// Realtime subscriber socket.
pub const DEFAULT_WS_ADDR: &str = "0.0.0.0:3001";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
    },
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Distinct fresh entities needed to start a match
    pub quorum: usize,
    /// Pre-match retention cap
    pub buffer_cap: usize,
    /// Client owner, for abandonment detection. `None` disables it.
    pub owner: Option<EntityId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quorum: DEFAULT_QUORUM,
            buffer_cap: DEFAULT_BUFFER_CAP,
            owner: None,
        }
    }
}

/// Full server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP ingest and REST API
    pub gsi_addr: SocketAddr,
    /// WebSocket subscribers
    pub ws_addr: SocketAddr,
    /// Maximum concurrent WebSocket subscribers
    pub max_subscribers: usize,
    /// How long shutdown waits for the write queue to drain
    pub shutdown_drain_timeout: Duration,
    /// Engine settings
    pub engine: EngineConfig,
    /// Server version string
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            gsi_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            ws_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            max_subscribers: 100,
            shutdown_drain_timeout: Duration::from_secs(5),
            engine: EngineConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from any key lookup. Unset keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let defaults = Self::default();
        let owner = match parse::<u64, _>(&lookup, "OWNER_ACCOUNT_ID")?.filter(|id| *id != 0) {
            Some(account) => Some(EntityId::from_account(account).ok_or_else(|| {
                ConfigError::Invalid { name: "OWNER_ACCOUNT_ID", value: account.to_string() }
            })?),
            None => None,
        };

        Ok(Self {
            gsi_addr: parse(&lookup, "GSI_BIND_ADDR")?.unwrap_or(defaults.gsi_addr),
            ws_addr: parse(&lookup, "WS_BIND_ADDR")?.unwrap_or(defaults.ws_addr),
            max_subscribers: parse(&lookup, "WS_MAX_SUBSCRIBERS")?
                .unwrap_or(defaults.max_subscribers),
            shutdown_drain_timeout: parse(&lookup, "SHUTDOWN_DRAIN_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_drain_timeout),
            engine: EngineConfig {
                quorum: parse(&lookup, "QUORUM_SIZE")?.unwrap_or(defaults.engine.quorum),
                buffer_cap: parse(&lookup, "PRE_MATCH_BUFFER_CAP")?
                    .unwrap_or(defaults.engine.buffer_cap),
                owner,
            },
            version: defaults.version,
        })
    }
}

fn parse<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}
