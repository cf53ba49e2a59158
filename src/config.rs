use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::{bail, Context};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            other => bail!("unknown store backend {other:?}, expected mongo or memory"),
        }
    }
}

/// Knobs for the websocket gateway.
#[derive(Debug, Clone, Copy)]
pub struct RealtimeConfig {
    pub max_handles_per_user: usize,
    pub max_rooms_per_connection: usize,
    /// How long an upgraded but unauthenticated connection may stay open.
    pub auth_grace: Duration,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_handles_per_user: 8,
            max_rooms_per_connection: 64,
            auth_grace: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(10),
            outbound_buffer: 256,
        }
    }
}

pub struct Config {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    pub mongo_url: String,
    pub mongo_db: String,
    pub secret_key: String,
    pub redis_url: Option<String>,
    pub redis_channel: String,
    pub cors_origin: Option<String>,
    pub realtime: RealtimeConfig,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let defaults = RealtimeConfig::default();

        let realtime = RealtimeConfig {
            max_handles_per_user: try_load("MAX_HANDLES_PER_USER", defaults.max_handles_per_user)?,
            max_rooms_per_connection: try_load(
                "MAX_ROOMS_PER_CONNECTION",
                defaults.max_rooms_per_connection,
            )?,
            auth_grace: Duration::from_secs(try_load(
                "WS_AUTH_GRACE_SECS",
                defaults.auth_grace.as_secs(),
            )?),
            heartbeat_interval: Duration::from_secs(try_load(
                "WS_HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )?),
            client_timeout: Duration::from_secs(try_load(
                "WS_CLIENT_TIMEOUT_SECS",
                defaults.client_timeout.as_secs(),
            )?),
            outbound_buffer: try_load("WS_OUTBOUND_BUFFER", defaults.outbound_buffer)?,
        };

        if realtime.max_handles_per_user == 0 || realtime.outbound_buffer == 0 {
            bail!("MAX_HANDLES_PER_USER and WS_OUTBOUND_BUFFER must be positive");
        }

        if realtime.client_timeout <= realtime.heartbeat_interval {
            warn!("WS_CLIENT_TIMEOUT_SECS should exceed WS_HEARTBEAT_SECS");
        }

        Ok(Self {
            host: try_load("HOST", "0.0.0.0".to_string())?,
            port: try_load("PORT", 3030)?,
            store: try_load("STORE", StoreBackend::Mongo)?,
            mongo_url: try_load("MONGO_URL", "mongodb://localhost:27017".to_string())?,
            mongo_db: try_load("MONGO_DB", "dine_with_locals".to_string())?,
            secret_key: env::var("SECRET_KEY").context("SECRET_KEY must be set")?,
            redis_url: optional("REDIS_URL"),
            redis_channel: try_load("REDIS_CHANNEL", "dwl:realtime".to_string())?,
            cors_origin: optional("CORS_ORIGIN"),
            realtime,
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr + std::fmt::Debug,
    T::Err: Display,
{
    match optional(key) {
        Some(raw) => raw
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid {key} value {raw:?}: {err}")),
        None => {
            info!("{key} not set, using default: {default:?}");
            Ok(default)
        }
    }
}
