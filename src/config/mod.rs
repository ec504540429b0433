//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::input::Script;
use crate::util::time::{DEFAULT_SUBSTEPS, DEFAULT_TICK_RATE};

/// Server configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// TCP address the game listener binds to
    pub game_addr: SocketAddr,
    /// HTTP address for health/status
    pub status_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Physics sub-steps per tick
    pub substeps: u32,
    /// Seed for spawn-point selection
    pub world_seed: u64,
    /// Maximum number of concurrently registered sessions
    pub max_sessions: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            game_addr: addr_var("GAME_ADDR", "0.0.0.0:8765")?,
            status_addr: addr_var("STATUS_ADDR", "0.0.0.0:8080")?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tick_rate: positive_var("TICK_RATE", DEFAULT_TICK_RATE)?,
            substeps: positive_var("SUBSTEPS", DEFAULT_SUBSTEPS)?,
            world_seed: parse_var("WORLD_SEED", 7)?,
            max_sessions: positive_var("MAX_SESSIONS", 32)?,
        })
    }
}

/// What the headless client pushes to the server each tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMode {
    /// Push the locally simulated car pose
    State,
    /// Push raw input and let the server integrate
    Input,
}

impl FromStr for SyncMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "state" => Ok(SyncMode::State),
            "input" => Ok(SyncMode::Input),
            _ => Err(()),
        }
    }
}

/// Headless client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub log_level: String,
    pub tick_rate: u32,
    pub substeps: u32,
    pub script: Script,
    pub sync: SyncMode,
    /// Ticks to run before exiting; 0 runs until disconnected
    pub ticks: u64,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server_addr: addr_var("SERVER_ADDR", "127.0.0.1:8765")?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tick_rate: positive_var("TICK_RATE", DEFAULT_TICK_RATE)?,
            substeps: positive_var("SUBSTEPS", DEFAULT_SUBSTEPS)?,
            script: parse_var("CLIENT_SCRIPT", Script::Circle)?,
            sync: parse_var("CLIENT_SYNC", SyncMode::State)?,
            ticks: parse_var("CLIENT_TICKS", 0)?,
        })
    }
}

fn addr_var(key: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(key))
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn positive_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let value = parse_var(key, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        reason: format!("cannot parse {:?}", raw),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Invalid address format in {0}")]
    InvalidAddress(&'static str),
}
