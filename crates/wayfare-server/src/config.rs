//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Realtime chat tunables.
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "wayfare_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Realtime chat configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Seconds between server pings on each connection.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Extra silence tolerated after a missed heartbeat before the
    /// connection is dropped.
    #[serde(default = "default_heartbeat_grace_secs")]
    pub heartbeat_grace_secs: u64,

    /// Seconds after the last `typing: true` before typing stops on its own.
    #[serde(default = "default_typing_timeout_secs")]
    pub typing_timeout_secs: u64,

    /// Frames buffered per connection before a slow consumer starts
    /// losing them.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Upper bound for the `limit` parameter of history requests.
    #[serde(default = "default_history_limit_max")]
    pub history_limit_max: u32,
}

impl ChatConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Maximum silence before a connection is considered dead.
    pub fn idle_timeout(&self) -> Duration {
        self.heartbeat_interval() + Duration::from_secs(self.heartbeat_grace_secs)
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_secs(self.typing_timeout_secs.max(1))
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "wayfare.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    25
}

fn default_heartbeat_grace_secs() -> u64 {
    10
}

fn default_typing_timeout_secs() -> u64 {
    5
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_history_limit_max() -> u32 {
    wayfare_chat::MAX_HISTORY_LIMIT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_grace_secs: default_heartbeat_grace_secs(),
            typing_timeout_secs: default_typing_timeout_secs(),
            outbound_buffer: default_outbound_buffer(),
            history_limit_max: default_history_limit_max(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `WAYFARE_HOST` overrides `server.host`
/// - `WAYFARE_PORT` overrides `server.port`
/// - `WAYFARE_DB_PATH` overrides `database.path`
/// - `WAYFARE_LOG_LEVEL` overrides `logging.level`
/// - `WAYFARE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => parse_config(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(host) = std::env::var("WAYFARE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("WAYFARE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("WAYFARE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("WAYFARE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("WAYFARE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}

/// Parses a TOML document into a [`Config`], filling in defaults.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(contents)?)
}
