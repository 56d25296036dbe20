//! Configuration for WaBlast

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Campaign dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Message gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: "postgres" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

/// Campaign dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Drive the poll from an internal ticker instead of an external cron
    #[serde(default = "default_internal_ticker")]
    pub internal_ticker: bool,

    /// Interval between internal polls (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum campaigns handled per scan per tick
    #[serde(default = "default_batch_limit")]
    pub batch_limit: i64,

    /// A processing campaign with no progress for this long is reclaimed
    #[serde(default = "default_stalled_after")]
    pub stalled_after_secs: u64,

    /// Default lower bound of the per-message delay (seconds)
    #[serde(default = "default_min_delay")]
    pub default_min_delay: i32,

    /// Default upper bound of the per-message delay (seconds)
    #[serde(default = "default_max_delay")]
    pub default_max_delay: i32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            internal_ticker: default_internal_ticker(),
            poll_interval_secs: default_poll_interval(),
            batch_limit: default_batch_limit(),
            stalled_after_secs: default_stalled_after(),
            default_min_delay: default_min_delay(),
            default_max_delay: default_max_delay(),
        }
    }
}

fn default_internal_ticker() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    60
}

fn default_batch_limit() -> i64 {
    10
}

fn default_stalled_after() -> u64 {
    15 * 60
}

fn default_min_delay() -> i32 {
    1
}

fn default_max_delay() -> i32 {
    5
}

/// Message gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway base URL
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    /// API key sent in the `apikey` header
    pub api_key: Option<String>,

    /// Send path template; `{instance}` is replaced by the campaign instance
    #[serde(default = "default_send_path")]
    pub send_path: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            api_key: None,
            send_path: default_send_path(),
            timeout_secs: default_gateway_timeout(),
        }
    }
}

fn default_gateway_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_send_path() -> String {
    "/message/send/{instance}".to_string()
}

fn default_gateway_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from an optional file overlaid with environment
    ///
    /// Environment variables use the form `WABLAST__DISPATCH__BATCH_LIMIT=20`.
    pub fn load() -> crate::Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = Self::locate_file() {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder
            .add_source(
                ::config::Environment::with_prefix("WABLAST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))
    }

    fn locate_file() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var("WABLAST_CONFIG") {
            return Some(PathBuf::from(explicit));
        }

        [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/wablast/config.toml"),
        ]
        .into_iter()
        .find(|p| p.exists())
    }
}
