//! Bootstrap configuration loading
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables (`KITCHEN_*`)
//! 3. TOML configuration file
//! 4. Built-in defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "KITCHEN_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Aggregation engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded worker pool size for batch re-aggregation
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Event bus capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Per-caller request budget for the batch inference endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_requests")]
    pub requests: u32,

    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accepted distance between request timestamp and server clock
    #[serde(default = "default_max_clock_skew_ms")]
    pub max_clock_skew_ms: i64,
}

/// External inference capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// HTTP endpoint; keyword matching is used when absent
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,

    /// Outbound pacing towards the inference service
    #[serde(default = "default_inference_rps")]
    pub requests_per_second: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Upper bound for retrying writes that hit `database is locked`
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("kitchen").join("kitchen.db"))
        .unwrap_or_else(|| PathBuf::from("./kitchen_data/kitchen.db"))
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5740
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_event_capacity() -> usize {
    256
}

fn default_rate_limit_requests() -> u32 {
    10
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_max_clock_skew_ms() -> i64 {
    30_000
}

fn default_inference_timeout_secs() -> u64 {
    20
}

fn default_inference_rps() -> u32 {
    5
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

fn default_max_connections() -> u32 {
    8
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_rate_limit_requests(),
            window_secs: default_rate_limit_window_secs(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { max_clock_skew_ms: default_max_clock_skew_ms() }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_secs: default_inference_timeout_secs(),
            requests_per_second: default_inference_rps(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_lock_wait_ms: default_max_lock_wait_ms(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_address: default_bind_address(),
            port: default_port(),
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
            inference: InferenceConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load from an explicit file path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Resolve the effective configuration
    ///
    /// `cli_path` wins over `$KITCHEN_CONFIG`, which wins over the per-user
    /// config file. A missing default file is not an error; a missing
    /// explicitly named file is.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let explicit = cli_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => {
                    info!("Loading configuration from {}", path.display());
                    Self::from_file(&path)?
                }
                None => {
                    debug!("No configuration file found, using built-in defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KITCHEN_*` environment variables on top of file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("KITCHEN_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(port) = std::env::var("KITCHEN_PORT") {
            self.port = port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid KITCHEN_PORT '{}': {}", port, e)))?;
        }
        if let Ok(size) = std::env::var("KITCHEN_WORKER_POOL_SIZE") {
            self.engine.worker_pool_size = size.parse().map_err(|e| {
                Error::Config(format!("Invalid KITCHEN_WORKER_POOL_SIZE '{}': {}", size, e))
            })?;
        }
        if let Ok(endpoint) = std::env::var("KITCHEN_INFERENCE_ENDPOINT") {
            self.inference.endpoint = Some(endpoint);
        }
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.worker_pool_size == 0 {
            return Err(Error::Config("engine.worker_pool_size must be at least 1".to_string()));
        }
        if self.rate_limit.requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(Error::Config(
                "rate_limit.requests and rate_limit.window_secs must be non-zero".to_string(),
            ));
        }
        if self.inference.requests_per_second == 0 {
            return Err(Error::Config("inference.requests_per_second must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Per-user config file location (`<config_dir>/kitchen/allergens.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("kitchen").join("allergens.toml"))
}
