//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::net::IpAddr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::store::BackendKind;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Worker pool settings.
    #[serde(default)]
    pub thread_pool: ThreadPoolConfig,

    /// Client settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid bind address '{}'. Must be an IPv4 or IPv6 address",
                    self.server.bind_address
                ),
            });
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::ValidationError {
                message: "max_connections must be at least 1".to_string(),
            });
        }
        if self.server.max_frame_size < 16 {
            return Err(ConfigError::ValidationError {
                message: "max_frame_size must be at least 16 bytes".to_string(),
            });
        }
        self.backend.kind()?;
        if self.thread_pool.shrink_interval_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "shrink_interval_secs must be at least 1".to_string(),
            });
        }
        if self.client.conditions == 0 {
            return Err(ConfigError::ValidationError {
                message: "client conditions must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// TCP port. `0` picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of concurrently authenticated users.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Largest accepted frame, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    12345
}

const fn default_max_connections() -> usize {
    16
}

const fn default_max_frame_size() -> usize {
    crate::protocol::DEFAULT_MAX_FRAME_SIZE
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Backend name: "simple", "multi_condition" or "sharded".
    #[serde(default = "default_backend")]
    pub kind: String,

    /// Number of shards (sharded backend only).
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl BackendConfig {
    /// Resolves the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown backend names or a zero shard count.
    pub fn kind(&self) -> Result<BackendKind, ConfigError> {
        BackendKind::from_name(&self.kind, self.shards).ok_or_else(|| {
            ConfigError::ValidationError {
                message: format!(
                    "Invalid backend '{}' (shards = {}). Must be one of: simple, multi_condition, sharded (with shards > 0)",
                    self.kind, self.shards
                ),
            }
        })
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend(),
            shards: default_shards(),
        }
    }
}

fn default_backend() -> String {
    "multi_condition".to_string()
}

const fn default_shards() -> usize {
    64
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadPoolConfig {
    /// Minimum time between two pool shrinks, in seconds.
    #[serde(default = "default_shrink_interval")]
    pub shrink_interval_secs: u64,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            shrink_interval_secs: default_shrink_interval(),
        }
    }
}

const fn default_shrink_interval() -> u64 {
    30
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Number of conditions reply waiters are spread over.
    #[serde(default = "default_conditions")]
    pub conditions: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            conditions: default_conditions(),
        }
    }
}

const fn default_conditions() -> usize {
    32
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
