//! Configuration
//!
//! TOML-based configuration with support for:
//! - Server settings (bind address, TLS)
//! - Connection limits
//! - Session parameters
//! - Authentication users
//! - Metrics exporter
//! - `${VAR}` / `${VAR:-default}` substitution and CEDARMQ_* env overrides

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

#[cfg(test)]
mod tests;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading the config file
    Io(std::io::Error),
    /// Config crate error (parsing/merging)
    Config(config::ConfigError),
    /// Semantic validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Server configuration
    pub server: ServerConfig,
    /// Connection limits
    pub limits: LimitsConfig,
    /// Session configuration
    pub session: SessionConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP bind address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// TLS bind address (optional, enables MQTT over TLS)
    pub tls_bind: Option<SocketAddr>,
    /// TLS configuration (required when tls_bind is set)
    #[serde(default)]
    pub tls: Option<ServerTlsConfig>,
}

/// TLS configuration for the server
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerTlsConfig {
    /// Path to certificate file (PEM format)
    pub cert: String,
    /// Path to private key file (PEM format)
    pub key: String,
    /// Path to CA certificate file for client authentication (optional)
    pub ca_cert: Option<String>,
    /// Require client certificate authentication
    #[serde(default)]
    pub require_client_cert: bool,
}

fn default_bind() -> SocketAddr {
    "0.0.0.0:1883".parse().unwrap()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            tls_bind: None,
            tls: None,
        }
    }
}

/// Connection limits configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum packet size in bytes
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// Maximum accepted client identifier length in bytes.
    /// [MQTT-3.1.3-5] only requires 23; longer identifiers are common in
    /// the wild, so the default is deliberately larger.
    #[serde(default = "default_max_client_id_len")]
    pub max_client_id_len: usize,
    /// How long a fresh connection may take to send CONNECT
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_max_connections() -> usize {
    100_000
}
fn default_max_packet_size() -> usize {
    1024 * 1024
}
fn default_max_client_id_len() -> usize {
    64
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_packet_size: default_max_packet_size(),
            max_client_id_len: default_max_client_id_len(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum keep alive in seconds a client may request
    #[serde(default = "default_max_keep_alive")]
    pub max_keep_alive: u16,
}

fn default_max_keep_alive() -> u16 {
    65535
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_keep_alive: default_max_keep_alive(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether username/password checking is enabled
    pub enabled: bool,
    /// Configured users
    pub users: Vec<UserEntry>,
}

/// One configured user
#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub username: String,
    pub password: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the metrics HTTP exporter is enabled
    pub enabled: bool,
    /// Exporter bind address
    #[serde(default = "default_metrics_bind")]
    pub bind: SocketAddr,
}

fn default_metrics_bind() -> SocketAddr {
    "127.0.0.1:9090".parse().unwrap()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_metrics_bind(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, applying env substitution and
    /// CEDARMQ_* environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        let cfg = config::Config::builder()
            .add_source(File::from_str(&substituted, FileFormat::Toml))
            .add_source(Environment::with_prefix("CEDARMQ").separator("__"))
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond what serde enforces
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.tls_bind.is_some() && self.server.tls.is_none() {
            return Err(ConfigError::Validation(
                "server.tls is required when server.tls_bind is set".to_string(),
            ));
        }

        if self.limits.max_packet_size == 0 {
            return Err(ConfigError::Validation(
                "limits.max_packet_size must be greater than zero".to_string(),
            ));
        }

        if self.limits.max_client_id_len == 0 {
            return Err(ConfigError::Validation(
                "limits.max_client_id_len must be greater than zero".to_string(),
            ));
        }

        if self.auth.enabled && self.auth.users.is_empty() {
            return Err(ConfigError::Validation(
                "auth.enabled requires at least one configured user".to_string(),
            ));
        }

        Ok(())
    }
}
