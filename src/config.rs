//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `SCHOOLCOIN_*` environment overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig as ServerConfig;
use crate::store::StoreConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SQLite database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("schoolcoin").to_string_lossy().to_string())
        .unwrap_or_else(|| "./schoolcoin_data".to_string())
}

fn default_busy_timeout() -> u64 {
    5000 // 5 seconds
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,

    #[serde(default = "default_session_ttl")]
    pub session_ttl_hours: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_body_mb() -> usize {
    5
}

fn default_session_ttl() -> u64 {
    24
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            request_timeout_secs: default_request_timeout(),
            max_body_mb: default_max_body_mb(),
            session_ttl_hours: default_session_ttl(),
        }
    }
}

/// First super admin, created on startup when no profile has that email
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub super_admin_email: Option<String>,
    #[serde(default)]
    pub super_admin_password: Option<String>,
    #[serde(default = "default_super_admin_name")]
    pub super_admin_name: String,
}

fn default_super_admin_name() -> String {
    "Super Admin".to_string()
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            super_admin_email: None,
            super_admin_password: None,
            super_admin_name: default_super_admin_name(),
        }
    }
}

impl BootstrapConfig {
    /// Email and password, when both are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.super_admin_email, &self.super_admin_password) {
            (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
                Some((email, password))
            }
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        // Try default config locations
        let config_paths = [
            dirs::config_dir().map(|p| p.join("schoolcoin").join("config.toml")),
            Some(PathBuf::from("/etc/schoolcoin/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Database overrides
        if let Ok(data_dir) = std::env::var("SCHOOLCOIN_DATA_DIR") {
            self.database.data_dir = data_dir;
        }

        // API overrides
        if let Ok(host) = std::env::var("SCHOOLCOIN_API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("SCHOOLCOIN_API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }
        if let Ok(ttl) = std::env::var("SCHOOLCOIN_SESSION_TTL_HOURS") {
            if let Ok(h) = ttl.parse() {
                self.api.session_ttl_hours = h;
            }
        }

        // Bootstrap overrides
        if let Ok(email) = std::env::var("SCHOOLCOIN_ADMIN_EMAIL") {
            self.bootstrap.super_admin_email = Some(email);
        }
        if let Ok(password) = std::env::var("SCHOOLCOIN_ADMIN_PASSWORD") {
            self.bootstrap.super_admin_password = Some(password);
        }

        // Logging overrides
        if let Ok(level) = std::env::var("SCHOOLCOIN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SCHOOLCOIN_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Settings for opening the store
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: expand_home(&self.database.data_dir),
            busy_timeout_ms: self.database.busy_timeout_ms,
        }
    }

    /// Settings for the HTTP server
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.api.host.clone(),
            port: self.api.port,
            request_timeout_ms: self.api.request_timeout_secs.saturating_mul(1000),
            max_body_size: self.api.max_body_mb.saturating_mul(1024 * 1024),
            session_ttl: Duration::from_secs(self.api.session_ttl_hours.saturating_mul(3600)),
            cors_origins: self.api.cors_origins.clone(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# SchoolCoin Configuration
#
# Environment variables override these settings:
# - SCHOOLCOIN_DATA_DIR
# - SCHOOLCOIN_API_HOST
# - SCHOOLCOIN_API_PORT
# - SCHOOLCOIN_SESSION_TTL_HOURS
# - SCHOOLCOIN_ADMIN_EMAIL
# - SCHOOLCOIN_ADMIN_PASSWORD
# - SCHOOLCOIN_LOG_LEVEL
# - SCHOOLCOIN_LOG_FORMAT

[database]
# Directory holding schoolcoin.db
data_dir = "~/.local/share/schoolcoin"

# How long a writer waits for the database lock (ms)
busy_timeout_ms = 5000

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8080

# Allowed CORS origins (empty allows any)
cors_origins = []

# Request timeout in seconds
request_timeout_secs = 30

# Largest accepted request body, CSV imports included (MB)
max_body_mb = 5

# Lifetime of login tokens (hours)
session_ttl_hours = 24

[bootstrap]
# Super admin created on first start if the email is unknown
# super_admin_email = "admin@example.com"
# super_admin_password = "change-me-please"
super_admin_name = "Super Admin"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = Config::parse(
            r#"
            [api]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.api.session_ttl_hours, 24);
        assert_eq!(config.logging.format, "pretty");
        assert!(config.bootstrap.credentials().is_none());
    }

    #[test]
    fn test_generated_config_parses() {
        let config = Config::parse(&generate_default_config()).unwrap();
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.api.max_body_mb, 5);
        assert!(config.api.cors_origins.is_empty());
    }

    #[test]
    fn test_server_config_conversion() {
        let mut config = Config::default();
        config.api.request_timeout_secs = 10;
        config.api.session_ttl_hours = 2;

        let server = config.server_config();
        assert_eq!(server.request_timeout_ms, 10_000);
        assert_eq!(server.session_ttl, Duration::from_secs(7200));
        assert_eq!(server.addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_bootstrap_credentials() {
        let config = Config::parse(
            r#"
            [bootstrap]
            super_admin_email = "root@example.com"
            super_admin_password = "long-enough-secret"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.bootstrap.credentials(),
            Some(("root@example.com", "long-enough-secret"))
        );
        assert_eq!(config.bootstrap.super_admin_name, "Super Admin");
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/var/lib/schoolcoin"), PathBuf::from("/var/lib/schoolcoin"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/data"), home.join("data"));
        }
    }
}
