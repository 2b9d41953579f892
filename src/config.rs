// Configuration File Support
//
// TOML configuration for the quotagate service, with environment variable
// overrides. The file is read from --config, then $QUOTAGATE_CONFIG, then
// ./quotagate.toml; a missing file means defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::http::{RouteRule, RouteTable};
use crate::logging::LoggingConfig;
use crate::rate_limit::RateLimitConfig;

/// Default config file name, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "quotagate.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Ops server configuration
    pub server: ServerConfig,

    /// Bucket introspection endpoint
    pub introspection: IntrospectionConfig,

    /// Per-category limits
    pub rate_limit: RateLimitConfig,

    /// Gated routes; the food delivery defaults apply when empty
    pub routes: Vec<RouteRule>,
}

/// Ops server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8088,
        }
    }
}

/// Introspection endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntrospectionConfig {
    /// Whether the bucket listing is served at all
    pub enabled: bool,

    /// Bearer token operators must present (open access if unset)
    pub token: Option<String>,
}

impl Default for IntrospectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation.
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    /// Load configuration from a specific path
    ///
    /// A missing file yields the defaults (with environment overrides).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?
        } else {
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    pub fn config_path() -> PathBuf {
        std::env::var("QUOTAGATE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - QUOTAGATE_LOG_LEVEL
    /// - QUOTAGATE_LOG_FORMAT
    /// - QUOTAGATE_BIND
    /// - QUOTAGATE_PORT
    /// - QUOTAGATE_INTROSPECTION_TOKEN
    /// - the rate limit variables of [`RateLimitConfig::apply_env_overrides`]
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("QUOTAGATE_LOG_LEVEL") {
            if let Ok(level) = level.parse() {
                self.logging.level = level;
            }
        }
        if let Ok(format) = std::env::var("QUOTAGATE_LOG_FORMAT") {
            if let Ok(format) = format.parse() {
                self.logging.format = format;
            }
        }

        if let Ok(bind) = std::env::var("QUOTAGATE_BIND") {
            self.server.bind = bind;
        }
        if let Ok(port) = std::env::var("QUOTAGATE_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(token) = std::env::var("QUOTAGATE_INTROSPECTION_TOKEN") {
            if !token.is_empty() {
                self.introspection.token = Some(token);
            }
        }

        self.rate_limit = self.rate_limit.apply_env_overrides();
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        self.server
            .bind
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind))?;

        if matches!(&self.introspection.token, Some(token) if token.is_empty()) {
            anyhow::bail!("Introspection token must not be empty when set");
        }

        self.rate_limit.validate()?;
        self.route_table()?;

        Ok(())
    }

    /// Socket address for the ops server
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Route table for gated routes
    pub fn route_table(&self) -> Result<RouteTable> {
        if self.routes.is_empty() {
            Ok(RouteTable::food_delivery_defaults())
        } else {
            RouteTable::from_rules(&self.routes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogFormat, LogLevel};
    use crate::rate_limit::{Category, RefillMode};
    use axum::http::Method;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.server.port, 8088);
        assert!(config.introspection.enabled);
        assert!(config.introspection.token.is_none());
        assert!(config.rate_limit.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_from_path("/nonexistent/quotagate.toml").unwrap();
        assert_eq!(config.rate_limit.auth.capacity, 3);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logging]
format = "json"

[server]
bind = "127.0.0.1"
port = 9100

[introspection]
token = "ops-secret"

[rate_limit]
refill_mode = "smooth"

[rate_limit.auth]
capacity = 5
refill_rate = 5

[[routes]]
method = "POST"
path = "/api/orders"
category = "WRITE"
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:9100");
        assert_eq!(config.introspection.token.as_deref(), Some("ops-secret"));
        assert_eq!(config.rate_limit.refill_mode, RefillMode::Smooth);
        assert_eq!(config.rate_limit.auth.capacity, 5);
        assert_eq!(config.rate_limit.write.capacity, 20);

        let routes = config.route_table().unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(
            routes.category_for(&Method::POST, "/api/orders"),
            Some(Category::Write)
        );
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit\ncapacity = ").unwrap();
        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.server.bind = "not-an-ip".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.introspection.token = Some(String::new());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate_limit.general.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_routes_use_defaults() {
        let table = Config::default().route_table().unwrap();
        assert_eq!(
            table.category_for(&Method::POST, "/api/auth/register"),
            Some(Category::Auth)
        );
    }
}
