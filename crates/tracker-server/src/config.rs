//! Server configuration
//!
//! Loaded from a TOML, YAML or JSON file with `TRACKER_` environment
//! overrides layered on top. Nested keys use `__`, so
//! `TRACKER_AUTH__SIGNING_KEY` sets `auth.signing_key` and
//! `TRACKER_SERVER__PORT` sets `server.port`.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use tracker_admission::{AuthConfig, RateLimitConfig};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TRACKER";

/// Complete server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and request-handling settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_address: String,
    pub port: u16,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a proxy that overwrites these headers.
    pub trust_forwarded_headers: bool,
    /// Origins allowed by CORS; empty allows none
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            trust_forwarded_headers: false,
            cors_origins: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// Listener address does not parse
    #[error("Invalid bind address {address:?}")]
    InvalidBindAddress { address: String },

    /// CORS origin is not a valid header value
    #[error("Invalid CORS origin {origin:?}")]
    InvalidOrigin { origin: String },

    /// Auth or rate limit settings are unusable
    #[error(transparent)]
    Admission(#[from] tracker_admission::ConfigError),
}

impl ServerConfig {
    /// Load configuration from an optional file plus environment overrides.
    ///
    /// Without a file, everything (including `auth.signing_key`) must come
    /// from `TRACKER_` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or of an unknown format, if
    /// the merged configuration does not deserialize, or if it fails
    /// [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }

            let format = match path.extension().and_then(|s| s.to_str()) {
                Some("toml") => FileFormat::Toml,
                Some("yaml" | "yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return Err(ConfigError::UnsupportedFormat),
            };

            let name = path.to_str().ok_or(ConfigError::UnsupportedFormat)?;
            builder = builder.add_source(File::new(name, format));
        }

        let config = builder
            // Environment variables override file settings
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load), minus the file checks.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that deserialization alone cannot.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;
        self.auth.validate()?;
        self.rate_limits.registry()?;
        for origin in &self.server.cors_origins {
            if http::HeaderValue::from_str(origin).is_err() {
                return Err(ConfigError::InvalidOrigin {
                    origin: origin.clone(),
                });
            }
        }
        Ok(())
    }
}

impl HttpConfig {
    /// Address the listener binds to
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidBindAddress`] if `bind_address` is not an IP.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr =
            self.bind_address
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddress {
                    address: self.bind_address.clone(),
                })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
