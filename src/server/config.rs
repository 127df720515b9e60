//! HTTP server configuration

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};

use crate::config::ServerSettings;

const DEFAULT_BIND: ([u8; 4], u16) = ([0, 0, 0, 0], 8080);

/// Configuration for the dispatch HTTP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(DEFAULT_BIND),
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl ServerConfig {
    /// Create a new config builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Build from the `[server]` section of the application config
    pub fn from_settings(settings: &ServerSettings) -> Result<Self, ConfigError> {
        Self::builder()
            .bind_address_str(&format!("{}:{}", settings.host, settings.port))?
            .enable_cors(settings.enable_cors)
            .enable_request_logging(settings.request_logging)
            .build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.ip().is_multicast() {
            return Err(ConfigError::InvalidValue {
                field: "bind_address".to_string(),
                reason: "Cannot bind to a multicast address".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for ServerConfig
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    bind_address: Option<SocketAddr>,
    enable_cors: Option<bool>,
    enable_request_logging: Option<bool>,
}

impl ServerConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from a `host:port` string; host names are resolved
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            field: "bind_address".to_string(),
            reason: format!("Invalid address: {}", addr),
        };

        let resolved = match addr.parse::<SocketAddr>() {
            Ok(parsed) => parsed,
            Err(_) => addr
                .to_socket_addrs()
                .map_err(|_| invalid())?
                .next()
                .ok_or_else(invalid)?,
        };

        self.bind_address = Some(resolved);
        Ok(self)
    }

    /// Enable/disable CORS
    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = Some(enable);
        self
    }

    /// Enable/disable request logging
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        let config = ServerConfig {
            bind_address: self
                .bind_address
                .unwrap_or_else(|| SocketAddr::from(DEFAULT_BIND)),
            enable_cors: self.enable_cors.unwrap_or(true),
            enable_request_logging: self.enable_request_logging.unwrap_or(true),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
