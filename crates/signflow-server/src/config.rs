//! Service configuration
//!
//! Loaded from a TOML file; every section has defaults, so an empty file is
//! a valid configuration. Secrets and the bind address can be overridden by
//! `SIGNFLOW_*` environment variables.

use serde::{Deserialize, Serialize};
use signflow_core::QuotaConfig;
use signflow_provider::ProviderConfig;
use signflow_sync::SyncConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment override could not be parsed
    #[error("invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// `[server]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Default filter when `RUST_LOG` is unset
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Whole-service configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub sync: SyncConfig,
    pub quota: QuotaConfig,
}

impl AppConfig {
    /// Parse TOML text
    ///
    /// # Errors
    /// - `ConfigError::Parse` for malformed TOML or mistyped fields
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load from file (or defaults), apply process environment, validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SIGNFLOW_*` overrides from `lookup`
    ///
    /// # Errors
    /// - `ConfigError::Env` for an unparsable numeric or boolean override
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let strings: [(&str, &mut String); 6] = [
            ("SIGNFLOW_BIND_ADDR", &mut self.server.bind_addr),
            ("SIGNFLOW_LOG_LEVEL", &mut self.server.log_level),
            ("SIGNFLOW_PROVIDER_BASE_URL", &mut self.provider.base_url),
            ("SIGNFLOW_PROVIDER_TOKEN_URL", &mut self.provider.token_url),
            ("SIGNFLOW_PROVIDER_CLIENT_ID", &mut self.provider.client_id),
            ("SIGNFLOW_PROVIDER_CLIENT_SECRET", &mut self.provider.client_secret),
        ];
        for (var, slot) in strings {
            if let Some(value) = lookup(var) {
                *slot = value;
            }
        }

        if let Some(value) = lookup("SIGNFLOW_JSON_LOGS") {
            self.server.json_logs = value
                .parse()
                .map_err(|_| ConfigError::Env { var: "SIGNFLOW_JSON_LOGS", value })?;
        }
        if let Some(value) = lookup("SIGNFLOW_SYNC_INTERVAL_SECS") {
            self.sync.interval_secs = value.parse().map_err(|_| ConfigError::Env {
                var: "SIGNFLOW_SYNC_INTERVAL_SECS",
                value,
            })?;
        }
        Ok(())
    }

    /// Check every section
    ///
    /// # Errors
    /// - `ConfigError::Invalid` naming the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        self.provider.validate().map_err(ConfigError::Invalid)?;
        self.sync.validate().map_err(ConfigError::Invalid)?;
        self.quota.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// Parsed bind address
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind_addr.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "server.bind_addr is not a socket address: '{}'",
                self.server.bind_addr
            ))
        })
    }
}
