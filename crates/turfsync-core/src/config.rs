//! Configuration for the sync engine.
//!
//! Parsed from TOML:
//!
//! ```toml
//! [resolver]
//! endpoint = "https://api.example.org/profile/scope"
//! timeout_secs = 15
//!
//! [mirror]
//! db_path = "/var/lib/turfsync/mirror.db"
//! ```
//!
//! Omitting `[mirror] db_path` selects an in-memory mirror (useful for
//! tests and ephemeral sessions).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Could not read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML was syntactically or structurally invalid.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The parsed configuration violates a semantic constraint.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level sync engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SyncConfig {
    /// Profile resolver settings.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Local mirror settings.
    #[serde(default)]
    pub mirror: MirrorConfig,
}

impl SyncConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, the resolver endpoint is
    /// empty, or the resolver timeout is zero.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.resolver.endpoint.trim().is_empty() {
            return Err(ConfigError::Validation(
                "resolver.endpoint must not be empty".to_string(),
            ));
        }
        if self.resolver.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "resolver.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Profile resolver transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    /// URL of the profile resolver RPC endpoint.
    #[serde(default)]
    pub endpoint: String,

    /// Upper bound on one resolver call, in seconds. A call that exceeds
    /// this is treated as a transport failure, never left hanging.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ResolverConfig {
    /// Returns the resolver timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Local mirror storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MirrorConfig {
    /// Path of the SQLite database file. `None` selects an in-memory
    /// mirror that lives for the session only.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

const fn default_timeout_secs() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = SyncConfig::from_toml(
            r#"
            [resolver]
            endpoint = "https://api.example.org/profile/scope"
            timeout_secs = 5

            [mirror]
            db_path = "/tmp/mirror.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.resolver.timeout(), Duration::from_secs(5));
        assert_eq!(config.mirror.db_path, Some(PathBuf::from("/tmp/mirror.db")));
    }

    #[test]
    fn defaults_apply() {
        let config = SyncConfig::from_toml(
            r#"
            [resolver]
            endpoint = "https://api.example.org/profile/scope"
            "#,
        )
        .unwrap();
        assert_eq!(config.resolver.timeout_secs, 15);
        assert_eq!(config.mirror.db_path, None);
    }

    #[test]
    fn empty_endpoint_rejected() {
        let err = SyncConfig::from_toml("[resolver]\ntimeout_secs = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = SyncConfig::from_toml(
            "[resolver]\nendpoint = \"https://x\"\ntimeout_secs = 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = SyncConfig::from_toml(
            "[resolver]\nendpoint = \"https://x\"\nsocket = \"legacy\"\n",
        );
        assert!(err.is_err());
    }
}
