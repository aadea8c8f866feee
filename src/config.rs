//! Reporter configuration.
//!
//! Everything the error handler needs is assembled once, at startup, from a
//! TOML file and `FAULTLINE__` environment overrides. It is read-only
//! afterwards.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;

use crate::classify::CRATE_FRAME_MARKER;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "FAULTLINE";

/// Errors that can occur when loading reporter configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    NotFound(String),

    /// The configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] config::ConfigError),

    /// The configuration file path is invalid.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),
}

/// Alert recipients and delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationConfig {
    /// Primary recipients. No alerts are sent when empty.
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    /// Endpoint receiving alerts as JSON.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Where errors are persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PersistenceConfig {
    /// Table receiving one row per error. Persistence is off when unset.
    #[serde(default)]
    pub table: Option<String>,
    /// Directory of the JSON lines store.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Stack trace filtering.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StackConfig {
    /// Frames containing any of these markers are dropped.
    #[serde(default = "default_deny")]
    pub deny: Vec<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            deny: default_deny(),
        }
    }
}

fn default_deny() -> Vec<String> {
    vec![CRATE_FRAME_MARKER.to_string()]
}

/// Root reporter configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReporterConfig {
    /// Subsystem label attached to every classified error.
    #[serde(default)]
    pub module: Option<String>,
    /// Deployment label used in alert subjects.
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub stack: StackConfig,
}

impl ReporterConfig {
    /// Loads configuration from a TOML file with environment overrides.
    ///
    /// Overrides use the `FAULTLINE__<SECTION>__<KEY>` format, e.g.
    /// `FAULTLINE__PERSISTENCE__TABLE=ERROR_LOG`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, the path is not valid
    /// UTF-8, or the content cannot be parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| ConfigError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(ConfigError::NotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::with_name(path_str))
            .add_source(env_source())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder().add_source(env_source()).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parses configuration from a TOML string, without environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Table to persist to, if persistence is configured.
    pub fn persistence_table(&self) -> Option<&str> {
        self.persistence
            .table
            .as_deref()
            .filter(|table| !table.trim().is_empty())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("notification.to")
        .with_list_parse_key("notification.cc")
        .with_list_parse_key("stack.deny")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ReporterConfig::default();

        assert!(config.module.is_none());
        assert!(config.notification.to.is_empty());
        assert!(config.persistence_table().is_none());
        assert_eq!(config.stack.deny, vec!["faultline::".to_string()]);
    }

    #[test]
    fn test_from_toml_str() {
        let config = ReporterConfig::from_toml_str(
            r#"
            module = "orders"
            environment = "production"

            [notification]
            to = ["ops@example.com"]
            cc = ["lead@example.com"]
            webhook_url = "http://relay.local/alerts"

            [persistence]
            table = "ERROR_LOG"
            directory = "/var/log/faultline"

            [stack]
            deny = ["faultline::", "tokio::"]
            "#,
        )
        .unwrap();

        assert_eq!(config.module.as_deref(), Some("orders"));
        assert_eq!(config.environment.as_deref(), Some("production"));
        assert_eq!(config.notification.to, vec!["ops@example.com".to_string()]);
        assert_eq!(config.notification.cc, vec!["lead@example.com".to_string()]);
        assert_eq!(
            config.notification.webhook_url.as_deref(),
            Some("http://relay.local/alerts")
        );
        assert_eq!(config.persistence_table(), Some("ERROR_LOG"));
        assert_eq!(
            config.persistence.directory,
            Some(PathBuf::from("/var/log/faultline"))
        );
        assert_eq!(config.stack.deny.len(), 2);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ReporterConfig::from_toml_str("module = \"billing\"").unwrap();

        assert_eq!(config.module.as_deref(), Some("billing"));
        assert_eq!(config.stack, StackConfig::default());
        assert_eq!(config.notification, NotificationConfig::default());
    }

    #[test]
    fn test_blank_table_disables_persistence() {
        let config = ReporterConfig::from_toml_str("[persistence]\ntable = \"  \"").unwrap();
        assert!(config.persistence_table().is_none());
    }

    #[test]
    fn test_invalid_toml() {
        let result = ReporterConfig::from_toml_str("module = = 1");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_file_not_found() {
        let result = ReporterConfig::load("nonexistent/path/faultline.toml");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "environment = \"staging\"").unwrap();
        writeln!(file, "[notification]").unwrap();
        writeln!(file, "to = [\"ops@example.com\"]").unwrap();

        let config = ReporterConfig::load(file.path()).unwrap();

        assert_eq!(config.environment.as_deref(), Some("staging"));
        assert_eq!(config.notification.to.len(), 1);
    }
}
