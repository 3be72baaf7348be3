//! Configuration for a module system instance
//!
//! Every section is optional in files; missing fields take their defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Logging setup used by `utils::init_logging_from_config`
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Registry write behaviour
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Event bus behaviour
    #[serde(default)]
    pub events: EventConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "using_core=debug"); RUST_LOG takes precedence
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// What happens when a named id is registered twice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    /// The newer declaration replaces the older one
    #[default]
    LastWriteWins,
    /// Re-registration is a validation fault
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub overwrite: OverwritePolicy,
}

/// What happens when an event handler panics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerFaultPolicy {
    /// Log and swallow the panic, keep dispatching
    #[default]
    Isolate,
    /// Resume the panic in the caller of `fire`
    Propagate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default)]
    pub handler_faults: HandlerFaultPolicy,
}

impl SystemConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SystemConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SystemConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, picking the format from the file extension
    ///
    /// `.toml` is parsed as TOML, anything else as JSON.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            _ => Self::from_json_file(path),
        }
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SystemConfig::default();
        assert_eq!(config.registry.overwrite, OverwritePolicy::LastWriteWins);
        assert_eq!(config.events.handler_faults, HandlerFaultPolicy::Isolate);
        assert!(config.logging.filter.is_none());
        assert!(!config.logging.json_format);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("modules.toml");
        std::fs::write(&path, "[registry]\noverwrite = \"reject\"\n").unwrap();

        let config = SystemConfig::from_file(&path).unwrap();
        assert_eq!(config.registry.overwrite, OverwritePolicy::Reject);
        assert_eq!(config.events, EventConfig::default());
    }

    #[test]
    fn test_json_file_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("modules.json");
        let mut config = SystemConfig::default();
        config.logging.filter = Some("using_core=debug".to_string());
        config.events.handler_faults = HandlerFaultPolicy::Propagate;

        config.to_json_file(&path).unwrap();
        let loaded = SystemConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let result: Result<SystemConfig, _> =
            serde_json::from_str(r#"{"registry": {"overwrite": "first_write_wins"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(SystemConfig::from_file(&temp_dir.path().join("absent.toml")).is_err());
    }
}
