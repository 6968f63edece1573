//! Configuration data structures

use crate::credentials::CredentialSpec;
use crate::models::workflow::RetryPolicy;
use crate::workflow::validator::WorkflowValidator;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the automation backend URL
pub const BACKEND_URL_ENV: &str = "CHAIRSIDE_BACKEND_URL";

/// Logging level configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "info")]
    #[default]
    Info,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "trace")]
    Trace,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Automation backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the browser-automation service
    pub base_url: String,
    /// Upper bound for one backend call in seconds
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_seconds: 300,
        }
    }
}

/// Engine-wide defaults applied when a workflow does not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many times one node may run within a single run
    pub max_node_visits: u32,
    /// Per-attempt node timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_timeout_seconds: Option<u32>,
    /// Retry policy for nodes without their own
    pub default_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_node_visits: 20,
            node_timeout_seconds: None,
            default_retry: RetryPolicy::default(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Logging verbosity level
    pub log_level: LogLevel,
    /// Checkpoint store file (defaults to ~/.chairside/runs.json)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    /// Directory with workflow definition files (defaults to ~/.chairside/workflows)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<PathBuf>,
    /// Automation backend
    pub backend: BackendConfig,
    /// Engine defaults
    pub engine: EngineConfig,
    /// Systems the credential provider knows about
    pub credentials: Vec<CredentialSpec>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            store_path: None,
            workflows_dir: None,
            backend: BackendConfig::default(),
            engine: EngineConfig::default(),
            credentials: vec![CredentialSpec::new("mohealthnet")],
        }
    }
}

impl Configuration {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Configuration = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            // Return default configuration if file doesn't exist
            Ok(Configuration::default())
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Get the XDG config directory path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("chairside").join("config.toml"))
    }

    /// Apply environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                self.backend.base_url = url.trim().to_string();
            }
        }
    }

    /// Checkpoint store location
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| chairside_home().join("runs.json"))
    }

    /// Workflow definitions directory
    pub fn resolved_workflows_dir(&self) -> PathBuf {
        self.workflows_dir
            .clone()
            .unwrap_or_else(|| chairside_home().join("workflows"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match url::Url::parse(&self.backend.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(format!(
                "backend.base_url must use http or https (got '{}')",
                url.scheme()
            )),
            Err(e) => errors.push(format!("backend.base_url is not a valid URL: {}", e)),
        }

        if self.backend.timeout_seconds == 0 {
            errors.push("backend.timeout_seconds must be at least 1".to_string());
        }
        if self.backend.timeout_seconds > 3600 {
            errors.push("backend.timeout_seconds cannot exceed 3600 (1 hour)".to_string());
        }

        if self.engine.max_node_visits == 0 || self.engine.max_node_visits > 1000 {
            errors.push("engine.max_node_visits must be between 1 and 1000".to_string());
        }

        let retry = WorkflowValidator::validate_retry_policy(&self.engine.default_retry);
        for error in retry.errors {
            errors.push(format!("engine.default_retry.{}: {}", error.field, error.message));
        }

        for spec in &self.credentials {
            if spec.system.trim().is_empty() {
                errors.push("credentials: system name cannot be empty".to_string());
            }
            if spec.fields.is_empty() {
                errors.push(format!(
                    "credentials.{}: at least one secret field is required",
                    spec.system
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn chairside_home() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".chairside")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert_eq!(config.engine.max_node_visits, 20);
        assert_eq!(config.credentials[0].system, "mohealthnet");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configuration_validation_reports_every_problem() {
        let mut config = Configuration::default();
        config.backend.base_url = "ftp://automation.local".to_string();
        config.backend.timeout_seconds = 0;
        config.engine.max_node_visits = 0;
        config.engine.default_retry.max_attempts = 0;

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("base_url")));
        assert!(errors.iter().any(|e| e.contains("timeout_seconds")));
        assert!(errors.iter().any(|e| e.contains("max_node_visits")));
        assert!(errors.iter().any(|e| e.contains("max_attempts")));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Configuration =
            toml::from_str("log_level = \"debug\"\n[backend]\nbase_url = \"http://10.0.0.5:8000\"\n")
                .unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.backend.base_url, "http://10.0.0.5:8000");
        assert_eq!(config.backend.timeout_seconds, 300);
        assert_eq!(config.engine.max_node_visits, 20);
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = Configuration::default();
        config.backend.timeout_seconds = 120;
        config.credentials.push(CredentialSpec::token("delta_dental"));

        config.save_to_file(&config_path).unwrap();
        assert!(config_path.exists());

        let loaded = Configuration::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.backend.timeout_seconds, 120);
        assert_eq!(loaded.credentials.len(), 2);
        assert_eq!(loaded.credentials[1].fields, vec!["token".to_string()]);
    }

    #[test]
    fn test_missing_file_returns_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = Configuration::load_from_file(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.log_level, LogLevel::Info);
    }
}
