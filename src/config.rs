//! Configuration Management
//!
//! Handles persistent configuration storage for tgcp-rows.

use crate::query::{ColumnErrorPolicy, QuerySettings, DEFAULT_MAX_CONCURRENCY};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How query results are printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project to query
    #[serde(default)]
    pub project_id: Option<String>,
    /// Zone for zonal resources ("all" for every zone)
    #[serde(default)]
    pub zone: Option<String>,
    /// Rows projected at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub column_error_policy: ColumnErrorPolicy,
    #[serde(default)]
    pub output: OutputFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: None,
            zone: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            column_error_policy: ColumnErrorPolicy::default(),
            output: OutputFormat::default(),
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tgcp-rows").join("config.json"))
    }

    /// Load configuration from the default location, falling back to
    /// defaults when the file is absent or unreadable
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config at {}: {:#}", path.display(), e);
                Self::default()
            },
        }
    }

    /// Load configuration from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Get effective project (CLI > config > gcloud default)
    pub fn effective_project(&self) -> Option<String> {
        self.project_id
            .clone()
            .or_else(crate::gcp::auth::get_default_project)
    }

    /// Get effective zone (CLI > config > gcloud default)
    pub fn effective_zone(&self) -> String {
        self.zone
            .clone()
            .or_else(crate::gcp::auth::get_default_zone)
            .unwrap_or_else(|| "all".to_string())
    }

    pub fn query_settings(&self) -> QuerySettings {
        QuerySettings {
            max_concurrency: self.max_concurrency.max(1),
            column_error_policy: self.column_error_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("tgcp-rows-test-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_from(&temp_path("config.json")).unwrap();
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.column_error_policy, ColumnErrorPolicy::Null);
        assert_eq!(config.output, OutputFormat::Table);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = temp_path("config.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"project_id": "my-project", "column_error_policy": "fail_row"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.project_id.as_deref(), Some("my-project"));
        assert_eq!(config.column_error_policy, ColumnErrorPolicy::FailRow);
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let path = temp_path("config.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_query_settings_clamps_concurrency() {
        let config = Config {
            max_concurrency: 0,
            ..Config::default()
        };
        assert_eq!(config.query_settings().max_concurrency, 1);
    }
}
