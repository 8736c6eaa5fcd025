//! GCP Authentication
//!
//! Handles authentication using Application Default Credentials (ADC) and
//! reads project/zone defaults from the gcloud CLI configuration.

use anyhow::{Context, Result};
use gcp_auth::TokenProvider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default scopes for GCP API access
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// Refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Token TTL when the expiry can't be determined (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Environment variables consulted for the default project, in order
const PROJECT_ENV_VARS: &[&str] = &["CLOUDSDK_CORE_PROJECT", "GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT"];

/// GCP credentials holder with token caching
#[derive(Clone)]
pub struct GcpCredentials {
    provider: Arc<dyn TokenProvider>,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl GcpCredentials {
    /// Create new GCP credentials using Application Default Credentials
    pub async fn new() -> Result<Self> {
        let provider = gcp_auth::provider().await.context(
            "Failed to initialize GCP authentication. Run 'gcloud auth application-default login'",
        )?;

        Ok(Self {
            provider,
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Get an access token for API calls, reusing the cached one while valid
    pub async fn get_token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| c.is_valid()) {
                return Ok(cached.token.clone());
            }
        }

        let mut cache = self.token_cache.write().await;
        // Another task may have refreshed while we waited for the write lock
        if let Some(cached) = cache.as_ref().filter(|c| c.is_valid()) {
            return Ok(cached.token.clone());
        }

        let token = self
            .provider
            .token(DEFAULT_SCOPES)
            .await
            .context("Failed to get access token")?;
        let token_str = token.as_str().to_string();

        *cache = Some(CachedToken {
            token: token_str.clone(),
            expires_at: Instant::now() + DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER,
        });

        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            (DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token_str)
    }
}

/// Get the gcloud configuration directory
pub fn get_gcloud_config_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|p| p.join("gcloud"))
}

/// Validate a GCP project ID format
/// Project IDs are 6-30 characters of lowercase letters, digits and hyphens,
/// start with a letter and don't end with a hyphen
pub fn validate_project_id(project: &str) -> bool {
    if project.len() < 6 || project.len() > 30 || project.ends_with('-') {
        return false;
    }
    if !project.starts_with(|c: char| c.is_ascii_lowercase()) {
        return false;
    }
    project
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Look up `key` inside `[section]` of an ini-style gcloud file
fn ini_value(content: &str, section: &str, key: &str) -> Option<String> {
    let header = format!("[{}]", section);
    let mut in_section = false;

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            in_section = line == header;
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((name, value)) = line.split_once('=') {
            if name.trim() == key {
                return Some(value.trim().to_string());
            }
        }
    }

    None
}

/// Read a property from the gcloud configuration
fn gcloud_property(section: &str, key: &str) -> Option<String> {
    gcloud_property_in(&get_gcloud_config_dir()?, section, key)
}

/// Look up a property under `config_dir`: the `properties` file first, then
/// the active named configuration
fn gcloud_property_in(config_dir: &Path, section: &str, key: &str) -> Option<String> {
    if let Some(value) = std::fs::read_to_string(config_dir.join("properties"))
        .ok()
        .and_then(|content| ini_value(&content, section, key))
    {
        return Some(value);
    }

    let active = std::fs::read_to_string(config_dir.join("active_config")).ok()?;
    let name = active.trim();

    // Reject names that could escape the configurations directory
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        tracing::warn!("Invalid characters in active_config name");
        return None;
    }

    let path = config_dir
        .join("configurations")
        .join(format!("config_{}", name));
    let content = std::fs::read_to_string(path).ok()?;
    ini_value(&content, section, key)
}

/// Read the default project from the environment or gcloud configuration
pub fn get_default_project() -> Option<String> {
    for var in PROJECT_ENV_VARS {
        if let Ok(project) = std::env::var(var) {
            if validate_project_id(&project) {
                return Some(project);
            }
            tracing::warn!("Invalid project ID format in {}", var);
        }
    }

    gcloud_property("core", "project").filter(|p| validate_project_id(p))
}

/// Get the default zone from the environment or gcloud configuration
pub fn get_default_zone() -> Option<String> {
    if let Ok(zone) = std::env::var("CLOUDSDK_COMPUTE_ZONE") {
        return Some(zone);
    }
    gcloud_property("compute", "zone")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_project_id() {
        assert!(validate_project_id("my-project-123"));
        assert!(!validate_project_id("short"));
        assert!(!validate_project_id("1project"));
        assert!(!validate_project_id("trailing-"));
        assert!(!validate_project_id("Upper-Case"));
    }

    fn gcloud_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tgcp-rows-gcloud-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("configurations")).unwrap();
        std::fs::write(dir.join("active_config"), "work\n").unwrap();
        std::fs::write(
            dir.join("configurations").join("config_work"),
            "[core]\nproject = work-project\n[compute]\nzone = europe-west1-b\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_property_from_active_configuration() {
        let dir = gcloud_dir();
        assert_eq!(gcloud_property_in(&dir, "core", "project").as_deref(), Some("work-project"));
        assert_eq!(gcloud_property_in(&dir, "compute", "zone").as_deref(), Some("europe-west1-b"));
    }

    #[test]
    fn test_properties_file_takes_precedence() {
        let dir = gcloud_dir();
        std::fs::write(dir.join("properties"), "[core]\nproject = legacy-project\n").unwrap();
        assert_eq!(gcloud_property_in(&dir, "core", "project").as_deref(), Some("legacy-project"));
        // Keys missing from properties still come from the active configuration
        assert_eq!(gcloud_property_in(&dir, "compute", "zone").as_deref(), Some("europe-west1-b"));
    }

    #[test]
    fn test_ini_value_respects_sections() {
        let content = "[core]\nproject = core-project\naccount = a@b.c\n\n[compute]\nzone = us-east1-b\n";
        assert_eq!(ini_value(content, "core", "project").as_deref(), Some("core-project"));
        assert_eq!(ini_value(content, "compute", "zone").as_deref(), Some("us-east1-b"));
        assert_eq!(ini_value(content, "compute", "project"), None);
    }
}
