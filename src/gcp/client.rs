//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication
//! and HTTP functionality.

use super::auth::GcpCredentials;
use super::http::GcpHttpClient;
use anyhow::{Context, Result};
use serde_json::Value;

const COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com";
const STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
const CONTAINER_ENDPOINT: &str = "https://container.googleapis.com";
const RESOURCE_MANAGER_ENDPOINT: &str = "https://cloudresourcemanager.googleapis.com";

/// API base URLs, overridable for tests and private endpoints
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub compute: String,
    pub storage: String,
    pub container: String,
    pub resource_manager: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: COMPUTE_ENDPOINT.to_string(),
            storage: STORAGE_ENDPOINT.to_string(),
            container: CONTAINER_ENDPOINT.to_string(),
            resource_manager: RESOURCE_MANAGER_ENDPOINT.to_string(),
        }
    }
}

impl Endpoints {
    /// Point every API at the same base URL
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            compute: base.clone(),
            storage: base.clone(),
            container: base.clone(),
            resource_manager: base,
        }
    }
}

#[derive(Clone)]
enum TokenSource {
    Adc(GcpCredentials),
    Static(String),
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    tokens: TokenSource,
    pub http: GcpHttpClient,
    pub endpoints: Endpoints,
    pub project_id: String,
    pub zone: String,
}

impl GcpClient {
    /// Create a new GCP client using Application Default Credentials
    pub async fn new(project_id: &str, zone: &str) -> Result<Self> {
        let credentials = GcpCredentials::new()
            .await
            .context("Failed to initialize GCP credentials")?;

        Ok(Self {
            tokens: TokenSource::Adc(credentials),
            http: GcpHttpClient::new()?,
            endpoints: Endpoints::default(),
            project_id: project_id.to_string(),
            zone: zone.to_string(),
        })
    }

    /// Create a client with a fixed bearer token and custom endpoints
    pub fn with_static_token(
        project_id: &str,
        zone: &str,
        token: &str,
        endpoints: Endpoints,
    ) -> Result<Self> {
        Ok(Self {
            tokens: TokenSource::Static(token.to_string()),
            http: GcpHttpClient::new()?,
            endpoints,
            project_id: project_id.to_string(),
            zone: zone.to_string(),
        })
    }

    /// Get the current access token
    pub async fn get_token(&self) -> Result<String> {
        match &self.tokens {
            TokenSource::Adc(credentials) => credentials.get_token().await,
            TokenSource::Static(token) => Ok(token.clone()),
        }
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.get(url, &token).await
    }

    /// Get the region from the current zone
    pub fn get_region(&self) -> String {
        let parts: Vec<&str> = self.zone.rsplitn(2, '-').collect();
        if parts.len() == 2 {
            parts[1].to_string()
        } else {
            self.zone.clone()
        }
    }

    // =========================================================================
    // Compute Engine API helpers
    // =========================================================================

    /// Build Compute Engine API URL
    pub fn compute_url(&self, path: &str) -> String {
        format!(
            "{}/compute/v1/projects/{}/{}",
            self.endpoints.compute, self.project_id, path
        )
    }

    /// Build zonal Compute Engine API URL
    pub fn compute_zonal_url(&self, resource: &str) -> String {
        self.compute_url(&format!("zones/{}/{}", self.zone, resource))
    }

    /// Build global Compute Engine API URL
    pub fn compute_global_url(&self, resource: &str) -> String {
        self.compute_url(&format!("global/{}", resource))
    }

    /// Build aggregated Compute Engine API URL (all zones)
    pub fn compute_aggregated_url(&self, resource: &str) -> String {
        self.compute_url(&format!("aggregated/{}", resource))
    }

    // =========================================================================
    // Cloud Storage API helpers
    // =========================================================================

    /// Build Cloud Storage API URL
    pub fn storage_url(&self, path: &str) -> String {
        format!("{}/storage/v1/{}", self.endpoints.storage, path)
    }

    /// Build Cloud Storage bucket URL
    pub fn storage_bucket_url(&self, bucket: &str) -> String {
        self.storage_url(&format!("b/{}", urlencoding::encode(bucket)))
    }

    // =========================================================================
    // GKE API helpers
    // =========================================================================

    /// Build GKE API URL
    pub fn container_url(&self, path: &str) -> String {
        format!(
            "{}/v1/projects/{}/{}",
            self.endpoints.container, self.project_id, path
        )
    }

    /// Build GKE location URL (region or zone)
    pub fn container_location_url(&self, location: &str, resource: &str) -> String {
        self.container_url(&format!("locations/{}/{}", location, resource))
    }

    // =========================================================================
    // Resource Manager API helpers
    // =========================================================================

    /// Build Resource Manager API URL
    pub fn resourcemanager_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoints.resource_manager, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(zone: &str) -> GcpClient {
        GcpClient::with_static_token("my-project", zone, "t", Endpoints::single("http://localhost:1/"))
            .unwrap()
    }

    #[test]
    fn test_region_from_zone() {
        assert_eq!(client("us-central1-a").get_region(), "us-central1");
        assert_eq!(client("all").get_region(), "all");
    }

    #[test]
    fn test_urls_use_endpoint_override() {
        let c = client("europe-west1-b");
        assert_eq!(
            c.compute_zonal_url("instances"),
            "http://localhost:1/compute/v1/projects/my-project/zones/europe-west1-b/instances"
        );
        assert_eq!(c.storage_bucket_url("a b"), "http://localhost:1/storage/v1/b/a%20b");
        assert_eq!(
            c.container_location_url("-", "clusters"),
            "http://localhost:1/v1/projects/my-project/locations/-/clusters"
        );
    }
}
