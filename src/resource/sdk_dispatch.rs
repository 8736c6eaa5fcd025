//! SDK Dispatch
//!
//! Maps the `service`/`method` names used in table definitions to GCP REST
//! API calls. This is the [`ResourceClient`] implementation for
//! [`GcpClient`].

use super::fetcher::ResourceClient;
use crate::gcp::client::GcpClient;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};

/// Params consumed by URL paths, never sent as query parameters
const PATH_PARAMS: &[&str] = &["name", "location", "bucket"];

impl ResourceClient for GcpClient {
    fn invoke<'a>(
        &'a self,
        service: &'a str,
        method: &'a str,
        params: &'a Value,
    ) -> BoxFuture<'a, Result<Value>> {
        invoke_sdk(service, method, self, params).boxed()
    }
}

/// Invoke a GCP SDK method
pub async fn invoke_sdk(
    service: &str,
    method: &str,
    client: &GcpClient,
    params: &Value,
) -> Result<Value> {
    tracing::debug!("invoke_sdk: service={}, method={}", service, method);

    match service {
        "compute" => invoke_compute(method, client, params).await,
        "storage" => invoke_storage(method, client, params).await,
        "container" => invoke_container(method, client, params).await,
        "resourcemanager" => invoke_resourcemanager(method, client).await,
        "context" => invoke_context(method, client),
        _ => Err(anyhow::anyhow!("Unknown service: {}", service)),
    }
}

// =============================================================================
// Compute Engine
// =============================================================================

/// List a zonal collection, across all zones when the zone is "all"
async fn list_zonal(client: &GcpClient, collection: &str, params: &Value) -> Result<Value> {
    if client.zone == "all" {
        let url = add_query_params(&client.compute_aggregated_url(collection), params);
        let response = client.get(&url).await?;
        Ok(flatten_aggregated_response(response))
    } else {
        let url = add_query_params(&client.compute_zonal_url(collection), params);
        client.get(&url).await
    }
}

/// Get one zonal resource by name. With zone "all" there is no zone to put
/// in the URL, so the aggregated listing is filtered by name instead; the
/// first match wins and no match yields null.
async fn get_zonal(client: &GcpClient, collection: &str, params: &Value) -> Result<Value> {
    let name = get_param_str(params, "name")?;

    if client.zone == "all" {
        let filter = format!("name = \"{}\"", name);
        let url = format!(
            "{}?filter={}",
            client.compute_aggregated_url(collection),
            urlencoding::encode(&filter)
        );
        let response = flatten_aggregated_response(client.get(&url).await?);
        return Ok(response
            .get("items")
            .and_then(|items| items.as_array())
            .and_then(|items| items.first())
            .cloned()
            .unwrap_or(Value::Null));
    }

    let url = client.compute_zonal_url(&format!("{}/{}", collection, urlencoding::encode(&name)));
    client.get(&url).await
}

async fn invoke_compute(method: &str, client: &GcpClient, params: &Value) -> Result<Value> {
    match method {
        "list_instances" => list_zonal(client, "instances", params).await,
        "list_disks" => list_zonal(client, "disks", params).await,
        "list_networks" => {
            let url = add_query_params(&client.compute_global_url("networks"), params);
            client.get(&url).await
        },
        "get_instance" => get_zonal(client, "instances", params).await,
        "get_disk" => get_zonal(client, "disks", params).await,
        "get_network" => {
            let name = get_param_str(params, "name")?;
            let url = client.compute_global_url(&format!("networks/{}", urlencoding::encode(&name)));
            client.get(&url).await
        },
        _ => Err(anyhow::anyhow!("Unknown compute method: {}", method)),
    }
}

// =============================================================================
// Cloud Storage
// =============================================================================

async fn invoke_storage(method: &str, client: &GcpClient, params: &Value) -> Result<Value> {
    match method {
        "list_buckets" => {
            let url = format!(
                "{}?project={}",
                client.storage_url("b"),
                urlencoding::encode(&client.project_id)
            );
            let url = add_query_params(&url, params);
            client.get(&url).await
        },
        "get_bucket" => {
            let name = get_param_str(params, "name")?;
            client.get(&client.storage_bucket_url(&name)).await
        },
        "list_objects" => {
            let bucket = get_param_str(params, "bucket")?;
            let url = format!("{}/o", client.storage_bucket_url(&bucket));
            let url = add_query_params(&url, params);
            client.get(&url).await
        },
        "get_bucket_iam_policy" => {
            let name = get_param_str(params, "name")?;
            let url = format!("{}/iam", client.storage_bucket_url(&name));
            client.get(&url).await
        },
        _ => Err(anyhow::anyhow!("Unknown storage method: {}", method)),
    }
}

// =============================================================================
// GKE
// =============================================================================

async fn invoke_container(method: &str, client: &GcpClient, params: &Value) -> Result<Value> {
    match method {
        "list_clusters" => {
            // "-" lists clusters in every location
            let location = get_param_str_opt(params, "location").unwrap_or_else(|| "-".to_string());
            let url = client.container_location_url(&location, "clusters");
            client.get(&url).await
        },
        "get_cluster" => {
            let name = get_param_str(params, "name")?;
            let location = get_param_str(params, "location")?;
            let url = client.container_location_url(
                &urlencoding::encode(&location),
                &format!("clusters/{}", urlencoding::encode(&name)),
            );
            client.get(&url).await
        },
        _ => Err(anyhow::anyhow!("Unknown container method: {}", method)),
    }
}

// =============================================================================
// Resource Manager / connection context
// =============================================================================

async fn invoke_resourcemanager(method: &str, client: &GcpClient) -> Result<Value> {
    match method {
        "get_project" => {
            let url = client.resourcemanager_url(&format!("projects/{}", client.project_id));
            client.get(&url).await
        },
        _ => Err(anyhow::anyhow!("Unknown resourcemanager method: {}", method)),
    }
}

fn invoke_context(method: &str, client: &GcpClient) -> Result<Value> {
    match method {
        "connection" => Ok(json!({
            "project": client.project_id,
            "zone": client.zone,
            "region": client.get_region(),
        })),
        _ => Err(anyhow::anyhow!("Unknown context method: {}", method)),
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn get_param_str(params: &Value, key: &str) -> Result<String> {
    get_param_str_opt(params, key).context(format!("Missing required parameter: {}", key))
}

fn get_param_str_opt(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| {
            if let Value::Array(arr) = v {
                arr.first().and_then(|v| v.as_str())
            } else {
                v.as_str()
            }
        })
        .map(|s| s.to_string())
}

fn add_query_params(url: &str, params: &Value) -> String {
    let Value::Object(map) = params else {
        return url.to_string();
    };

    let mut query_parts: Vec<String> = Vec::new();

    for (key, value) in map {
        if PATH_PARAMS.contains(&key.as_str()) {
            continue;
        }

        match value {
            Value::String(s) => {
                query_parts.push(format!("{}={}", key, urlencoding::encode(s)));
            },
            Value::Number(n) => {
                query_parts.push(format!("{}={}", key, n));
            },
            Value::Array(arr) => {
                for item in arr.iter().filter_map(|v| v.as_str()) {
                    query_parts.push(format!("{}={}", key, urlencoding::encode(item)));
                }
            },
            _ => {},
        }
    }

    if query_parts.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&{}", url, query_parts.join("&"))
    } else {
        format!("{}?{}", url, query_parts.join("&"))
    }
}

/// Flatten an aggregated API response into a standard list response.
/// `{"items": {"zones/us-central1-a": {"instances": [...]}, ...}}` becomes
/// `{"items": [...], "nextPageToken": ...}`
fn flatten_aggregated_response(response: Value) -> Value {
    let next_page = response.get("nextPageToken").cloned();
    let Some(items) = response.get("items").and_then(|v| v.as_object()) else {
        return json!({ "items": [] });
    };

    let all_items: Vec<Value> = items
        .values()
        .filter_map(|scope| scope.as_object())
        .flat_map(|scope| {
            scope
                .iter()
                .filter(|(key, _)| key.as_str() != "warning")
                .filter_map(|(_, value)| value.as_array())
                .flatten()
                .cloned()
        })
        .collect();

    let mut flattened = json!({ "items": all_items });
    if let Some(token) = next_page {
        flattened["nextPageToken"] = token;
    }
    flattened
}
