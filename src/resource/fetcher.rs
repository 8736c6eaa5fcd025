//! Resource Fetcher
//!
//! Runs a table's List or Get operation against the resource-discovery
//! client. Failures pass through the error classifier: suppressed ones
//! yield zero items, the rest propagate with the upstream text intact.

use super::classify::should_suppress;
use super::table::{OperationDef, TableSchema};
use crate::query::QueryContext;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde_json::Value;

/// Hard stop for runaway pagination
const MAX_PAGES: usize = 1000;

/// The resource-discovery client seam
pub trait ResourceClient: Send + Sync {
    /// Invoke `service`/`method` with `params`, returning the raw response
    fn invoke<'a>(
        &'a self,
        service: &'a str,
        method: &'a str,
        params: &'a Value,
    ) -> BoxFuture<'a, Result<Value>>;
}

/// Which operation served a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Get,
}

/// Items returned by an operation
#[derive(Debug, Default)]
pub struct Fetched {
    pub items: Vec<Value>,
    /// The operation failed with an error its table declared as "empty"
    pub suppressed: bool,
}

/// Pick Get when every key column has an equality qualifier, List otherwise
pub fn choose_operation(table: &TableSchema, ctx: &QueryContext) -> Option<Operation> {
    let keyed = !table.key_columns.is_empty()
        && table.key_columns.iter().all(|k| ctx.qualifier(k).is_some());

    match (keyed, &table.get, &table.list) {
        (true, Some(_), _) => Some(Operation::Get),
        (_, _, Some(_)) => Some(Operation::List),
        _ => None,
    }
}

/// Fetch the items for one query execution
pub async fn fetch_items(
    client: &dyn ResourceClient,
    table: &TableSchema,
    ctx: &QueryContext,
) -> Result<(Operation, Fetched)> {
    match choose_operation(table, ctx) {
        Some(Operation::Get) => {
            let Some(op) = table.get.as_ref() else {
                anyhow::bail!("table '{}' has no get operation", table.name);
            };
            let fetched = fetch_one(client, table, op, ctx).await?;
            Ok((Operation::Get, fetched))
        },
        Some(Operation::List) => {
            let Some(op) = table.list.as_ref() else {
                anyhow::bail!("table '{}' has no list operation", table.name);
            };
            let fetched = fetch_all(client, table, op, ctx).await?;
            Ok((Operation::List, fetched))
        },
        None => anyhow::bail!(
            "table '{}' requires qualifiers on {:?}",
            table.name,
            table.key_columns
        ),
    }
}

/// Apply the operation's error policy to a failure. A suppressed operation
/// contributes no rows, even if earlier pages succeeded.
fn classify(table: &TableSchema, op: &OperationDef, err: anyhow::Error) -> Result<Fetched> {
    if should_suppress(&err, &op.ignore_error_codes) {
        tracing::debug!(
            "{}: suppressed {}/{} error: {:#}",
            table.name,
            op.service,
            op.method,
            err
        );
        return Ok(Fetched {
            items: Vec::new(),
            suppressed: true,
        });
    }
    Err(err.context(format!("{}: {}/{} failed", table.name, op.service, op.method)))
}

/// Qualifier values an operation forwards as params
fn qualifier_params(op: &OperationDef, ctx: &QueryContext) -> Result<Vec<(String, Value)>> {
    op.qualifier_params
        .iter()
        .map(|name| {
            ctx.qualifier(name)
                .map(|v| (name.clone(), v.clone()))
                .with_context(|| format!("a qualifier on '{}' is required", name))
        })
        .collect()
}

/// Auto-paginating list
async fn fetch_all(
    client: &dyn ResourceClient,
    table: &TableSchema,
    op: &OperationDef,
    ctx: &QueryContext,
) -> Result<Fetched> {
    let qualified = qualifier_params(op, ctx)?;
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let params = op.params_with(
            qualified.iter().cloned().chain(
                page_token
                    .take()
                    .map(|token| ("pageToken".to_string(), Value::String(token))),
            ),
        );

        let response = match ctx.run(client.invoke(&op.service, &op.method, &params)).await {
            Ok(response) => response,
            Err(err) => return classify(table, op, err),
        };

        all_items.extend(extract_items(&response, &op.response_path));

        page_token = response
            .get("nextPageToken")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        if page_token.is_none() {
            return Ok(Fetched {
                items: all_items,
                suppressed: false,
            });
        }
    }

    anyhow::bail!(
        "{}: more than {} pages returned by {}/{}",
        table.name,
        MAX_PAGES,
        op.service,
        op.method
    )
}

/// Single item by key columns
async fn fetch_one(
    client: &dyn ResourceClient,
    table: &TableSchema,
    op: &OperationDef,
    ctx: &QueryContext,
) -> Result<Fetched> {
    let keys = table
        .key_columns
        .iter()
        .map(|k| {
            ctx.qualifier(k)
                .map(|v| (k.clone(), v.clone()))
                .with_context(|| format!("missing qualifier for key column '{}'", k))
        })
        .collect::<Result<Vec<_>>>()?;
    let params = op.params_with(keys.into_iter().chain(qualifier_params(op, ctx)?));

    match ctx.run(client.invoke(&op.service, &op.method, &params)).await {
        Ok(Value::Null) => Ok(Fetched::default()),
        Ok(item) => Ok(Fetched {
            items: vec![item],
            suppressed: false,
        }),
        Err(err) => classify(table, op, err),
    }
}

/// Extract items from a list response using the response path
pub fn extract_items(response: &Value, path: &str) -> Vec<Value> {
    let target = if path.is_empty() {
        Some(response)
    } else {
        path.split('.')
            .try_fold(response, |current, part| current.get(part))
    };

    target
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_items_nested_path() {
        let response = json!({"data": {"items": [{"id": 1}, {"id": 2}]}});
        assert_eq!(extract_items(&response, "data.items").len(), 2);
    }

    #[test]
    fn test_extract_items_missing_path_is_empty() {
        let response = json!({"kind": "compute#instanceList"});
        assert!(extract_items(&response, "items").is_empty());
    }

    #[test]
    fn test_extract_items_root_array() {
        let response = json!([{"id": 1}]);
        assert_eq!(extract_items(&response, "").len(), 1);
    }
}
