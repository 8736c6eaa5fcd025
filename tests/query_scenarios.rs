//! Query execution scenarios against an in-memory resource client
//!
//! Covers operation error suppression, missing-field defaults, hydrate
//! sharing across concurrent rows and column error isolation.

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tgcp_rows::query::{execute, ColumnErrorPolicy, QueryContext, QuerySettings};
use tgcp_rows::resource::table::{Baseline, BaselineDef, TableDef, TableSchema};
use tgcp_rows::resource::ResourceClient;
use tokio_util::sync::CancellationToken;

/// Canned responses keyed by `service/method`
#[derive(Default)]
struct MockClient {
    responses: HashMap<String, std::result::Result<Value, String>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl MockClient {
    fn new() -> Self {
        Self::default()
    }

    fn ok(mut self, call: &str, value: Value) -> Self {
        self.responses.insert(call.to_string(), Ok(value));
        self
    }

    fn err(mut self, call: &str, message: &str) -> Self {
        self.responses.insert(call.to_string(), Err(message.to_string()));
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self, call: &str) -> usize {
        self.calls.lock().unwrap().get(call).copied().unwrap_or(0)
    }
}

impl ResourceClient for MockClient {
    fn invoke<'a>(
        &'a self,
        service: &'a str,
        method: &'a str,
        _params: &'a Value,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            let key = format!("{}/{}", service, method);
            *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            match self.responses.get(&key) {
                Some(Ok(value)) => Ok(value.clone()),
                Some(Err(message)) => Err(anyhow::anyhow!("{}", message)),
                None => Err(anyhow::anyhow!("no canned response for {}", key)),
            }
        }
        .boxed()
    }
}

fn baseline() -> Baseline {
    let def: BaselineDef = serde_json::from_value(json!({
        "hydrate": {"subscription": {"service": "identity", "method": "get_subscription"}},
        "columns": [
            {"name": "subscription_id", "type": "string", "hydrate": "subscription",
             "transform": [{"op": "field", "path": "id"}]},
            {"name": "region", "type": "string", "field": "location"}
        ]
    }))
    .unwrap();
    Baseline::try_from(def).unwrap()
}

fn storage_table() -> TableSchema {
    let def: TableDef = serde_json::from_value(json!({
        "name": "storage_account",
        "key_columns": ["name"],
        "list": {
            "service": "storage",
            "method": "list_accounts",
            "response_path": "value",
            "ignore_error_codes": ["ResourceGroupNotFound", "ResourceNotFound"]
        },
        "get": {
            "service": "storage",
            "method": "get_account",
            "ignore_error_codes": ["ResourceNotFound"]
        },
        "columns": [
            {"name": "name", "type": "string"},
            {"name": "sku_name", "type": "string", "field": "properties.sku.name"},
            {"name": "https_only", "type": "bool", "field": "properties.sku.httpsOnly", "default": false},
            {"name": "region", "type": "string", "field": "location", "transform": [{"op": "lower"}]},
            {"name": "size", "type": "int", "field": "properties.size"},
            {"name": "resource_group", "type": "string", "qualifier": "resource_group"}
        ]
    }))
    .unwrap();
    TableSchema::build(def, &baseline()).unwrap()
}

fn accounts(n: usize) -> Value {
    let items: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "name": format!("acct{}", i),
                "location": "EastUS",
                "properties": {"sku": {"name": "Standard_LRS", "httpsOnly": true}, "size": "10"}
            })
        })
        .collect();
    json!({ "value": items })
}

#[tokio::test]
async fn test_suppressed_list_error_yields_zero_rows() {
    let client = MockClient::new().err(
        "storage/list_accounts",
        "ResourceGroupNotFound: Resource group 'rg1' could not be found.",
    );
    let table = storage_table();
    let ctx = QueryContext::for_table(&table.name);

    let result = execute(&client, &table, &ctx).await.unwrap();
    assert!(result.rows.is_empty());
    assert!(result.suppressed);
}

#[tokio::test]
async fn test_unmatched_list_error_propagates_unchanged() {
    let client = MockClient::new().err(
        "storage/list_accounts",
        "InternalServerError: something broke upstream",
    );
    let table = storage_table();
    let ctx = QueryContext::for_table(&table.name);

    let err = execute(&client, &table, &ctx).await.unwrap_err();
    assert_eq!(err.root_cause().to_string(), "InternalServerError: something broke upstream");
    assert!(format!("{:#}", err).contains("storage_account: storage/list_accounts failed"));
}

#[tokio::test]
async fn test_get_is_used_when_key_qualified() {
    let client = MockClient::new()
        .err("storage/get_account", "ResourceNotFound: no such account")
        .ok("identity/get_subscription", json!({"id": "sub-1"}));
    let table = storage_table();
    let ctx = QueryContext::for_table(&table.name).with_qualifier("name", json!("missing"));

    let result = execute(&client, &table, &ctx).await.unwrap();
    assert!(result.rows.is_empty());
    assert_eq!(client.calls("storage/get_account"), 1);
    assert_eq!(client.calls("storage/list_accounts"), 0);
}

#[tokio::test]
async fn test_missing_field_yields_declared_default() {
    let client = MockClient::new()
        .ok(
            "storage/list_accounts",
            json!({"value": [{"name": "bare", "location": "WestEurope", "properties": {}}]}),
        )
        .ok("identity/get_subscription", json!({"id": "sub-1"}));
    let table = storage_table();
    let ctx = QueryContext::for_table(&table.name);

    let result = execute(&client, &table, &ctx).await.unwrap();
    let row = &result.rows[0];
    assert!(row.errors.is_empty(), "{:?}", row.errors);
    assert_eq!(row.get("https_only"), Some(&json!(false)));
    // No default declared: zero value of the type
    assert_eq!(row.get("sku_name"), Some(&json!("")));
    assert_eq!(row.get("size"), Some(&json!(0)));
}

#[tokio::test]
async fn test_specific_column_overrides_baseline() {
    let client = MockClient::new()
        .ok("storage/list_accounts", accounts(1))
        .ok("identity/get_subscription", json!({"id": "sub-1"}));
    let table = storage_table();
    let ctx = QueryContext::for_table(&table.name);

    let result = execute(&client, &table, &ctx).await.unwrap();
    let row = &result.rows[0];
    assert_eq!(row.get("region"), Some(&json!("eastus")));
    assert_eq!(row.get("size"), Some(&json!(10)));
    let names: Vec<&str> = row.cells.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec!["name", "sku_name", "https_only", "region", "size", "resource_group", "subscription_id"]
    );
}

#[tokio::test]
async fn test_qualifier_is_echoed_into_column() {
    let client = MockClient::new()
        .ok("storage/list_accounts", accounts(2))
        .ok("identity/get_subscription", json!({"id": "sub-1"}));
    let table = storage_table();
    let ctx = QueryContext::for_table(&table.name).with_qualifier("resource_group", json!("rg-prod"));

    let result = execute(&client, &table, &ctx).await.unwrap();
    assert_eq!(result.rows.len(), 2);
    for row in &result.rows {
        assert_eq!(row.get("resource_group"), Some(&json!("rg-prod")));
    }
}

#[tokio::test]
async fn test_non_key_qualifier_filters_rows() {
    let client = MockClient::new()
        .ok(
            "storage/list_accounts",
            json!({"value": [
                {"name": "east", "location": "EastUS", "properties": {}},
                {"name": "west", "location": "WestEurope", "properties": {}}
            ]}),
        )
        .ok("identity/get_subscription", json!({"id": "sub-1"}));
    let table = storage_table();
    let ctx = QueryContext::for_table(&table.name).with_qualifier("region", json!("westeurope"));

    let mut result = execute(&client, &table, &ctx).await.unwrap();
    // Not a key column: served by list, every item comes back
    assert_eq!(result.rows.len(), 2);
    assert_eq!(client.calls("storage/get_account"), 0);

    result.rows.retain(|row| row.matches(ctx.qualifiers()));
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get("name"), Some(&json!("west")));
}

#[tokio::test]
async fn test_concurrent_rows_share_one_hydrate_call() {
    let client = MockClient::new()
        .ok("storage/list_accounts", accounts(2))
        .ok("identity/get_subscription", json!({"id": "sub-42"}))
        .with_delay(Duration::from_millis(20));
    let table = storage_table();
    let ctx = QueryContext::new(
        &table.name,
        HashMap::new(),
        QuerySettings {
            max_concurrency: 2,
            ..QuerySettings::default()
        },
        CancellationToken::new(),
    );

    let result = execute(&client, &table, &ctx).await.unwrap();
    assert_eq!(result.rows.len(), 2);
    for row in &result.rows {
        assert_eq!(row.get("subscription_id"), Some(&json!("sub-42")));
    }
    assert_eq!(client.calls("identity/get_subscription"), 1);
    assert_eq!(ctx.cache().computes(), 1);
}

#[tokio::test]
async fn test_hydrate_failure_is_column_scoped() {
    let client = MockClient::new()
        .ok("storage/list_accounts", accounts(3))
        .err("identity/get_subscription", "AuthorizationFailed");
    let table = storage_table();
    let ctx = QueryContext::for_table(&table.name);

    let result = execute(&client, &table, &ctx).await.unwrap();
    assert_eq!(result.rows.len(), 3);
    for row in &result.rows {
        assert_eq!(row.get("subscription_id"), Some(&Value::Null));
        assert_eq!(row.get("name").and_then(|v| v.as_str()).map(|s| s.starts_with("acct")), Some(true));
        assert_eq!(row.errors.len(), 1);
        assert_eq!(row.errors[0].column, "subscription_id");
        assert!(row.errors[0].message.contains("AuthorizationFailed"));
    }
}

#[tokio::test]
async fn test_transform_failure_is_column_scoped() {
    let client = MockClient::new()
        .ok(
            "storage/list_accounts",
            json!({"value": [{"name": "odd", "location": 42, "properties": {"size": "10"}}]}),
        )
        .ok("identity/get_subscription", json!({"id": "sub-1"}));
    let table = storage_table();
    let ctx = QueryContext::for_table(&table.name);

    let result = execute(&client, &table, &ctx).await.unwrap();
    let row = &result.rows[0];
    assert_eq!(row.get("region"), Some(&Value::Null));
    assert_eq!(row.get("size"), Some(&json!(10)));
    assert_eq!(row.errors.len(), 1);
    assert!(row.errors[0].message.contains("column 'region'"));
    assert!(row.errors[0].message.contains("transform step 0 (lower) failed"));
}

#[tokio::test]
async fn test_fail_row_policy_drops_rows_with_errors() {
    let client = MockClient::new()
        .ok(
            "storage/list_accounts",
            json!({"value": [
                {"name": "good", "location": "eastus", "properties": {}},
                {"name": "bad", "location": 42, "properties": {}}
            ]}),
        )
        .ok("identity/get_subscription", json!({"id": "sub-1"}));
    let table = storage_table();
    let ctx = QueryContext::new(
        &table.name,
        HashMap::new(),
        QuerySettings {
            column_error_policy: ColumnErrorPolicy::FailRow,
            ..QuerySettings::default()
        },
        CancellationToken::new(),
    );

    let result = execute(&client, &table, &ctx).await.unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get("name"), Some(&json!("good")));
    assert_eq!(result.dropped.len(), 1);
}

#[tokio::test]
async fn test_rows_keep_item_order_under_concurrency() {
    let client = MockClient::new()
        .ok("storage/list_accounts", accounts(8))
        .ok("identity/get_subscription", json!({"id": "sub-1"}))
        .with_delay(Duration::from_millis(5));
    let table = storage_table();
    let ctx = QueryContext::new(
        &table.name,
        HashMap::new(),
        QuerySettings {
            max_concurrency: 3,
            ..QuerySettings::default()
        },
        CancellationToken::new(),
    );

    let result = execute(&client, &table, &ctx).await.unwrap();
    assert_eq!(result.rows.len(), 8);
    let names: Vec<&str> = result
        .rows
        .iter()
        .filter_map(|r| r.get("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(names[0], "acct0");
    assert_eq!(names[7], "acct7");
}

#[tokio::test]
async fn test_cancelled_query_fails() {
    let client = MockClient::new()
        .ok("storage/list_accounts", accounts(1))
        .with_delay(Duration::from_millis(200));
    let table = storage_table();
    let ctx = QueryContext::for_table(&table.name);
    ctx.cancel();

    let err = execute(&client, &table, &ctx).await.unwrap_err();
    assert!(format!("{:#}", err).contains("query cancelled"));
}

#[test]
fn test_duplicate_baseline_columns_are_rejected() {
    let def: BaselineDef = serde_json::from_value(json!({
        "columns": [
            {"name": "region", "type": "string"},
            {"name": "region", "type": "string", "field": "location"}
        ]
    }))
    .unwrap();
    assert!(Baseline::try_from(def).is_err());
}
