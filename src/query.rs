//! Query execution
//!
//! Drives one table query: picks the List or Get operation, then projects
//! every returned item into a row. Rows are resolved concurrently and each
//! column independently; columns never see each other's values.

use crate::resource::{fetch_items, HydrateCache, Operation, ResourceClient, TableSchema};
use anyhow::{bail, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default number of rows projected at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// What to do when a column fails to resolve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnErrorPolicy {
    /// Emit the row with the column set to null
    #[default]
    Null,
    /// Drop the whole row
    FailRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySettings {
    pub max_concurrency: usize,
    pub column_error_policy: ColumnErrorPolicy,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            column_error_policy: ColumnErrorPolicy::default(),
        }
    }
}

/// State scoped to one query execution
pub struct QueryContext {
    pub query_id: Uuid,
    pub table: String,
    qualifiers: HashMap<String, Value>,
    cache: HydrateCache,
    cancel: CancellationToken,
    pub settings: QuerySettings,
}

impl QueryContext {
    pub fn new(
        table: &str,
        qualifiers: HashMap<String, Value>,
        settings: QuerySettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            table: table.to_string(),
            qualifiers,
            cache: HydrateCache::new(),
            cancel,
            settings,
        }
    }

    /// Context with no qualifiers and default settings
    pub fn for_table(table: &str) -> Self {
        Self::new(
            table,
            HashMap::new(),
            QuerySettings::default(),
            CancellationToken::new(),
        )
    }

    pub fn with_qualifier(mut self, column: &str, value: Value) -> Self {
        self.qualifiers.insert(column.to_string(), value);
        self
    }

    pub fn qualifier(&self, column: &str) -> Option<&Value> {
        self.qualifiers.get(column)
    }

    pub fn qualifiers(&self) -> &HashMap<String, Value> {
        &self.qualifiers
    }

    pub fn cache(&self) -> &HydrateCache {
        &self.cache
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            bail!("query cancelled");
        }
        Ok(())
    }

    /// Await `fut` unless the query is cancelled first
    pub async fn run<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => bail!("query cancelled"),
            result = fut => result,
        }
    }
}

/// A column that failed to resolve
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnError {
    pub column: String,
    pub message: String,
}

/// One output row, in column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub cells: Vec<(String, Value)>,
    pub errors: Vec<ColumnError>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Does every qualifier equal this row's value for its column?
    pub fn matches(&self, qualifiers: &HashMap<String, Value>) -> bool {
        qualifiers
            .iter()
            .all(|(column, expected)| self.get(column) == Some(expected))
    }

    /// `{column: value}` map for the query engine
    pub fn to_map(&self) -> Map<String, Value> {
        self.cells.iter().cloned().collect()
    }
}

#[derive(Debug, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    /// Errors of rows dropped under [`ColumnErrorPolicy::FailRow`]
    pub dropped: Vec<ColumnError>,
    /// The operation failed with an error the table treats as "no rows"
    pub suppressed: bool,
}

/// Resolve every column of `table` for one item
pub async fn project_row(
    client: &dyn ResourceClient,
    table: &TableSchema,
    ctx: &QueryContext,
    item: &Value,
) -> Row {
    let values = futures::future::join_all(
        table
            .columns()
            .iter()
            .map(|column| column.resolve(ctx, table, client, item)),
    )
    .await;

    let mut row = Row::default();
    for (column, value) in table.columns().iter().zip(values) {
        match value {
            Ok(value) => row.cells.push((column.name.clone(), value)),
            Err(err) => {
                let message = format!("{:#}", err);
                tracing::warn!("{} [{}]: {}", ctx.table, ctx.query_id, message);
                row.cells.push((column.name.clone(), Value::Null));
                row.errors.push(ColumnError {
                    column: column.name.clone(),
                    message,
                });
            },
        }
    }
    row
}

/// Execute a query against `table`
pub async fn execute(
    client: &dyn ResourceClient,
    table: &TableSchema,
    ctx: &QueryContext,
) -> Result<QueryResult> {
    let started = Instant::now();
    let (operation, fetched) = fetch_items(client, table, ctx).await?;

    let rows: Vec<Row> = stream::iter(fetched.items.iter())
        .map(|item| project_row(client, table, ctx, item))
        .buffered(ctx.settings.max_concurrency.max(1))
        .collect()
        .await;
    ctx.check_cancelled()?;

    let mut result = QueryResult {
        suppressed: fetched.suppressed,
        ..Default::default()
    };

    for row in rows {
        if !row.errors.is_empty() && ctx.settings.column_error_policy == ColumnErrorPolicy::FailRow {
            result.dropped.extend(row.errors);
            continue;
        }
        result.rows.push(row);
    }

    tracing::info!(
        "{} [{}]: {} rows via {} in {:?} (hydrate: {} computes, {} hits)",
        table.name,
        ctx.query_id,
        result.rows.len(),
        match operation {
            Operation::List => "list",
            Operation::Get => "get",
        },
        started.elapsed(),
        ctx.cache().computes(),
        ctx.cache().hits()
    );

    Ok(result)
}
