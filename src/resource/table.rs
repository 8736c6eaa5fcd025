//! Table schemas
//!
//! The declarative unit handed to the query engine: name, key columns,
//! list/get bindings, hydrate calls and the merged column list. Built and
//! validated once at start-up, read-only afterwards.

use super::classify::ErrorMatch;
use super::column::{Column, ColumnDef, ValueSource};
use super::column_set;
use super::path::FieldPath;
use super::ResourceClient;
use crate::query::QueryContext;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

fn default_response_path() -> String {
    "items".to_string()
}

/// List or Get binding for a table
#[derive(Debug, Clone, Deserialize)]
pub struct OperationDef {
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Where the items sit in a list response (ignored for get)
    #[serde(default = "default_response_path")]
    pub response_path: String,
    /// Error markers that mean "zero rows" for this operation. Absent: the
    /// usual not-found set; `[]` turns suppression off.
    #[serde(default = "ErrorMatch::not_found")]
    pub ignore_error_codes: ErrorMatch,
    /// Qualifiers passed through as params (required for a list to run)
    #[serde(default)]
    pub qualifier_params: Vec<String>,
}

impl OperationDef {
    /// Declared params as an object, with `extra` merged on top
    pub fn params_with(&self, extra: impl IntoIterator<Item = (String, Value)>) -> Value {
        let mut map = match &self.params {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        map.extend(extra);
        Value::Object(map)
    }
}

/// Supplementary fetch feeding one or more columns
#[derive(Debug, Clone, Deserialize)]
pub struct HydrateDef {
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Item field identifying the row. Absent: one call per query execution.
    #[serde(default)]
    pub key_field: Option<FieldPath>,
}

/// Table as declared in a definition file
#[derive(Debug, Clone, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub list: Option<OperationDef>,
    #[serde(default)]
    pub get: Option<OperationDef>,
    #[serde(default)]
    pub hydrate: HashMap<String, HydrateDef>,
    pub columns: Vec<ColumnDef>,
}

/// Columns and hydrates every table gets
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    pub columns: Vec<Column>,
    pub hydrates: HashMap<String, HydrateDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaselineDef {
    #[serde(default)]
    pub hydrate: HashMap<String, HydrateDef>,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
}

impl TryFrom<BaselineDef> for Baseline {
    type Error = anyhow::Error;

    fn try_from(def: BaselineDef) -> Result<Self> {
        let columns = def
            .columns
            .into_iter()
            .map(Column::try_from)
            .collect::<Result<Vec<_>>>()
            .context("baseline columns")?;
        ensure_unique(&columns).context("baseline columns")?;
        Ok(Self {
            columns,
            hydrates: def.hydrate,
        })
    }
}

fn ensure_unique(columns: &[Column]) -> Result<()> {
    let mut seen = HashSet::new();
    for column in columns {
        if !seen.insert(column.name.as_str()) {
            bail!("duplicate column '{}'", column.name);
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub description: String,
    pub key_columns: Vec<String>,
    pub list: Option<OperationDef>,
    pub get: Option<OperationDef>,
    hydrates: HashMap<String, HydrateDef>,
    columns: Vec<Column>,
}

impl TableSchema {
    /// Validate `def` and merge the baseline into it
    pub fn build(def: TableDef, baseline: &Baseline) -> Result<Self> {
        let name = def.name;
        let build = || -> Result<Self> {
            if def.list.is_none() && def.get.is_none() {
                bail!("no list or get operation declared");
            }

            let specific = def
                .columns
                .into_iter()
                .map(Column::try_from)
                .collect::<Result<Vec<_>>>()?;
            ensure_unique(&specific)?;
            let columns = column_set::merge(&baseline.columns, specific);

            let mut hydrates = baseline.hydrates.clone();
            hydrates.extend(def.hydrate);

            for column in &columns {
                if let ValueSource::Hydrate(hydrate) = &column.source {
                    if !hydrates.contains_key(hydrate) {
                        bail!(
                            "column '{}' uses undeclared hydrate '{}'",
                            column.name,
                            hydrate
                        );
                    }
                }
            }

            for key in &def.key_columns {
                if !columns.iter().any(|c| &c.name == key) {
                    bail!("key column '{}' is not a column", key);
                }
            }
            if def.get.is_some() && def.key_columns.is_empty() {
                bail!("get operation declared without key columns");
            }
            for op in def.list.iter().chain(def.get.iter()) {
                for param in &op.qualifier_params {
                    if !columns.iter().any(|c| &c.name == param) {
                        bail!("qualifier param '{}' is not a column", param);
                    }
                }
            }

            Ok(Self {
                name: name.clone(),
                description: def.description,
                key_columns: def.key_columns,
                list: def.list,
                get: def.get,
                hydrates,
                columns,
            })
        };

        build().with_context(|| format!("invalid table '{}'", name))
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn hydrate_def(&self, name: &str) -> Option<&HydrateDef> {
        self.hydrates.get(name)
    }

    /// Run (or reuse) the named hydrate call for `item`
    pub async fn hydrate(
        &self,
        ctx: &QueryContext,
        client: &dyn ResourceClient,
        name: &str,
        item: &Value,
    ) -> Result<Value> {
        let Some(def) = self.hydrates.get(name) else {
            bail!("unknown hydrate '{}'", name);
        };

        let (key, params) = match &def.key_field {
            None => (name.to_string(), def.params.clone()),
            Some(path) => {
                let id = match path.resolve(item) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => bail!("item has no '{}' to key hydrate '{}'", path, name),
                };
                let mut params = match &def.params {
                    Value::Object(map) => map.clone(),
                    _ => Map::new(),
                };
                params.insert("name".to_string(), Value::String(id.clone()));
                (format!("{}:{}", name, id), Value::Object(params))
            },
        };

        let key = key.as_str();
        let params = &params;
        ctx.cache()
            .get_or_compute(key, move || async move {
                tracing::debug!("hydrate {} ({}/{})", key, def.service, def.method);
                ctx.run(client.invoke(&def.service, &def.method, params))
                    .await
            })
            .await
    }
}
