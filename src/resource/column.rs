//! Columns
//!
//! A column binds one value source (hydrate call, field extraction or
//! qualifier lookup) to a transform pipeline and a declared type.

use super::path::FieldPath;
use super::table::TableSchema;
use super::transform::Pipeline;
use super::ResourceClient;
use crate::query::QueryContext;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::IpAddr;

/// Closed set of column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Int,
    Double,
    Bool,
    Timestamp,
    IpAddress,
    Json,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Int => "int",
            ColumnType::Double => "double",
            ColumnType::Bool => "bool",
            ColumnType::Timestamp => "timestamp",
            ColumnType::IpAddress => "ip_address",
            ColumnType::Json => "json",
        };
        f.write_str(name)
    }
}

impl ColumnType {
    /// Value used when an extracted field is missing and no default is declared
    pub fn zero_value(self) -> Value {
        match self {
            ColumnType::String => Value::String(String::new()),
            ColumnType::Int => Value::from(0),
            ColumnType::Double => Value::from(0.0),
            ColumnType::Bool => Value::Bool(false),
            ColumnType::Timestamp | ColumnType::IpAddress | ColumnType::Json => Value::Null,
        }
    }

    /// Convert a pipeline output into this type. Null stays null.
    pub fn coerce(self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(value);
        }

        match (self, value) {
            (ColumnType::Json, v) => Ok(v),
            (ColumnType::String, Value::String(s)) => Ok(Value::String(s)),
            (ColumnType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (ColumnType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),
            (ColumnType::Int, Value::Number(n)) => match n.as_i64() {
                Some(i) => Ok(Value::from(i)),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                    _ => bail!("{} is not an integer", n),
                },
            },
            (ColumnType::Int, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .with_context(|| format!("'{}' is not an integer", s)),
            (ColumnType::Double, Value::Number(n)) => Ok(Value::from(n.as_f64().unwrap_or_default())),
            (ColumnType::Double, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .with_context(|| format!("'{}' is not a number", s)),
            (ColumnType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ColumnType::Bool, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => bail!("'{}' is not a boolean", s),
            },
            (ColumnType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(&s)
                .map(|ts| {
                    Value::String(
                        ts.with_timezone(&Utc)
                            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                    )
                })
                .with_context(|| format!("'{}' is not an RFC 3339 timestamp", s)),
            (ColumnType::IpAddress, Value::String(s)) => {
                validate_ip(&s)?;
                Ok(Value::String(s))
            },
            (ty, other) => bail!("cannot store {} in a {} column", other, ty),
        }
    }
}

/// Accepts a plain address or CIDR notation
fn validate_ip(text: &str) -> Result<()> {
    let (addr, prefix) = match text.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (text, None),
    };
    let ip: IpAddr = addr
        .parse()
        .with_context(|| format!("'{}' is not an IP address", text))?;
    if let Some(prefix) = prefix {
        let bits: u8 = prefix
            .parse()
            .with_context(|| format!("'{}' has an invalid prefix length", text))?;
        let max = if ip.is_ipv4() { 32 } else { 128 };
        if bits > max {
            bail!("'{}' has an invalid prefix length", text);
        }
    }
    Ok(())
}

/// Where a column's raw value comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// Result of a named hydrate call, shared through the hydration cache
    Hydrate(String),
    /// Path into the listed/fetched item
    Field(FieldPath),
    /// Echo of a caller-supplied qualifier
    Qualifier(String),
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Hydrate(name) => write!(f, "hydrate:{}", name),
            ValueSource::Field(path) => write!(f, "field:{}", path),
            ValueSource::Qualifier(name) => write!(f, "qualifier:{}", name),
        }
    }
}

/// Column as declared in a table definition file
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub field: Option<FieldPath>,
    #[serde(default)]
    pub hydrate: Option<String>,
    #[serde(default)]
    pub qualifier: Option<String>,
    #[serde(default)]
    pub transform: Pipeline,
    #[serde(default)]
    pub default: Option<Value>,
}

/// Resolved column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub description: String,
    pub column_type: ColumnType,
    pub source: ValueSource,
    pub pipeline: Pipeline,
    pub default: Option<Value>,
}

impl Column {
    pub fn new(name: &str, column_type: ColumnType, source: ValueSource) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            column_type,
            source,
            pipeline: Pipeline::default(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Check the default against the declared type
    pub fn validate(&self) -> Result<()> {
        if let Some(default) = &self.default {
            if default.is_null() {
                return Ok(());
            }
            self.column_type.coerce(default.clone()).with_context(|| {
                format!(
                    "column '{}': default {} is not a valid {}",
                    self.name, default, self.column_type
                )
            })?;
        }
        Ok(())
    }

    /// Value used when the source yields nothing
    fn missing_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| self.column_type.zero_value())
    }

    /// Produce this column's value for one item
    pub async fn resolve(
        &self,
        ctx: &QueryContext,
        table: &TableSchema,
        client: &dyn ResourceClient,
        item: &Value,
    ) -> Result<Value> {
        let raw = match &self.source {
            ValueSource::Field(path) => path.resolve(item).cloned(),
            ValueSource::Qualifier(name) => ctx.qualifier(name).cloned(),
            ValueSource::Hydrate(name) => Some(
                table
                    .hydrate(ctx, client, name, item)
                    .await
                    .with_context(|| format!("column '{}': hydrate '{}' failed", self.name, name))?,
            ),
        };

        let Some(raw) = raw else {
            return self
                .column_type
                .coerce(self.missing_value())
                .with_context(|| format!("column '{}'", self.name));
        };

        let value = self
            .pipeline
            .apply(ctx, raw)
            .with_context(|| format!("column '{}'", self.name))?;

        self.column_type
            .coerce(value)
            .with_context(|| format!("column '{}'", self.name))
    }
}

impl TryFrom<ColumnDef> for Column {
    type Error = anyhow::Error;

    fn try_from(def: ColumnDef) -> Result<Self> {
        let source = match (def.field, def.hydrate, def.qualifier) {
            (Some(path), None, None) => ValueSource::Field(path),
            (None, Some(name), None) => ValueSource::Hydrate(name),
            (None, None, Some(name)) => ValueSource::Qualifier(name),
            // No explicit source: the column name is the field path
            (None, None, None) => ValueSource::Field(
                FieldPath::parse(&def.name)
                    .with_context(|| format!("column '{}': name is not a valid field path", def.name))?,
            ),
            _ => bail!(
                "column '{}' declares more than one of field/hydrate/qualifier",
                def.name
            ),
        };

        let column = Column {
            name: def.name,
            description: def.description,
            column_type: def.column_type,
            source,
            pipeline: def.transform,
            default: def.default,
        };
        column.validate()?;
        Ok(column)
    }
}
