//! Transform steps
//!
//! Value-rewriting steps applied to a column value after it has been
//! extracted. Steps are declared as data in the table definitions, e.g.
//! `[{"op": "short_name"}, {"op": "lower"}]`, and run strictly in order.

use super::path::FieldPath;
use crate::query::QueryContext;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

/// A single `(context, value) -> value` rewrite
pub trait TransformStep: fmt::Debug + Send + Sync {
    fn apply(&self, ctx: &QueryContext, value: Value) -> Result<Value>;
}

/// Unit for epoch conversions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochUnit {
    #[default]
    Seconds,
    Millis,
}

/// Built-in transform steps
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Transform {
    /// Extract a sub-path (used on hydrate results)
    Field { path: FieldPath },
    Lower,
    Upper,
    /// Last segment of a resource URL
    /// e.g. ".../zones/us-central1-a" -> "us-central1-a"
    ShortName,
    /// Resource URL -> [self link, relative name, short name]
    AlternateIds,
    EpochToTimestamp {
        #[serde(default)]
        unit: EpochUnit,
    },
    ParseTimestamp,
    /// Zero numbers, "0", the empty string and the Unix epoch become null
    NullIfZero,
    /// "", [] and {} become null
    NullIfEmpty,
    Count,
    ToJson,
    ToString,
    ToInt,
    Map {
        values: Map<String, Value>,
        #[serde(default)]
        default: Option<Value>,
    },
    Split { separator: String },
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Field { path } => write!(f, "field({})", path),
            Transform::Lower => f.write_str("lower"),
            Transform::Upper => f.write_str("upper"),
            Transform::ShortName => f.write_str("short_name"),
            Transform::AlternateIds => f.write_str("alternate_ids"),
            Transform::EpochToTimestamp { unit } => write!(f, "epoch_to_timestamp({:?})", unit),
            Transform::ParseTimestamp => f.write_str("parse_timestamp"),
            Transform::NullIfZero => f.write_str("null_if_zero"),
            Transform::NullIfEmpty => f.write_str("null_if_empty"),
            Transform::Count => f.write_str("count"),
            Transform::ToJson => f.write_str("to_json"),
            Transform::ToString => f.write_str("to_string"),
            Transform::ToInt => f.write_str("to_int"),
            Transform::Map { .. } => f.write_str("map"),
            Transform::Split { separator } => write!(f, "split({:?})", separator),
        }
    }
}

impl TransformStep for Transform {
    fn apply(&self, _ctx: &QueryContext, value: Value) -> Result<Value> {
        match self {
            // Null-normalising steps see null too, everything else passes it on
            Transform::NullIfZero => Ok(null_if_zero(value)),
            Transform::NullIfEmpty => Ok(null_if_empty(value)),
            Transform::Map { values, default } => Ok(map_value(value, values, default)),
            _ if value.is_null() => Ok(Value::Null),
            Transform::Field { path } => Ok(path.resolve(&value).cloned().unwrap_or(Value::Null)),
            Transform::Lower => map_strings(value, |s| s.to_lowercase()),
            Transform::Upper => map_strings(value, |s| s.to_uppercase()),
            Transform::ShortName => map_strings(value, |s| short_name(s).to_string()),
            Transform::AlternateIds => alternate_ids(&value),
            Transform::EpochToTimestamp { unit } => epoch_to_timestamp(&value, *unit),
            Transform::ParseTimestamp => parse_timestamp(&value),
            Transform::Count => match &value {
                Value::Array(arr) => Ok(Value::from(arr.len())),
                Value::Object(map) => Ok(Value::from(map.len())),
                other => bail!("cannot count a {}", kind(other)),
            },
            Transform::ToJson => Ok(Value::String(serde_json::to_string(&value)?)),
            Transform::ToString => Ok(Value::String(stringify(&value))),
            Transform::ToInt => to_int(&value),
            Transform::Split { separator } => match &value {
                Value::String(s) => Ok(Value::Array(
                    s.split(separator.as_str())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                )),
                other => bail!("cannot split a {}", kind(other)),
            },
        }
    }
}

/// Ordered list of transform steps
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Pipeline {
    steps: Vec<Transform>,
}

impl Pipeline {
    pub fn new(steps: Vec<Transform>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Transform] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order. An empty pipeline is the identity.
    pub fn apply(&self, ctx: &QueryContext, value: Value) -> Result<Value> {
        let mut current = value;
        for (idx, step) in self.steps.iter().enumerate() {
            ctx.check_cancelled()?;
            current = step
                .apply(ctx, current)
                .with_context(|| format!("transform step {} ({}) failed", idx, step))?;
        }
        Ok(current)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Apply `f` to a string, or to every string of an array
fn map_strings(value: Value, f: impl Fn(&str) -> String) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(f(&s))),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(Value::String(f(&s))),
                Value::Null => Ok(Value::Null),
                other => Err(anyhow!("expected string element, got {}", kind(&other))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => bail!("expected string, got {}", kind(&other)),
    }
}

/// Extract short name from a GCP resource URL
pub fn short_name(url: &str) -> &str {
    url.trim_end_matches('/').rsplit('/').next().unwrap_or(url)
}

fn alternate_ids(value: &Value) -> Result<Value> {
    let Value::String(url) = value else {
        bail!("expected resource URL string, got {}", kind(value));
    };

    let mut ids = vec![url.clone()];
    let path = url::Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| url.clone());
    if let Some(pos) = path.find("projects/") {
        let relative = &path[pos..];
        if relative != url {
            ids.push(relative.to_string());
        }
    }
    let short = short_name(url);
    if !ids.iter().any(|id| id == short) {
        ids.push(short.to_string());
    }

    Ok(Value::Array(ids.into_iter().map(Value::String).collect()))
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn epoch_to_timestamp(value: &Value, unit: EpochUnit) -> Result<Value> {
    let Some(raw) = as_i64(value) else {
        bail!("expected epoch number, got {}", kind(value));
    };

    let ts = match unit {
        EpochUnit::Seconds => Utc.timestamp_opt(raw, 0).single(),
        EpochUnit::Millis => Utc.timestamp_millis_opt(raw).single(),
    };

    ts.map(format_timestamp)
        .with_context(|| format!("epoch value {} out of range", raw))
}

fn parse_timestamp(value: &Value) -> Result<Value> {
    let Value::String(text) = value else {
        bail!("expected timestamp string, got {}", kind(value));
    };
    let parsed = DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("invalid RFC 3339 timestamp '{}'", text))?;
    Ok(format_timestamp(parsed.with_timezone(&Utc)))
}

fn null_if_zero(value: Value) -> Value {
    let is_zero = match &value {
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => {
            s.is_empty()
                || s == "0"
                || DateTime::parse_from_rfc3339(s)
                    .map(|ts| ts.timestamp() == 0 && ts.timestamp_subsec_nanos() == 0)
                    .unwrap_or(false)
        },
        _ => false,
    };
    if is_zero {
        Value::Null
    } else {
        value
    }
}

fn null_if_empty(value: Value) -> Value {
    let empty = match &value {
        Value::String(s) => s.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        Value::Null
    } else {
        value
    }
}

fn map_value(value: Value, values: &Map<String, Value>, default: &Option<Value>) -> Value {
    let key = match &value {
        Value::Null => "null".to_string(),
        other => stringify(other),
    };
    match values.get(&key) {
        Some(mapped) => mapped.clone(),
        None => default.clone().unwrap_or(value),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        composite => composite.to_string(),
    }
}

fn to_int(value: &Value) -> Result<Value> {
    as_i64(value)
        .map(Value::from)
        .with_context(|| format!("cannot convert {} to int", kind(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> QueryContext {
        QueryContext::for_table("test_table")
    }

    fn run(step: Transform, value: Value) -> Result<Value> {
        step.apply(&ctx(), value)
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let value = json!({"a": [1, 2, {"b": null}]});
        let out = Pipeline::default().apply(&ctx(), value.clone()).unwrap();
        assert_eq!(out, value);
    }

    #[test]
    fn test_steps_run_in_order() {
        let pipeline = Pipeline::new(vec![
            Transform::ShortName,
            Transform::Upper,
            Transform::Split { separator: "-".into() },
        ]);
        let out = pipeline
            .apply(&ctx(), json!("https://x/zones/us-central1-a"))
            .unwrap();
        assert_eq!(out, json!(["US", "CENTRAL1", "A"]));
    }

    #[test]
    fn test_null_passes_through() {
        for step in [
            Transform::Lower,
            Transform::ShortName,
            Transform::Count,
            Transform::ToInt,
            Transform::EpochToTimestamp { unit: EpochUnit::Seconds },
        ] {
            assert_eq!(run(step, Value::Null).unwrap(), Value::Null);
        }
    }

    #[test]
    fn test_error_names_failing_step() {
        let pipeline = Pipeline::new(vec![Transform::Lower, Transform::Count]);
        let err = pipeline.apply(&ctx(), json!("abc")).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("transform step 1 (count) failed"), "{}", msg);
    }

    #[test]
    fn test_short_name_on_arrays() {
        let out = run(
            Transform::ShortName,
            json!(["https://x/zones/us-east1-b", "https://x/zones/us-east1-c"]),
        )
        .unwrap();
        assert_eq!(out, json!(["us-east1-b", "us-east1-c"]));
    }

    #[test]
    fn test_alternate_ids() {
        let url = "https://www.googleapis.com/compute/v1/projects/p/zones/z/instances/vm-1";
        let out = run(Transform::AlternateIds, json!(url)).unwrap();
        assert_eq!(
            out,
            json!([url, "projects/p/zones/z/instances/vm-1", "vm-1"])
        );
    }

    #[test]
    fn test_epoch_conversions() {
        let out = run(
            Transform::EpochToTimestamp { unit: EpochUnit::Seconds },
            json!(1_700_000_000),
        )
        .unwrap();
        assert_eq!(out, json!("2023-11-14T22:13:20Z"));

        let out = run(
            Transform::EpochToTimestamp { unit: EpochUnit::Millis },
            json!("1700000000000"),
        )
        .unwrap();
        assert_eq!(out, json!("2023-11-14T22:13:20Z"));
    }

    #[test]
    fn test_parse_timestamp_normalises_to_utc() {
        let out = run(Transform::ParseTimestamp, json!("2024-01-15T10:30:00.000-08:00")).unwrap();
        assert_eq!(out, json!("2024-01-15T18:30:00Z"));
        assert!(run(Transform::ParseTimestamp, json!("yesterday")).is_err());
    }

    #[test]
    fn test_null_if_zero() {
        assert_eq!(run(Transform::NullIfZero, json!(0)).unwrap(), Value::Null);
        assert_eq!(
            run(Transform::NullIfZero, json!("1970-01-01T00:00:00Z")).unwrap(),
            Value::Null
        );
        assert_eq!(run(Transform::NullIfZero, json!(5)).unwrap(), json!(5));
    }

    #[test]
    fn test_to_int_accepts_int64_strings() {
        assert_eq!(run(Transform::ToInt, json!("1234")).unwrap(), json!(1234));
        assert!(run(Transform::ToInt, json!("12.5")).is_err());
    }

    #[test]
    fn test_map_with_default() {
        let step: Transform = serde_json::from_value(json!({
            "op": "map",
            "values": {"true": "Autopilot"},
            "default": "Standard"
        }))
        .unwrap();
        assert_eq!(run(step.clone(), json!(true)).unwrap(), json!("Autopilot"));
        assert_eq!(run(step, Value::Null).unwrap(), json!("Standard"));
    }

    #[test]
    fn test_field_step_extracts_from_hydrate_result() {
        let step: Transform =
            serde_json::from_value(json!({"op": "field", "path": "bindings.0.role"})).unwrap();
        let out = run(step, json!({"bindings": [{"role": "roles/viewer"}]})).unwrap();
        assert_eq!(out, json!("roles/viewer"));
    }

    #[test]
    fn test_pipeline_observes_cancellation() {
        let ctx = ctx();
        ctx.cancel();
        let pipeline = Pipeline::new(vec![Transform::Lower]);
        assert!(pipeline.apply(&ctx, json!("A")).is_err());
        assert_eq!(Pipeline::default().apply(&ctx, json!("A")).unwrap(), json!("A"));
    }
}
