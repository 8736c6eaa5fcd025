//! Field paths
//!
//! Dotted/indexed addresses into a resource item, e.g. `disks.0.source`,
//! `tags[2]` or `autopilot.enabled`. Resolution is nil-safe: any missing
//! node yields `None`, never an error.

use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// One step of a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathToken {
    Key(String),
    Index(usize),
}

/// Parsed field path
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPath {
    tokens: Vec<PathToken>,
}

impl FieldPath {
    /// Path addressing the root value itself
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse dotted notation. Numeric segments are indexes, `a[1]` is
    /// shorthand for `a.1`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() || text == "." {
            return Ok(Self::root());
        }

        let mut tokens = Vec::new();
        for segment in text.split('.') {
            if segment.is_empty() {
                bail!("Empty segment in field path '{}'", text);
            }

            let (name, mut rest) = match segment.find('[') {
                Some(pos) => (&segment[..pos], &segment[pos..]),
                None => (segment, ""),
            };

            if !name.is_empty() {
                tokens.push(parse_segment(name));
            }

            while !rest.is_empty() {
                let Some(end) = rest.find(']') else {
                    bail!("Unterminated '[' in field path '{}'", text);
                };
                if !rest.starts_with('[') {
                    bail!("Unexpected '{}' in field path '{}'", rest, text);
                }
                let inner = &rest[1..end];
                let Ok(idx) = inner.parse::<usize>() else {
                    bail!("Invalid index '[{}]' in field path '{}'", inner, text);
                };
                tokens.push(PathToken::Index(idx));
                rest = &rest[end + 1..];
            }
        }

        Ok(Self { tokens })
    }

    /// Resolve this path against `root`
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        resolve(root, self)
    }
}

fn parse_segment(segment: &str) -> PathToken {
    match segment.parse::<usize>() {
        Ok(idx) => PathToken::Index(idx),
        Err(_) => PathToken::Key(segment.to_string()),
    }
}

/// Walk `path` from `root`.
///
/// Returns `None` when a token is absent, when a token is applied to a
/// scalar, or when a `null` is met anywhere on the way (the leaf included).
/// An index token also addresses objects whose key is the same digits.
pub fn resolve<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut current = root;

    for token in &path.tokens {
        if current.is_null() {
            return None;
        }
        current = match (token, current) {
            (PathToken::Key(key), Value::Object(map)) => map.get(key)?,
            (PathToken::Index(idx), Value::Array(arr)) => arr.get(*idx)?,
            (PathToken::Index(idx), Value::Object(map)) => map.get(&idx.to_string())?,
            _ => return None,
        };
    }

    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

impl FromStr for FieldPath {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in &self.tokens {
            if !first {
                f.write_str(".")?;
            }
            first = false;
            match token {
                PathToken::Key(key) => f.write_str(key)?,
                PathToken::Index(idx) => write!(f, "{}", idx)?,
            }
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        FieldPath::parse(&text).map_err(serde::de::Error::custom)
    }
}
