//! Error classification for List/Get operations
//!
//! Decides whether an upstream failure means "this resource has nothing of
//! that kind" (zero rows, no error) or a real query failure. Each operation
//! declares its own match set because the same code can mean different
//! things for different resource kinds.

use crate::gcp::http::ApiError;
use serde::Deserialize;

/// Markers that mean "not found" for most GCP resource kinds
pub const NOT_FOUND_CODES: &[&str] = &["404", "NOT_FOUND", "notFound"];

/// Per-operation set of error markers to treat as an empty result
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ErrorMatch {
    codes: Vec<String>,
}

impl ErrorMatch {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    /// The usual not-found set
    pub fn not_found() -> Self {
        Self::new(NOT_FOUND_CODES.iter().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }
}

/// Should `err` be swallowed and reported as zero rows?
///
/// Typed API errors match exactly on HTTP status, canonical status or a
/// per-error reason, never on their free-text message. Anything else
/// matches on message substring.
pub fn should_suppress(err: &anyhow::Error, rule: &ErrorMatch) -> bool {
    if rule.is_empty() {
        return false;
    }

    if let Some(api) = err.chain().find_map(|cause| cause.downcast_ref::<ApiError>()) {
        let status = api.status.to_string();
        return rule.codes.iter().any(|code| {
            *code == status
                || api.code.as_deref() == Some(code.as_str())
                || api.reasons.iter().any(|reason| reason == code)
        });
    }

    let text = format!("{:#}", err);
    rule.codes.iter().any(|code| text.contains(code.as_str()))
}
