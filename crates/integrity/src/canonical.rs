//! Canonical byte form of request bodies.
//!
//! JSON bodies are re-serialized compactly with object keys sorted by code
//! point at every depth; any other media type passes through untouched.
//! Numbers keep the text they were written with, so integers beyond 64 bits
//! stay exact.

use std::borrow::Cow;
use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

/// What to do with a body that claims to be JSON but does not parse.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CanonicalFallback {
    /// Digest the raw bytes instead.
    #[default]
    Raw,
    /// Refuse the request.
    Reject,
}

impl FromStr for CanonicalFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" | "lenient" => Ok(Self::Raw),
            "reject" | "strict" => Ok(Self::Reject),
            other => Err(format!("unknown canonical fallback '{other}' (expected raw|reject)")),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("body declared as JSON does not parse: {0}")]
    NotJson(String),
}

/// `application/json` or any `+json` suffix type. Case and parameters are
/// ignored.
pub fn is_json_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || (essence.ends_with("+json") && essence.contains('/'))
}

/// Canonical bytes for `body`, falling back to the body itself when a JSON
/// body does not parse.
pub fn canonicalize<'a>(body: &'a [u8], content_type: Option<&str>) -> Cow<'a, [u8]> {
    match canonicalize_strict(body, content_type) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(error = %err, "falling back to raw body bytes");
            Cow::Borrowed(body)
        }
    }
}

/// Like [`canonicalize`], but a JSON body that does not parse is an error.
pub fn canonicalize_strict<'a>(
    body: &'a [u8],
    content_type: Option<&str>,
) -> Result<Cow<'a, [u8]>, CanonicalError> {
    if !content_type.is_some_and(is_json_media_type) {
        return Ok(Cow::Borrowed(body));
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|e| CanonicalError::NotJson(e.to_string()))?;
    let bytes = serde_json::to_vec(&sorted(value))
        .map_err(|e| CanonicalError::NotJson(e.to_string()))?;
    Ok(Cow::Owned(bytes))
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut out = Map::new();
            for (key, value) in entries {
                out.insert(key, sorted(value));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}
