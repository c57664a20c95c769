//! Cache keys

use std::borrow::Borrow;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;

use super::request::RequestType;

/// Canonical identity of a normalized data request.
///
/// Format: `{type}::{identifier}::{datapoint}::{digest}` where `digest` is
/// the hex SHA-256 of the canonical JSON of the request options. Object keys
/// are sorted at every depth, so option insertion order never changes the
/// key. The readable prefix lets whole groups be invalidated at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a request.
    pub fn new(
        request_type: RequestType,
        identifier: &str,
        datapoint: &str,
        data: &Map<String, Value>,
    ) -> Self {
        let canonical = canonicalize(&Value::Object(data.clone())).to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        Self(format!(
            "{}{:x}",
            Self::group_prefix(request_type, identifier, Some(datapoint)),
            digest
        ))
    }

    /// Wraps a key received from the server.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the prefix shared by every key of a module, or of one of its
    /// datapoints.
    pub fn group_prefix(
        request_type: RequestType,
        identifier: &str,
        datapoint: Option<&str>,
    ) -> String {
        match datapoint {
            Some(datapoint) => format!("{}::{}::{}::", request_type, identifier, datapoint),
            None => format!("{}::{}::", request_type, identifier),
        }
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the key falls under `prefix`.
    pub fn is_in_group(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Rebuilds a value with object members in sorted key order at every depth.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(&String, &Value)> = object.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (name, value) in entries {
                sorted.insert(name.clone(), canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
