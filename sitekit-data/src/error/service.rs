//! Per-datapoint service error payloads

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// A service error returned by the site for a single datapoint.
///
/// WordPress serialises `WP_Error` as
/// `{ "code": "...", "message": "...", "data": { "status": 403, ... } }`.
/// Site Kit adds a `reason` (the upstream Google API reason) and, when the
/// user has to reconnect, a `reconnectURL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct ServiceError {
    /// The error code (e.g. "rest_forbidden" or an upstream API code).
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Status and classification details.
    pub data: ServiceErrorData,
}

/// The `data` member of a [`ServiceError`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceErrorData {
    /// HTTP status associated with the error.
    pub status: u16,
    /// Upstream reason, e.g. `"forbidden"` or `"authError"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// URL the user must visit to reconnect the module.
    #[serde(rename = "reconnectURL", default, skip_serializing_if = "Option::is_none")]
    pub reconnect_url: Option<String>,
}

impl ServiceError {
    /// Creates a new service error.
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: ServiceErrorData {
                status,
                ..Default::default()
            },
        }
    }

    /// Sets the upstream reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.data.reason = Some(reason.into());
        self
    }

    /// Sets the reconnect URL.
    pub fn with_reconnect_url(mut self, url: impl Into<String>) -> Self {
        self.data.reconnect_url = Some(url.into());
        self
    }

    /// Recognises a service error payload inside an arbitrary JSON value.
    ///
    /// A value is an error when it is an object with a non-empty string `code`,
    /// a string `message` and a numeric `data.status`. Anything else, including
    /// successful payloads that happen to carry a `code` field, yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let code = object.get("code")?.as_str().filter(|code| !code.is_empty())?;
        let message = object.get("message")?.as_str()?;
        let data = object.get("data")?.as_object()?;
        let status = data.get("status")?.as_u64()?;

        Some(Self {
            code: code.to_string(),
            message: message.to_string(),
            data: ServiceErrorData {
                status: u16::try_from(status).unwrap_or(500),
                reason: data.get("reason").and_then(Value::as_str).map(str::to_string),
                reconnect_url: data
                    .get("reconnectURL")
                    .and_then(Value::as_str)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string),
            },
        })
    }

    /// Returns the HTTP status of the error.
    pub fn status(&self) -> u16 {
        self.data.status
    }

    /// Returns the upstream reason, if any.
    pub fn reason(&self) -> Option<&str> {
        self.data.reason.as_deref()
    }

    /// Returns the reconnect URL, if any.
    pub fn reconnect_url(&self) -> Option<&str> {
        self.data.reconnect_url.as_deref()
    }
}
