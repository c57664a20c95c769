//! Transport to the site's REST API
//!
//! The client never talks HTTP directly; it hands an [`ApiRequest`] to a
//! [`Transport`] and gets the decoded JSON body back. [`HttpTransport`] is
//! the real implementation.

mod http;

pub use http::*;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::error::Error;

/// A REST call relative to the site's `wp-json/` root.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Route below `wp-json/`, e.g. `google-site-kit/v1/data/`.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Creates a POST request with a JSON body.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    /// Adds a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

/// Sends REST calls and returns decoded JSON bodies.
///
/// Implementations return `Error::Service` when the site answers with a
/// `WP_Error` payload and a non-success status, and `Error::Api` for every
/// other failure.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request.
    async fn send(&self, request: ApiRequest) -> Result<Value, Error>;
}
