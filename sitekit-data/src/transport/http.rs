//! reqwest-backed transport

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::ApiRequest;
use super::Transport;
use crate::error::ApiError;
use crate::error::Error;
use crate::error::ServiceError;

/// Credentials attached to every call.
#[derive(Clone, Default)]
pub enum Credentials {
    /// No authentication.
    #[default]
    None,
    /// A `wp_rest` nonce, sent as `X-WP-Nonce` alongside the session cookie.
    Nonce(String),
    /// A WordPress application password, sent as HTTP basic auth.
    ApplicationPassword {
        /// WordPress user login.
        username: String,
        /// The generated application password.
        password: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Nonce(_) => f.write_str("Nonce(..)"),
            Self::ApplicationPassword { username, .. } => f
                .debug_struct("ApplicationPassword")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Transport that talks to a WordPress site over HTTP.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use sitekit_data::transport::{Credentials, HttpTransport};
///
/// let transport = HttpTransport::new("https://example.com")?
///     .with_credentials(Credentials::Nonce(nonce))
///     .with_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: Url,
    http_client: Client,
    credentials: Credentials,
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// Creates a transport for the site at `site_url`.
    ///
    /// Calls go to `{site_url}/wp-json/`.
    pub fn new(site_url: &str) -> Result<Self, Error> {
        let mut site = Url::parse(site_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", site_url, e)))?;
        if site.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(site_url.to_string()).into());
        }
        if !site.path().ends_with('/') {
            let path = format!("{}/", site.path());
            site.set_path(&path);
        }
        let base_url = site
            .join("wp-json/")
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", site_url, e)))?;

        Ok(Self {
            base_url,
            http_client: Client::new(),
            credentials: Credentials::None,
            timeout: None,
        })
    }

    /// Sets the credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets a custom HTTP client.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    /// Returns the REST root URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds the full URL of a request.
    pub fn url_for(&self, request: &ApiRequest) -> Result<Url, Error> {
        let mut url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", request.path, e)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value, Error> {
        let url = self.url_for(&request)?;
        log::debug!("{} {}", request.method, url);

        let mut builder = self
            .http_client
            .request(request.method.clone(), url)
            .header("Accept", "application/json");

        builder = match &self.credentials {
            Credentials::None => builder,
            Credentials::Nonce(nonce) => builder.header("X-WP-Nonce", nonce),
            Credentials::ApplicationPassword { username, password } => {
                builder.basic_auth(username, Some(password))
            }
        };

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.network_error(e))?;
        let status = response.status();

        if status.is_success() {
            let body = response.text().await.map_err(|e| self.network_error(e))?;
            return serde_json::from_str(&body)
                .map_err(|e| ApiError::parse_with_body(e.to_string(), body).into());
        }

        let status_code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        let payload = serde_json::from_str::<Value>(&body).ok();

        if let Some(error) = payload.as_ref().and_then(ServiceError::from_value) {
            return Err(Error::Service(error));
        }

        let code = payload
            .as_ref()
            .and_then(|payload| payload.get("code"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Err(Error::Api(ApiError::Http {
            status: status_code,
            message: body,
            code,
        }))
    }
}

impl HttpTransport {
    fn network_error(&self, error: reqwest::Error) -> Error {
        match self.timeout {
            Some(timeout) if error.is_timeout() => Error::Api(ApiError::Timeout(timeout)),
            _ => Error::Api(ApiError::Network(error)),
        }
    }
}
