//! Data requests
//!
//! A [`DataRequest`] names one datapoint of one module (or of core), the
//! options it is queried with, how old a cached answer may be, and who to
//! hand the answer to.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use serde_json::json;
//! use sitekit_data::api::DataRequest;
//!
//! let request = DataRequest::module("search-console", "searchanalytics")
//!     .with_data("dimensions", json!("date"))
//!     .max_age(Duration::from_secs(600))
//!     .priority(1)
//!     .on_resolve(|result, datapoint| {
//!         println!("{datapoint}: {result}");
//!     });
//! assert_eq!(request.priority, 1);
//! ```

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use super::key::CacheKey;
use crate::error::Error;

/// Default max age of a cached answer.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

/// Default priority; at the deferral threshold.
pub const DEFAULT_PRIORITY: u32 = 10;

/// Callback receiving the result and the datapoint name.
pub type Callback = Box<dyn FnOnce(&Value, &str) + Send + 'static>;

/// Whether a request targets a core endpoint or a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    /// Core plugin endpoints (`core/site`, `core/user`, ...).
    Core,
    /// Module endpoints (`modules/analytics`, ...).
    Modules,
}

impl RequestType {
    /// Returns the path segment for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Modules => "modules",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single data request.
///
/// Requests are consumed when resolved, so the callback runs at most once.
pub struct DataRequest {
    /// Core or module request.
    pub request_type: RequestType,
    /// Module slug, or the core area (`site`, `user`).
    pub identifier: String,
    /// Datapoint name, e.g. `report`.
    pub datapoint: String,
    /// Query options. May include `dateRange`.
    pub data: Map<String, Value>,
    /// How old a cached answer may be.
    pub max_age: Duration,
    /// Scheduling priority; lower is sent first.
    pub priority: u32,
    callback: Option<Callback>,
}

impl DataRequest {
    /// Creates a new request with default max age and priority.
    pub fn new(
        request_type: RequestType,
        identifier: impl Into<String>,
        datapoint: impl Into<String>,
    ) -> Self {
        Self {
            request_type,
            identifier: identifier.into(),
            datapoint: datapoint.into(),
            data: Map::new(),
            max_age: DEFAULT_MAX_AGE,
            priority: DEFAULT_PRIORITY,
            callback: None,
        }
    }

    /// Creates a new module request.
    pub fn module(identifier: impl Into<String>, datapoint: impl Into<String>) -> Self {
        Self::new(RequestType::Modules, identifier, datapoint)
    }

    /// Creates a new core request.
    pub fn core(identifier: impl Into<String>, datapoint: impl Into<String>) -> Self {
        Self::new(RequestType::Core, identifier, datapoint)
    }

    /// Sets a single query option.
    pub fn with_data(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    /// Replaces all query options.
    pub fn data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Sets the max age of an acceptable cached answer.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Sets the scheduling priority.
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the callback invoked with the result.
    pub fn on_resolve<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Value, &str) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Returns `true` if a callback is attached.
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Returns the `dateRange` option, if set.
    pub fn date_range(&self) -> Option<&str> {
        self.data.get("dateRange").and_then(Value::as_str)
    }

    /// Computes the cache key of this request as it currently stands.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.request_type, &self.identifier, &self.datapoint, &self.data)
    }

    /// Rejects requests that cannot be routed.
    pub fn validate(&self) -> Result<(), Error> {
        if self.identifier.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "{} request for datapoint '{}' has an empty identifier",
                self.request_type, self.datapoint
            )));
        }
        if self.datapoint.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "{}/{} request has an empty datapoint",
                self.request_type, self.identifier
            )));
        }
        Ok(())
    }

    pub(crate) fn take_callback(&mut self) -> Option<Callback> {
        self.callback.take()
    }

    pub(crate) fn to_wire<'a>(&'a self, key: &'a CacheKey) -> WireRequest<'a> {
        WireRequest {
            request_type: self.request_type,
            identifier: &self.identifier,
            datapoint: &self.datapoint,
            data: &self.data,
            key,
            max_age: self.max_age.as_secs(),
            priority: self.priority,
        }
    }
}

impl fmt::Debug for DataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRequest")
            .field("request_type", &self.request_type)
            .field("identifier", &self.identifier)
            .field("datapoint", &self.datapoint)
            .field("data", &self.data)
            .field("max_age", &self.max_age)
            .field("priority", &self.priority)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// A request as it travels in the batch body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireRequest<'a> {
    #[serde(rename = "type")]
    request_type: RequestType,
    identifier: &'a str,
    datapoint: &'a str,
    data: &'a Map<String, Value>,
    key: &'a CacheKey,
    max_age: u64,
    priority: u32,
}

/// A normalized request paired with its cache key.
#[derive(Debug)]
pub(crate) struct Pending {
    pub key: CacheKey,
    pub request: DataRequest,
}

impl Pending {
    pub fn new(request: DataRequest) -> Self {
        Self {
            key: request.cache_key(),
            request,
        }
    }
}
