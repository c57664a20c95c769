//! Request files for the `fetch` command
//!
//! A request file is a JSON array of datapoint requests:
//!
//! ```json
//! [
//!   { "type": "modules", "identifier": "analytics", "datapoint": "report",
//!     "data": { "metrics": "ga:users" }, "priority": 1 },
//!   { "type": "core", "identifier": "site", "datapoint": "connection" }
//! ]
//! ```

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use sitekit_data::api::DEFAULT_PRIORITY;
use sitekit_data::api::DataRequest;
use sitekit_data::api::RequestType;

/// One entry of a request file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEntry {
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub identifier: String,
    pub datapoint: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Seconds.
    pub max_age: Option<u64>,
    pub priority: Option<u32>,
}

/// A resolved datapoint as printed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved {
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub identifier: String,
    pub datapoint: String,
    pub result: Value,
}

/// Results collected by request callbacks, in resolution order.
pub type Sink = Arc<Mutex<Vec<Resolved>>>;

/// Parses a request file.
pub fn parse(json: &str) -> Result<Vec<RequestEntry>, serde_json::Error> {
    serde_json::from_str(json)
}

impl RequestEntry {
    /// Builds the data request, reporting its result into `sink`.
    pub fn into_request(self, sink: &Sink) -> DataRequest {
        let mut request = DataRequest::new(self.request_type, &self.identifier, &self.datapoint)
            .data(self.data)
            .priority(self.priority.unwrap_or(DEFAULT_PRIORITY));
        if let Some(seconds) = self.max_age {
            request = request.max_age(Duration::from_secs(seconds));
        }

        let sink = sink.clone();
        let request_type = self.request_type;
        let identifier = self.identifier;
        request.on_resolve(move |result, datapoint| {
            let resolved = Resolved {
                request_type,
                identifier,
                datapoint: datapoint.to_string(),
                result: result.clone(),
            };
            match sink.lock() {
                Ok(mut results) => results.push(resolved),
                Err(poisoned) => poisoned.into_inner().push(resolved),
            }
        })
    }
}
