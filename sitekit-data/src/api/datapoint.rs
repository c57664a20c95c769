//! Single-datapoint operations
//!
//! Direct reads and writes against `{namespace}/v1/{type}/{identifier}/data/{datapoint}`,
//! bypassing the batch endpoint.

use serde_json::Value;
use serde_json::json;

use super::dispatch;
use super::normalize::normalize;
use super::request::DataRequest;
use super::request::RequestType;
use crate::Response;
use crate::response::CacheStamp;
use crate::SiteKitClient;
use crate::cache::expires_at;
use crate::error::Error;
use crate::transport::ApiRequest;

impl SiteKitClient {
    /// Fetches one datapoint, answering from the cache when possible.
    ///
    /// The request is normalized with the current date range like a
    /// combined request, so both share cache entries. A callback attached to
    /// the request is invoked with the result.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let response = client.get(DataRequest::core("site", "connection")).await?;
    /// if response.is_cached() {
    ///     println!("cached at {:?}", response.cached_at());
    /// }
    /// ```
    pub async fn get(&self, request: DataRequest) -> Result<Response<Value>, Error> {
        request.validate()?;
        let request = normalize(request, &self.date_range());
        let key = request.cache_key();
        let max_age = request.max_age;

        if let Some(entry) = self.inner.cache.get(&key, max_age).await {
            log::debug!("Cache hit for {}", key);
            let stamp = CacheStamp {
                stored_at: entry.stored_at,
                expires_at: entry.expires_at(max_age),
            };
            let response = Response::from_cache(entry.value, stamp);
            dispatch::resolve(request, response.data());
            return Ok(response);
        }

        let mut api_request = ApiRequest::get(self.datapoint_path(
            request.request_type,
            &request.identifier,
            &request.datapoint,
        ));
        for (name, value) in &request.data {
            api_request = api_request.query(name.as_str(), query_value(value));
        }

        let value = match self.inner.transport.send(api_request).await {
            Ok(value) => value,
            Err(Error::Service(error)) => {
                log::warn!("Datapoint {} failed: {}", key, error);
                self.record_service_error(&key, error.clone());
                return Err(Error::Service(error));
            }
            Err(e) => return Err(e),
        };

        self.clear_service_error(&key);
        let response = match self.inner.cache.set(&key, &value).await {
            Some(stored_at) => Response::stored(
                value,
                CacheStamp {
                    stored_at,
                    expires_at: expires_at(stored_at, max_age),
                },
            ),
            None => Response::uncached(value),
        };

        dispatch::resolve(request, response.data());
        Ok(response)
    }

    /// Writes a datapoint and invalidates its cached reads.
    ///
    /// Returns the site's response body.
    pub async fn set(
        &self,
        request_type: RequestType,
        identifier: &str,
        datapoint: &str,
        data: Value,
    ) -> Result<Value, Error> {
        if identifier.is_empty() || datapoint.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "cannot write {}/{}/{}",
                request_type, identifier, datapoint
            )));
        }

        let path = self.datapoint_path(request_type, identifier, datapoint);
        let response = self
            .inner
            .transport
            .send(ApiRequest::post(path, json!({ "data": data })))
            .await?;

        self.invalidate_cache(request_type, identifier, Some(datapoint))
            .await;
        Ok(response)
    }

    /// Removes cached answers for a module, or for one of its datapoints.
    ///
    /// Returns the number of entries removed.
    pub async fn invalidate_cache(
        &self,
        request_type: RequestType,
        identifier: &str,
        datapoint: Option<&str>,
    ) -> usize {
        self.inner
            .cache
            .invalidate_group(request_type, identifier, datapoint)
            .await
    }

    fn datapoint_path(&self, request_type: RequestType, identifier: &str, datapoint: &str) -> String {
        format!(
            "{}/v1/{}/{}/data/{}",
            self.inner.namespace, request_type, identifier, datapoint
        )
    }
}

/// Strings go out as-is; everything else as its JSON text.
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
