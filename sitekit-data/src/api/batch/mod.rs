//! Combined data requests
//!
//! Dashboard widgets each ask for their own datapoints. Sending one HTTP
//! call per widget would flood the site, so requests are gathered and sent
//! through the batch endpoint in rounds:
//!
//! - requests the cache can answer are resolved locally, staggered so a page
//!   full of cached widgets doesn't resolve in a single burst;
//! - the rest are deduplicated by cache key and sent in chunks, high
//!   priority first;
//! - whatever doesn't fit in the current round is sent by a later round,
//!   up to a per-call round budget.
//!
//! # Example
//!
//! ```ignore
//! let completion = client
//!     .combined_get(vec![
//!         DataRequest::module("analytics", "report").priority(1).on_resolve(render_chart),
//!         DataRequest::module("adsense", "earnings").priority(15).on_resolve(render_earnings),
//!     ])
//!     .await?;
//!
//! println!("done via {:?}", completion.source);
//! ```

mod plan;

use std::collections::HashMap;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use self::plan::KeyGroup;
use self::plan::plan_round;
use super::dispatch;
use super::normalize::normalize;
use super::request::DataRequest;
use super::request::Pending;
use crate::SiteKitClient;
use crate::api::CacheKey;
use crate::error::ApiError;
use crate::error::Error;
use crate::error::ServiceError;
use crate::transport::ApiRequest;

// =============================================================================
// Configuration
// =============================================================================

/// Scheduling parameters for combined requests.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sitekit_data::api::BatchConfig;
///
/// let config = BatchConfig::default()
///     .with_chunk_size(5)
///     .with_round_delay(Duration::from_millis(100));
/// assert_eq!(config.max_rounds, 10);
/// ```
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of distinct keys per network call.
    ///
    /// Default: 10
    pub chunk_size: usize,

    /// Requests at or above this priority wait while anything below it is
    /// pending.
    ///
    /// Default: 10
    pub priority_threshold: u32,

    /// Number of follow-up rounds one call may schedule.
    ///
    /// Default: 10
    pub max_rounds: u32,

    /// Delay before a follow-up round starts.
    ///
    /// Default: 50ms
    pub round_delay: Duration,

    /// Delay between consecutive cache-hit resolutions.
    ///
    /// Default: 25ms
    pub cache_hit_stagger: Duration,

    /// Ask the site to skip its own response cache.
    ///
    /// Default: false
    pub bypass_server_cache: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            priority_threshold: 10,
            max_rounds: 10,
            round_delay: Duration::from_millis(50),
            cache_hit_stagger: Duration::from_millis(25),
            bypass_server_cache: false,
        }
    }
}

impl BatchConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the priority threshold.
    pub fn with_priority_threshold(mut self, threshold: u32) -> Self {
        self.priority_threshold = threshold;
        self
    }

    /// Sets the follow-up round budget.
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Sets the delay before follow-up rounds.
    pub fn with_round_delay(mut self, delay: Duration) -> Self {
        self.round_delay = delay;
        self
    }

    /// Sets the cache-hit stagger.
    pub fn with_cache_hit_stagger(mut self, stagger: Duration) -> Self {
        self.cache_hit_stagger = stagger;
        self
    }

    /// Enables or disables bypassing the site's response cache.
    pub fn with_bypass_server_cache(mut self, bypass: bool) -> Self {
        self.bypass_server_cache = bypass;
        self
    }
}

// =============================================================================
// Completion
// =============================================================================

/// Where the results of a combined call came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionSource {
    /// Every request was answered by the local cache.
    Cache,
    /// At least one network call was made.
    Network,
}

/// Summary of a finished combined call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCompletion {
    /// Cache or network.
    pub source: CompletionSource,
    /// Requests resolved from the local cache.
    pub from_cache: usize,
    /// Requests resolved from network responses.
    pub from_network: usize,
    /// Keys the site answered with a service error.
    pub failed: Vec<CacheKey>,
    /// Requests dropped because the round budget ran out.
    pub dropped: usize,
    /// Requests skipped before sending because they were malformed.
    pub rejected: usize,
    /// Number of rounds run, including the first.
    pub rounds: u32,
}

// =============================================================================
// Rounds
// =============================================================================

/// Per-call scheduling state threaded through the rounds.
#[derive(Debug, Clone, Copy)]
struct BatchContext {
    remaining_rounds: u32,
}

impl BatchContext {
    fn new(max_rounds: u32) -> Self {
        Self {
            remaining_rounds: max_rounds,
        }
    }

    /// Spends one round of the budget.
    fn next_round(self) -> Option<Self> {
        self.remaining_rounds.checked_sub(1).map(|remaining_rounds| Self { remaining_rounds })
    }
}

/// Accumulated result of a round and every round it scheduled.
#[derive(Debug, Default)]
struct RoundOutcome {
    rounds: u32,
    network_calls: usize,
    from_cache: usize,
    from_network: usize,
    failed: Vec<CacheKey>,
    dropped: usize,
    rejected: usize,
    error: Option<Error>,
}

impl RoundOutcome {
    fn merge(&mut self, other: RoundOutcome) {
        self.rounds += other.rounds;
        self.network_calls += other.network_calls;
        self.from_cache += other.from_cache;
        self.from_network += other.from_network;
        self.failed.extend(other.failed);
        self.dropped += other.dropped;
        self.rejected += other.rejected;
        if self.error.is_none() {
            self.error = other.error;
        }
    }

    fn into_completion(self) -> Result<BatchCompletion, Error> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let source = if self.network_calls > 0 {
            CompletionSource::Network
        } else {
            CompletionSource::Cache
        };

        Ok(BatchCompletion {
            source,
            from_cache: self.from_cache,
            from_network: self.from_network,
            failed: self.failed,
            dropped: self.dropped,
            rejected: self.rejected,
            rounds: self.rounds,
        })
    }
}

/// What one chunk's response resolved.
#[derive(Debug, Default)]
struct ChunkOutcome {
    resolved: usize,
    failed: Vec<CacheKey>,
}

impl SiteKitClient {
    /// Resolves a set of data requests through the cache and the batch
    /// endpoint.
    ///
    /// Each request's callback is invoked once with its result. Requests the
    /// site answers with a service error are not resolved; their keys are
    /// listed in [`BatchCompletion::failed`] and the error is available from
    /// [`SiteKitClient::error_for`]. Malformed requests are skipped and
    /// counted in [`BatchCompletion::rejected`]; the rest are still sent.
    ///
    /// Returns the first network error if any chunk failed to send, after
    /// every scheduled round has settled. Results delivered by other chunks
    /// stay delivered and cached.
    pub async fn combined_get(&self, requests: Vec<DataRequest>) -> Result<BatchCompletion, Error> {
        let date_range = self.date_range();
        let mut rejected = 0;
        let mut pending = Vec::with_capacity(requests.len());
        for request in requests {
            match request.validate() {
                Ok(()) => pending.push(Pending::new(normalize(request, &date_range))),
                Err(e) => {
                    log::warn!("Skipping request: {}", e);
                    rejected += 1;
                }
            }
        }

        log::debug!("Combined request for {} datapoints", pending.len());

        let context = BatchContext::new(self.inner.batch_config.max_rounds);
        let mut outcome = self.run_round(pending, context).await;
        outcome.rejected = rejected;

        if let Some(error) = &outcome.error {
            log::error!("Combined request finished with a failed network call: {}", error);
        }

        outcome.into_completion()
    }

    /// Runs [`combined_get`](Self::combined_get) on the tokio runtime.
    ///
    /// For callers that only observe results through callbacks.
    pub fn spawn_combined_get(
        &self,
        requests: Vec<DataRequest>,
    ) -> JoinHandle<Result<BatchCompletion, Error>> {
        let client = self.clone();
        tokio::spawn(async move { client.combined_get(requests).await })
    }

    fn run_round(&self, pending: Vec<Pending>, context: BatchContext) -> BoxFuture<'_, RoundOutcome> {
        async move {
            let config = &self.inner.batch_config;
            let mut outcome = RoundOutcome {
                rounds: 1,
                ..Default::default()
            };

            let (hits, misses) = self.partition_cached(pending).await;
            outcome.from_cache = hits.len();

            let plan = plan_round(misses, config);
            if plan.is_empty() {
                log::debug!("Round answered from cache ({} hits)", hits.len());
                self.resolve_cached(hits).await;
                return outcome;
            }

            let mut next = None;
            if !plan.remaining.is_empty() {
                match context.next_round() {
                    Some(next_context) => next = Some((plan.remaining, next_context)),
                    None => {
                        log::warn!(
                            "Round budget exhausted, dropping {} pending requests",
                            plan.remaining.len()
                        );
                        outcome.dropped = plan.remaining.len();
                    }
                }
            }

            let chunk = plan.chunk;
            let network = async {
                if chunk.is_empty() {
                    None
                } else {
                    Some(self.send_chunk(chunk).await)
                }
            };
            let follow_up = async {
                match next {
                    Some((remaining, next_context)) => {
                        tokio::time::sleep(config.round_delay).await;
                        Some(self.run_round(remaining, next_context).await)
                    }
                    None => None,
                }
            };

            let ((), sent, later) = tokio::join!(self.resolve_cached(hits), network, follow_up);

            match sent {
                Some(Ok(chunk_outcome)) => {
                    outcome.network_calls += 1;
                    outcome.from_network += chunk_outcome.resolved;
                    outcome.failed.extend(chunk_outcome.failed);
                }
                Some(Err(error)) => {
                    log::error!("Batch request failed: {}", error);
                    outcome.network_calls += 1;
                    outcome.error = Some(error);
                }
                None => {}
            }

            if let Some(later) = later {
                outcome.merge(later);
            }

            outcome
        }
        .boxed()
    }

    /// Splits requests into cache hits (with their values) and misses.
    async fn partition_cached(&self, pending: Vec<Pending>) -> (Vec<(Pending, Value)>, Vec<Pending>) {
        let mut hits = Vec::new();
        let mut misses = Vec::new();

        for item in pending {
            match self.inner.cache.get(&item.key, item.request.max_age).await {
                Some(entry) => hits.push((item, entry.value)),
                None => misses.push(item),
            }
        }

        (hits, misses)
    }

    /// Resolves cache hits, the n-th one `n × stagger` after the first.
    async fn resolve_cached(&self, hits: Vec<(Pending, Value)>) {
        let stagger = self.inner.batch_config.cache_hit_stagger;
        let start = Instant::now();

        for (index, (pending, value)) in hits.into_iter().enumerate() {
            let delay = stagger.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX));
            tokio::time::sleep_until(start + delay).await;
            log::trace!("Resolving {} from cache", pending.key);
            dispatch::resolve(pending.request, &value);
        }
    }

    /// Sends one chunk and resolves its response.
    async fn send_chunk(&self, chunk: Vec<KeyGroup>) -> Result<ChunkOutcome, Error> {
        let wire: Vec<_> = chunk
            .iter()
            .map(|group| group.representative().to_wire(&group.key))
            .collect();
        let mut request = ApiRequest::post(self.data_path(), json!({ "request": wire }));
        if self.inner.batch_config.bypass_server_cache {
            request = request.query("datacache", "false");
        }

        log::debug!("Sending batch of {} datapoints", chunk.len());
        let response = self.inner.transport.send(request).await?;

        let Value::Object(results) = response else {
            return Err(ApiError::parse("Batch response is not an object").into());
        };

        let mut waiting: HashMap<CacheKey, Vec<DataRequest>> = chunk
            .into_iter()
            .map(|group| (group.key, group.requests))
            .collect();
        let mut outcome = ChunkOutcome::default();

        for (raw_key, value) in results {
            let Some((key, requests)) = waiting.remove_entry(raw_key.as_str()) else {
                log::warn!("Batch response contains unknown key {}", raw_key);
                continue;
            };

            if let Some(error) = ServiceError::from_value(&value) {
                log::warn!("Datapoint {} failed: {}", key, error);
                self.record_service_error(&key, error);
                outcome.failed.push(key);
                continue;
            }

            self.inner.cache.set(&key, &value).await;
            self.clear_service_error(&key);

            for request in requests {
                dispatch::resolve(request, &value);
                outcome.resolved += 1;
            }
        }

        for key in waiting.keys() {
            log::warn!("Batch response has no result for {}", key);
        }

        Ok(outcome)
    }
}
