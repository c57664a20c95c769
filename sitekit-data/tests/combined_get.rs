//! Integration tests for combined and single-datapoint requests.
//!
//! Every test runs against a recording mock transport on a paused tokio clock,
//! so scheduling delays are observed exactly and nothing touches the network.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tokio::time::Instant;

use sitekit_data::CacheStatus;
use sitekit_data::SiteKitClient;
use sitekit_data::api::BatchConfig;
use sitekit_data::api::CacheKey;
use sitekit_data::api::CompletionSource;
use sitekit_data::api::DataRequest;
use sitekit_data::api::PREV_DATE_RANGE_PLACEHOLDER;
use sitekit_data::api::RequestType;
use sitekit_data::error::ApiError;
use sitekit_data::error::Error;
use sitekit_data::error::ServiceError;
use sitekit_data::notify::NotificationKind;
use sitekit_data::notify::NotificationRegistry;
use sitekit_data::transport::ApiRequest;
use sitekit_data::transport::Transport;

// =============================================================================
// Fixtures
// =============================================================================

type Responder = Box<dyn Fn(usize, &ApiRequest) -> Result<Value, Error> + Send + Sync>;

struct MockTransport {
    calls: Mutex<Vec<(ApiRequest, Instant)>>,
    responder: Responder,
}

impl MockTransport {
    fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(usize, &ApiRequest) -> Result<Value, Error> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        })
    }

    fn echo() -> Arc<Self> {
        Self::new(|_, request| Ok(echo(request)))
    }

    fn calls(&self) -> Vec<ApiRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(request, _)| request.clone())
            .collect()
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value, Error> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((request.clone(), Instant::now()));
            calls.len() - 1
        };
        (self.responder)(index, &request)
    }
}

/// The `request` array of a batch call.
fn wire_requests(request: &ApiRequest) -> Vec<Value> {
    request
        .body
        .as_ref()
        .and_then(|body| body.get("request"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn wire_datapoints(request: &ApiRequest) -> Vec<String> {
    wire_requests(request)
        .iter()
        .map(|item| item["datapoint"].as_str().unwrap().to_string())
        .collect()
}

/// Answers every key of a batch call with `{"datapoint": ...}`.
fn echo(request: &ApiRequest) -> Value {
    let mut results = Map::new();
    for item in wire_requests(request) {
        results.insert(
            item["key"].as_str().unwrap().to_string(),
            json!({ "datapoint": item["datapoint"] }),
        );
    }
    Value::Object(results)
}

fn forbidden() -> ServiceError {
    ServiceError::new("forbidden", "User does not have sufficient permissions", 403)
        .with_reason("forbidden")
}

type Resolved = Arc<Mutex<Vec<(String, Value)>>>;

fn tracked(request: DataRequest, resolved: &Resolved) -> DataRequest {
    let sink = resolved.clone();
    request.on_resolve(move |result, datapoint| {
        sink.lock().unwrap().push((datapoint.to_string(), result.clone()));
    })
}

fn client(transport: Arc<MockTransport>) -> SiteKitClient {
    SiteKitClient::builder().transport_arc(transport).build()
}

fn client_with(transport: Arc<MockTransport>, config: BatchConfig) -> SiteKitClient {
    SiteKitClient::builder()
        .transport_arc(transport)
        .batch_config(config)
        .build()
}

/// The key a request gets once the default date range is applied.
fn normalized_key(request_type: RequestType, identifier: &str, datapoint: &str) -> CacheKey {
    DataRequest::new(request_type, identifier, datapoint)
        .with_data("dateRange", "last-28-days")
        .cache_key()
}

// =============================================================================
// Batching
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_ten_requests_share_one_call() {
    let transport = MockTransport::echo();
    let client = client(transport.clone());
    let resolved = Resolved::default();

    let requests = (0..10)
        .map(|i| tracked(DataRequest::module("analytics", format!("d{i}")).priority(1), &resolved))
        .collect();
    let completion = client.combined_get(requests).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method.as_str(), "POST");
    assert_eq!(calls[0].path, "google-site-kit/v1/data/");
    assert_eq!(wire_requests(&calls[0]).len(), 10);

    assert_eq!(completion.source, CompletionSource::Network);
    assert_eq!(completion.from_network, 10);
    assert_eq!(completion.rounds, 1);
    assert_eq!(resolved.lock().unwrap().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_fifteen_requests_need_two_calls() {
    let transport = MockTransport::echo();
    let client = client(transport.clone());

    let requests = (0..15)
        .map(|i| DataRequest::module("analytics", format!("d{i}")).priority(1))
        .collect();
    let completion = client.combined_get(requests).await.unwrap();

    let sizes: Vec<usize> = transport
        .calls()
        .iter()
        .map(|call| wire_requests(call).len())
        .collect();
    assert_eq!(sizes, vec![10, 5]);
    assert_eq!(completion.rounds, 2);
    assert_eq!(completion.from_network, 15);
}

#[tokio::test(start_paused = true)]
async fn test_low_priority_waits_for_a_later_round() {
    let transport = MockTransport::echo();
    let client = client(transport.clone());
    let start = Instant::now();

    let requests = vec![
        DataRequest::module("adsense", "earnings").priority(20),
        DataRequest::module("analytics", "report").priority(1),
        DataRequest::module("search-console", "searchanalytics").priority(5),
        DataRequest::core("site", "connection"),
    ];
    client.combined_get(requests).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(wire_datapoints(&calls[0]), vec!["report", "searchanalytics"]);
    assert_eq!(wire_datapoints(&calls[1]), vec!["connection", "earnings"]);

    let times = transport.call_times();
    assert_eq!(times[0] - start, Duration::ZERO);
    assert!(times[1] - start >= Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_duplicates_are_sent_once_and_all_resolved() {
    let transport = MockTransport::echo();
    let client = client(transport.clone());
    let resolved = Resolved::default();

    let requests = (0..3)
        .map(|_| tracked(DataRequest::module("analytics", "report"), &resolved))
        .collect();
    client.combined_get(requests).await.unwrap();

    assert_eq!(wire_requests(&transport.calls()[0]).len(), 1);
    let resolved = resolved.lock().unwrap();
    assert_eq!(resolved.len(), 3);
    assert!(resolved.iter().all(|(_, value)| value == &json!({ "datapoint": "report" })));
}

#[tokio::test(start_paused = true)]
async fn test_wire_requests_carry_key_and_date_range() {
    let transport = MockTransport::echo();
    let client = client(transport.clone());
    client.set_date_range("last-7-days");

    let requests = vec![
        DataRequest::module("analytics", "report").priority(1),
        DataRequest::module("analytics", "report-previous")
            .with_data("dateRange", PREV_DATE_RANGE_PLACEHOLDER)
            .priority(1),
        DataRequest::module("analytics", "report-custom")
            .with_data("dateRange", "last-90-days")
            .priority(1),
    ];
    client.combined_get(requests).await.unwrap();

    let wire = wire_requests(&transport.calls()[0]);
    assert_eq!(wire[0]["data"]["dateRange"], json!("last-7-days"));
    assert_eq!(wire[1]["data"]["dateRange"], json!("prev-7-days"));
    assert_eq!(wire[2]["data"]["dateRange"], json!("last-90-days"));

    let expected_key = DataRequest::module("analytics", "report")
        .with_data("dateRange", "last-7-days")
        .cache_key();
    assert_eq!(wire[0]["key"], json!(expected_key.as_str()));
    assert_eq!(wire[0]["type"], json!("modules"));
    assert_eq!(wire[0]["maxAge"], json!(3600));
}

#[tokio::test(start_paused = true)]
async fn test_bypass_server_cache_adds_query_flag() {
    let transport = MockTransport::echo();
    let client = client_with(
        transport.clone(),
        BatchConfig::default().with_bypass_server_cache(true),
    );

    client
        .combined_get(vec![DataRequest::core("user", "authentication")])
        .await
        .unwrap();

    assert_eq!(
        transport.calls()[0].query,
        vec![("datacache".to_string(), "false".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_round_budget_exhaustion_drops_requests() {
    let transport = MockTransport::echo();
    let client = client_with(
        transport.clone(),
        BatchConfig::default().with_chunk_size(1).with_max_rounds(2),
    );

    let requests = (0..5)
        .map(|i| DataRequest::module("analytics", format!("d{i}")).priority(1))
        .collect();
    let completion = client.combined_get(requests).await.unwrap();

    assert_eq!(transport.calls().len(), 3);
    assert_eq!(completion.rounds, 3);
    assert_eq!(completion.from_network, 3);
    assert_eq!(completion.dropped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_have_independent_budgets() {
    let transport = MockTransport::echo();
    let client = client_with(
        transport.clone(),
        BatchConfig::default().with_chunk_size(1).with_max_rounds(1),
    );

    let first = (0..2)
        .map(|i| DataRequest::module("analytics", format!("a{i}")).priority(1))
        .collect();
    let second = (0..2)
        .map(|i| DataRequest::module("adsense", format!("b{i}")).priority(1))
        .collect();
    let (first, second) = tokio::join!(client.combined_get(first), client.combined_get(second));

    assert_eq!(first.unwrap().dropped, 0);
    assert_eq!(second.unwrap().dropped, 0);
    assert_eq!(transport.calls().len(), 4);
}

// =============================================================================
// Cache
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_fresh_entry_is_served_from_cache() {
    let transport = MockTransport::echo();
    let client = client(transport.clone());
    let resolved = Resolved::default();

    let key = normalized_key(RequestType::Modules, "analytics", "report");
    client
        .cache()
        .set_at(&key, &json!({ "rows": [1, 2] }), Utc::now() - TimeDelta::seconds(100))
        .await;

    let completion = client
        .combined_get(vec![tracked(DataRequest::module("analytics", "report"), &resolved)])
        .await
        .unwrap();

    assert!(transport.calls().is_empty());
    assert_eq!(completion.source, CompletionSource::Cache);
    assert_eq!(completion.from_cache, 1);
    assert_eq!(
        resolved.lock().unwrap().clone(),
        vec![("report".to_string(), json!({ "rows": [1, 2] }))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_is_refetched() {
    let transport = MockTransport::echo();
    let client = client(transport.clone());

    let key = normalized_key(RequestType::Modules, "analytics", "report");
    client
        .cache()
        .set_at(&key, &json!("old"), Utc::now() - TimeDelta::seconds(4000))
        .await;

    let completion = client
        .combined_get(vec![DataRequest::module("analytics", "report")])
        .await
        .unwrap();

    assert_eq!(transport.calls().len(), 1);
    assert_eq!(completion.source, CompletionSource::Network);
    let entry = client.cache().get(&key, Duration::from_secs(3600)).await.unwrap();
    assert_eq!(entry.value, json!({ "datapoint": "report" }));
}

#[tokio::test(start_paused = true)]
async fn test_cache_hits_resolve_staggered() {
    let transport = MockTransport::echo();
    let client = client(transport.clone());
    let start = Instant::now();
    let offsets = Arc::new(Mutex::new(Vec::new()));

    let mut requests = Vec::new();
    for datapoint in ["a", "b", "c"] {
        let key = normalized_key(RequestType::Modules, "analytics", datapoint);
        client.cache().set(&key, &json!(datapoint)).await;

        let sink = offsets.clone();
        requests.push(
            DataRequest::module("analytics", datapoint)
                .on_resolve(move |_, _| sink.lock().unwrap().push(start.elapsed())),
        );
    }

    client.combined_get(requests).await.unwrap();

    assert_eq!(
        offsets.lock().unwrap().clone(),
        vec![
            Duration::ZERO,
            Duration::from_millis(25),
            Duration::from_millis(50)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_mixed_hits_and_misses() {
    let transport = MockTransport::echo();
    let client = client(transport.clone());

    let key = normalized_key(RequestType::Modules, "analytics", "cached");
    client.cache().set(&key, &json!("hit")).await;

    let completion = client
        .combined_get(vec![
            DataRequest::module("analytics", "cached"),
            DataRequest::module("analytics", "fresh"),
        ])
        .await
        .unwrap();

    assert_eq!(wire_datapoints(&transport.calls()[0]), vec!["fresh"]);
    assert_eq!(completion.source, CompletionSource::Network);
    assert_eq!(completion.from_cache, 1);
    assert_eq!(completion.from_network, 1);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_shared_forbidden_error_registers_one_notification() {
    let registry = NotificationRegistry::new();
    let transport = MockTransport::new(|_, request| {
        let mut results = Map::new();
        for item in wire_requests(request) {
            results.insert(
                item["key"].as_str().unwrap().to_string(),
                serde_json::to_value(forbidden()).unwrap(),
            );
        }
        Ok(Value::Object(results))
    });
    let client = SiteKitClient::builder()
        .transport_arc(transport.clone())
        .notifications(registry.clone())
        .build();
    let resolved = Resolved::default();

    let requests = ["report", "accounts", "properties"]
        .into_iter()
        .map(|datapoint| tracked(DataRequest::module("analytics", datapoint), &resolved))
        .collect();
    let completion = client.combined_get(requests).await.unwrap();

    assert_eq!(registry.total(), 1);
    assert_eq!(registry.kinds(), vec![NotificationKind::PermissionError]);
    assert!(resolved.lock().unwrap().is_empty());
    assert_eq!(completion.failed.len(), 3);

    let key = normalized_key(RequestType::Modules, "analytics", "report");
    assert_eq!(client.error_for(&key), Some(forbidden()));
    assert!(client.cache().get(&key, Duration::from_secs(3600)).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_error_is_cleared_after_success() {
    let transport = MockTransport::new(|index, request| {
        if index == 0 {
            let key = wire_requests(request)[0]["key"].as_str().unwrap().to_string();
            let mut results = Map::new();
            results.insert(key, serde_json::to_value(forbidden()).unwrap());
            Ok(Value::Object(results))
        } else {
            Ok(echo(request))
        }
    });
    let client = client(transport);
    let key = normalized_key(RequestType::Modules, "analytics", "report");

    client
        .combined_get(vec![DataRequest::module("analytics", "report")])
        .await
        .unwrap();
    assert!(client.error_for(&key).is_some());

    client
        .combined_get(vec![DataRequest::module("analytics", "report")])
        .await
        .unwrap();
    assert!(client.error_for(&key).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_callback_does_not_stop_siblings() {
    let transport = MockTransport::echo();
    let client = client(transport);
    let resolved = Resolved::default();

    let requests = vec![
        DataRequest::module("analytics", "broken")
            .priority(1)
            .on_resolve(|_, _| panic!("widget crashed")),
        tracked(DataRequest::module("analytics", "healthy").priority(1), &resolved),
    ];
    let completion = client.combined_get(requests).await.unwrap();

    assert_eq!(completion.from_network, 2);
    assert_eq!(
        resolved.lock().unwrap().clone(),
        vec![("healthy".to_string(), json!({ "datapoint": "healthy" }))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_returns_error() {
    let transport = MockTransport::new(|_, _| Err(ApiError::http(502, "Bad Gateway").into()));
    let client = client(transport.clone());
    let resolved = Resolved::default();

    let result = client
        .combined_get(vec![tracked(DataRequest::module("analytics", "report"), &resolved)])
        .await;

    assert!(matches!(
        result,
        Err(Error::Api(ApiError::Http { status: 502, .. }))
    ));
    assert_eq!(transport.calls().len(), 1);
    assert!(resolved.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_round_keeps_other_rounds_results() {
    let transport = MockTransport::new(|index, request| {
        if index == 0 {
            Ok(echo(request))
        } else {
            Err(ApiError::http(500, "Internal Server Error").into())
        }
    });
    let client = client(transport.clone());

    let result = client
        .combined_get(vec![
            DataRequest::module("analytics", "first").priority(1),
            DataRequest::module("analytics", "second").priority(30),
        ])
        .await;

    assert!(result.is_err());
    assert_eq!(transport.calls().len(), 2);
    let key = normalized_key(RequestType::Modules, "analytics", "first");
    assert!(client.cache().get(&key, Duration::from_secs(3600)).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_response_keys_are_ignored() {
    let transport = MockTransport::new(|_, request| {
        let mut results = echo(request);
        results["modules::nope::nope::0000"] = json!("stray");
        Ok(results)
    });
    let client = client(transport);

    let completion = client
        .combined_get(vec![DataRequest::module("analytics", "report")])
        .await
        .unwrap();

    assert_eq!(completion.from_network, 1);
    assert!(completion.failed.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_non_object_response_is_a_parse_error() {
    let transport = MockTransport::new(|_, _| Ok(json!(["not", "an", "object"])));
    let client = client(transport);

    let result = client
        .combined_get(vec![DataRequest::module("analytics", "report")])
        .await;

    assert!(matches!(result, Err(Error::Api(ApiError::Parse { .. }))));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_request_does_not_block_siblings() {
    let transport = MockTransport::echo();
    let client = client(transport.clone());
    let resolved = Resolved::default();

    let completion = client
        .combined_get(vec![
            tracked(DataRequest::module("analytics", "report").priority(1), &resolved),
            tracked(DataRequest::module("adsense", "earnings").priority(1), &resolved),
            tracked(DataRequest::module("search-console", "").priority(1), &resolved),
            tracked(DataRequest::module("", "report").priority(1), &resolved),
        ])
        .await
        .unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(wire_datapoints(&calls[0]), vec!["report", "earnings"]);

    assert_eq!(completion.rejected, 2);
    assert_eq!(completion.from_network, 2);
    assert_eq!(completion.source, CompletionSource::Network);

    let mut datapoints: Vec<String> = resolved
        .lock()
        .unwrap()
        .iter()
        .map(|(datapoint, _)| datapoint.clone())
        .collect();
    datapoints.sort();
    assert_eq!(datapoints, vec!["earnings", "report"]);
}

#[tokio::test(start_paused = true)]
async fn test_only_malformed_requests_send_nothing() {
    let transport = MockTransport::echo();
    let client = client(transport.clone());

    let completion = client
        .combined_get(vec![DataRequest::core("site", "")])
        .await
        .unwrap();

    assert!(transport.calls().is_empty());
    assert_eq!(completion.rejected, 1);
    assert_eq!(completion.source, CompletionSource::Cache);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_combined_get() {
    let transport = MockTransport::echo();
    let client = client(transport.clone());

    let handle = client.spawn_combined_get(vec![DataRequest::core("site", "connection")]);
    let completion = handle.await.unwrap().unwrap();

    assert_eq!(completion.source, CompletionSource::Network);
    assert_eq!(transport.calls().len(), 1);
}

// =============================================================================
// Single datapoint
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_get_fetches_then_hits_cache() {
    let transport = MockTransport::new(|_, _| Ok(json!({ "connected": true })));
    let client = client(transport.clone());

    let first = client
        .get(DataRequest::core("site", "connection").with_data("limit", 5))
        .await
        .unwrap();
    assert_eq!(first.cache, CacheStatus::Miss);
    assert_eq!(first.data(), &json!({ "connected": true }));

    let second = client
        .get(DataRequest::core("site", "connection").with_data("limit", 5))
        .await
        .unwrap();
    assert!(second.is_cached());
    assert_eq!(second.cached_at(), first.cached_at());

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method.as_str(), "GET");
    assert_eq!(calls[0].path, "google-site-kit/v1/core/site/data/connection");
    assert!(calls[0].query.contains(&("limit".to_string(), "5".to_string())));
    assert!(calls[0]
        .query
        .contains(&("dateRange".to_string(), "last-28-days".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_get_service_error_is_classified() {
    let transport = MockTransport::new(|_, _| {
        Err(ServiceError::new("rest_forbidden", "Reconnect", 401)
            .with_reason("authError")
            .with_reconnect_url("https://example.com/wp-admin/admin.php?page=googlesitekit-splash")
            .into())
    });
    let client = client(transport);

    let result = client.get(DataRequest::module("analytics", "report")).await;

    let error = result.unwrap_err();
    assert_eq!(error.service_error().map(ServiceError::status), Some(401));
    assert_eq!(
        client.notifications().kinds(),
        vec![
            NotificationKind::AuthScopeError,
            NotificationKind::ReconnectRequired
        ]
    );
    let key = normalized_key(RequestType::Modules, "analytics", "report");
    assert!(client.error_for(&key).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_set_invalidates_datapoint_group() {
    let transport = MockTransport::new(|_, _| Ok(json!(true)));
    let client = client(transport.clone());

    let report_a = DataRequest::module("analytics", "report").with_data("limit", 1).cache_key();
    let report_b = DataRequest::module("analytics", "report").with_data("limit", 2).cache_key();
    let accounts = DataRequest::module("analytics", "accounts").cache_key();
    for key in [&report_a, &report_b, &accounts] {
        client.cache().set(key, &json!(1)).await;
    }

    let response = client
        .set(RequestType::Modules, "analytics", "report", json!({ "limit": 3 }))
        .await
        .unwrap();
    assert_eq!(response, json!(true));

    let max_age = Duration::from_secs(3600);
    assert!(client.cache().get(&report_a, max_age).await.is_none());
    assert!(client.cache().get(&report_b, max_age).await.is_none());
    assert!(client.cache().get(&accounts, max_age).await.is_some());

    let call = &transport.calls()[0];
    assert_eq!(call.method.as_str(), "POST");
    assert_eq!(call.path, "google-site-kit/v1/modules/analytics/data/report");
    assert_eq!(call.body, Some(json!({ "data": { "limit": 3 } })));
}
