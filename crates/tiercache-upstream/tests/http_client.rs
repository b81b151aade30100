//! Integration tests for the Wrapper HTTP client against a mock server.

use std::time::Duration;

use serde_json::json;
use tiercache_core::{CacheError, CacheKey, CriticalValue, Namespace, TenantId};
use tiercache_upstream::{
    CircuitBreakerConfig, CircuitState, HttpUpstreamClient, RetryPolicy, SeedSource,
    UpstreamClient, UpstreamConfig, WrapperSeedSource,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn profile_key() -> CacheKey {
    CacheKey::new("tenant-1", Namespace::USER_PROFILE, "user-456")
}

fn client_for(server: &MockServer, retry: RetryPolicy) -> HttpUpstreamClient {
    let config = UpstreamConfig::new(Url::parse(&server.uri()).unwrap())
        .with_request_timeout(Duration::from_millis(300))
        .with_retry(retry.with_base_backoff(Duration::from_millis(5)))
        .with_circuit_breaker(None);
    HttpUpstreamClient::new(config).unwrap()
}

#[tokio::test]
async fn test_fetch_record_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tenants/tenant-1/user-profile/user-456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "John"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::default());
    let record = client.fetch_record(&profile_key()).await.unwrap();
    assert_eq!(record, json!({"name": "John"}));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such user"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::default().with_max_retries(2));
    let err = client.fetch_record(&profile_key()).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert!(matches!(err, CacheError::UpstreamUnavailable { .. }));
}

#[tokio::test]
async fn test_server_error_is_retried_then_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::default().with_max_retries(2));
    let err = client.fetch_record(&profile_key()).await.unwrap_err();

    assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "John"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, RetryPolicy::none());
    let err = client.fetch_record(&profile_key()).await.unwrap_err();

    assert!(matches!(err, CacheError::Timeout { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_circuit_breaker_fails_fast_when_open() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let config = UpstreamConfig::new(Url::parse(&server.uri()).unwrap())
        .with_retry(RetryPolicy::none())
        .with_circuit_breaker(Some(
            CircuitBreakerConfig::new()
                .with_failure_threshold(2)
                .with_recovery_timeout(Duration::from_secs(60)),
        ));
    let client = HttpUpstreamClient::new(config).unwrap();

    for _ in 0..2 {
        assert!(client.fetch_record(&profile_key()).await.is_err());
    }
    let breaker = client.circuit_breaker().unwrap();
    assert!(matches!(breaker.state(), CircuitState::Open { .. }));

    // No third request reaches the server.
    let err = client.fetch_record(&profile_key()).await.unwrap_err();
    assert!(err.to_string().contains("circuit breaker open"));
    assert_eq!(breaker.metrics().fast_fail_count, 1);
}

#[tokio::test]
async fn test_fetch_cut_off_by_caller_deadline_counts_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "John"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let config = UpstreamConfig::new(Url::parse(&server.uri()).unwrap())
        .with_request_timeout(Duration::from_millis(200))
        .with_retry(RetryPolicy::default().with_max_retries(2))
        .with_circuit_breaker(Some(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_recovery_timeout(Duration::from_secs(60)),
        ));
    let client = HttpUpstreamClient::new(config).unwrap();

    // The retry budget outlasts the caller's deadline.
    let cut_off =
        tokio::time::timeout(Duration::from_millis(500), client.fetch_record(&profile_key())).await;
    assert!(cut_off.is_err());

    let breaker = client.circuit_breaker().unwrap();
    assert!(matches!(breaker.state(), CircuitState::Open { .. }));

    let sent = server.received_requests().await.unwrap().len();
    let err = client.fetch_record(&profile_key()).await.unwrap_err();
    assert!(err.to_string().contains("circuit breaker open"));
    assert_eq!(server.received_requests().await.unwrap().len(), sent);
}

#[tokio::test]
async fn test_wrapper_seed_source_loads_each_tenant() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tenants/tenant-1/critical"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "tenant_id": "tenant-1",
                "namespace": "credit-cost",
                "identifier": "crm.leads.create",
                "value": {"type": "number", "value": 3.0},
                "version": 1
            },
            {
                "tenant_id": "tenant-9",
                "namespace": "credit-cost",
                "identifier": "crm.leads.create",
                "value": {"type": "number", "value": 100.0},
                "version": 1
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let source = WrapperSeedSource::new(reqwest::Client::new(), Url::parse(&server.uri()).unwrap());
    let entries = source.load(&[TenantId::new("tenant-1")]).await.unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].value, CriticalValue::Number(3.0));
    assert_eq!(entries[0].version, 1);
}
