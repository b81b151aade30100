//! The cache runtime against a mocked Wrapper over HTTP.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tiercache_core::{CacheError, CriticalValue, Namespace, TenantId};
use tiercache_server::CacheRuntime;
use tiercache_server::cache::{EntryState, ReferenceStore, TtlPolicy};
use tiercache_server::pubsub::InMemoryTransport;
use tiercache_upstream::{
    CircuitBreakerConfig, CircuitState, HttpUpstreamClient, RetryPolicy, UpstreamConfig,
    WrapperSeedSource,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upstream_config(server: &MockServer) -> UpstreamConfig {
    UpstreamConfig::new(Url::parse(&server.uri()).unwrap())
        .with_request_timeout(Duration::from_millis(200))
        .with_retry(RetryPolicy::default().with_max_retries(2))
}

#[tokio::test]
async fn test_runtime_seeds_and_fetches_from_wrapper() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tenants/acme/critical"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "tenant_id": "acme",
            "namespace": "credit-cost",
            "identifier": "crm.leads.create",
            "value": {"type": "number", "value": 3.0},
            "version": 1
        }])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tenants/acme/user-profile/user-456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "John"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = upstream_config(&server);
    let seed = WrapperSeedSource::new(reqwest::Client::new(), config.base_url.clone());
    let upstream = Arc::new(HttpUpstreamClient::new(config).unwrap());
    let mut runtime = CacheRuntime::builder(upstream, Arc::new(InMemoryTransport::new()))
        .with_tenants([TenantId::new("acme")])
        .with_seed_source(Arc::new(seed))
        .build();

    let report = runtime.start().await.unwrap();
    assert_eq!(report.applied, 1);

    let router = runtime.router();
    let cost = router
        .get_critical_value("acme", Namespace::CREDIT_COST, "crm.leads.create")
        .unwrap();
    assert_eq!(cost, CriticalValue::Number(3.0));

    for _ in 0..3 {
        let read = router
            .get_reference_record("acme", Namespace::USER_PROFILE, "user-456")
            .await
            .unwrap();
        assert_eq!(read.payload["name"], "John");
    }

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_store_deadline_opens_the_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "John"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let config = upstream_config(&server).with_circuit_breaker(Some(
        CircuitBreakerConfig::new()
            .with_failure_threshold(1)
            .with_recovery_timeout(Duration::from_secs(60)),
    ));
    let upstream = Arc::new(HttpUpstreamClient::new(config).unwrap());
    let store = ReferenceStore::new(
        upstream.clone(),
        TtlPolicy::new(Duration::from_secs(180)),
        Duration::from_millis(500),
    );
    let key = tiercache_core::CacheKey::new("acme", Namespace::USER_PROFILE, "user-456");

    let first = store.get(&key).await.unwrap_err();
    assert!(matches!(first, CacheError::Timeout { .. }), "got {first:?}");
    assert_eq!(store.state(&key), EntryState::Empty);

    let breaker = upstream.circuit_breaker().unwrap();
    assert!(matches!(breaker.state(), CircuitState::Open { .. }));
    let sent = server.received_requests().await.unwrap().len();
    assert!(sent <= 3, "sent {sent} requests");

    for _ in 0..2 {
        let err = store.get(&key).await.unwrap_err();
        assert!(err.to_string().contains("circuit breaker open"), "got {err:?}");
    }
    assert_eq!(server.received_requests().await.unwrap().len(), sent);
}
