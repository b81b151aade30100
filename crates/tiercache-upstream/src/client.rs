//! Fetching reference records from the Wrapper.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tiercache_core::{CacheError, CacheKey};
use url::Url;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::retry::{RetryPolicy, is_transient, with_retry};

/// Fetches one reference record from the authoritative source.
///
/// Implementations have no cache awareness; de-duplication and TTL handling
/// belong to the reference store.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch_record(&self, key: &CacheKey) -> Result<Value, CacheError>;
}

/// Configuration for [`HttpUpstreamClient`].
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Wrapper base URL; records live at `{base}/tenants/{tenant}/{namespace}/{identifier}`.
    pub base_url: Url,
    /// Per-request timeout (default: 2 seconds).
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// `None` disables the circuit breaker.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl UpstreamConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            request_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            circuit_breaker: Some(CircuitBreakerConfig::default()),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, config: Option<CircuitBreakerConfig>) -> Self {
        self.circuit_breaker = config;
        self
    }
}

/// HTTP client for the Wrapper.
///
/// 5xx responses, connection errors and request timeouts are retried per
/// the [`RetryPolicy`]; 4xx responses surface immediately as
/// `UpstreamUnavailable` carrying the status.
pub struct HttpUpstreamClient {
    http_client: reqwest::Client,
    config: UpstreamConfig,
    breaker: Option<CircuitBreaker>,
}

impl HttpUpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, CacheError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CacheError::configuration(format!("failed to build HTTP client: {e}")))?;

        let breaker = config.circuit_breaker.clone().map(CircuitBreaker::new);

        Ok(Self {
            http_client,
            config,
            breaker,
        })
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    fn record_url(&self, key: &CacheKey) -> Result<Url, CacheError> {
        tenant_url(&self.config.base_url, key.tenant_id().as_str(), &[
            key.namespace().as_str(),
            key.identifier(),
        ])
    }

    async fn fetch_once(&self, url: &Url, key: &CacheKey) -> Result<Value, CacheError> {
        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, key))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CacheError::upstream_status(status.as_u16(), body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| self.map_transport_error(e, key))
    }

    fn map_transport_error(&self, err: reqwest::Error, key: &CacheKey) -> CacheError {
        if err.is_timeout() {
            CacheError::timeout(key, self.config.request_timeout)
        } else if err.is_decode() {
            CacheError::upstream(format!("invalid record body: {err}"))
        } else {
            CacheError::upstream(format!("request failed: {err}"))
        }
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn fetch_record(&self, key: &CacheKey) -> Result<Value, CacheError> {
        if let Some(breaker) = &self.breaker
            && !breaker.allow_request()
        {
            tracing::debug!(key = %key, "circuit breaker open, failing fast");
            return Err(CacheError::upstream("circuit breaker open"));
        }

        let url = self.record_url(key)?;
        let mut outcome = BreakerOutcome::new(self.breaker.as_ref());
        let result = with_retry(&self.config.retry, "fetch_record", || {
            self.fetch_once(&url, key)
        })
        .await;

        match &result {
            Err(err) if is_transient(err) => outcome.failure(),
            // The Wrapper answered, so it is healthy even on 4xx.
            _ => outcome.success(),
        }

        match &result {
            Ok(_) => tracing::debug!(key = %key, "fetched record from upstream"),
            Err(err) => tracing::warn!(key = %key, error = %err, "upstream fetch failed"),
        }
        result
    }
}

/// Reports one fetch to the breaker exactly once.
///
/// A fetch dropped before it finished, e.g. by a caller's deadline, is
/// recorded as a failure.
struct BreakerOutcome<'a> {
    breaker: Option<&'a CircuitBreaker>,
}

impl<'a> BreakerOutcome<'a> {
    fn new(breaker: Option<&'a CircuitBreaker>) -> Self {
        Self { breaker }
    }

    fn success(&mut self) {
        if let Some(breaker) = self.breaker.take() {
            breaker.record_success();
        }
    }

    fn failure(&mut self) {
        if let Some(breaker) = self.breaker.take() {
            breaker.record_failure();
        }
    }
}

impl Drop for BreakerOutcome<'_> {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker.take() {
            tracing::debug!("upstream fetch cancelled before completion");
            breaker.record_failure();
        }
    }
}

/// `{base}/tenants/{tenant}/{segments...}` with every segment percent-encoded.
pub(crate) fn tenant_url(base: &Url, tenant: &str, segments: &[&str]) -> Result<Url, CacheError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| CacheError::configuration(format!("upstream base URL {base} cannot be a base")))?
        .pop_if_empty()
        .push("tenants")
        .push(tenant)
        .extend(segments);
    Ok(url)
}
