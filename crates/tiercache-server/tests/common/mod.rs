//! Shared fixtures for the server integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tiercache_core::{CacheError, CacheKey};
use tiercache_upstream::UpstreamClient;

/// Upstream stand-in that counts calls and answers after a fixed delay.
pub struct StubUpstream {
    calls: AtomicUsize,
    delay: Duration,
    failing: AtomicBool,
}

impl StubUpstream {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            failing: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl UpstreamClient for StubUpstream {
    async fn fetch_record(&self, key: &CacheKey) -> Result<Value, CacheError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::upstream_status(503, "wrapper unavailable"));
        }
        Ok(json!({
            "tenant": key.tenant_id().as_str(),
            "id": key.identifier(),
            "fetch": n,
        }))
    }
}

/// Poll `check` until it holds, failing the test after 200 tries.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
