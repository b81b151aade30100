//! Prometheus metrics for the cache tiers.
//!
//! This module provides:
//! - Lookup metrics per tier (hits, misses, errors by kind)
//! - Reference tier fetch metrics (upstream fetches, coalesced waits, fetch duration)
//! - Invalidation metrics (messages by outcome, subscriber reconnects)
//! - Entry gauges per tier

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Lookup metrics
    pub const CACHE_HITS_TOTAL: &str = "tiercache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "tiercache_misses_total";
    pub const LOOKUP_ERRORS_TOTAL: &str = "tiercache_lookup_errors_total";

    // Reference tier fetch metrics
    pub const UPSTREAM_FETCHES_TOTAL: &str = "tiercache_upstream_fetches_total";
    pub const UPSTREAM_FETCH_DURATION_SECONDS: &str = "tiercache_upstream_fetch_duration_seconds";
    pub const COALESCED_WAITS_TOTAL: &str = "tiercache_coalesced_waits_total";

    // Invalidation metrics
    pub const INVALIDATIONS_TOTAL: &str = "tiercache_invalidations_total";
    pub const SUBSCRIBER_RECONNECTS_TOTAL: &str = "tiercache_subscriber_reconnects_total";

    pub const CACHE_ENTRIES: &str = "tiercache_entries";
}

/// Initialize the Prometheus metrics recorder.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// Lookup Metrics
// =============================================================================

pub fn record_cache_hit(tier: &'static str, namespace: &str) {
    counter!(
        names::CACHE_HITS_TOTAL,
        "tier" => tier,
        "namespace" => namespace.to_string()
    )
    .increment(1);
}

pub fn record_cache_miss(tier: &'static str, namespace: &str) {
    counter!(
        names::CACHE_MISSES_TOTAL,
        "tier" => tier,
        "namespace" => namespace.to_string()
    )
    .increment(1);
}

/// Record a lookup that surfaced an error to the caller.
pub fn record_lookup_error(tier: &'static str, kind: &'static str) {
    counter!(names::LOOKUP_ERRORS_TOTAL, "tier" => tier, "kind" => kind).increment(1);
}

// =============================================================================
// Reference Fetch Metrics
// =============================================================================

pub fn record_upstream_fetch(namespace: &str, outcome: &'static str, duration: Duration) {
    counter!(
        names::UPSTREAM_FETCHES_TOTAL,
        "namespace" => namespace.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        names::UPSTREAM_FETCH_DURATION_SECONDS,
        "namespace" => namespace.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A caller joined a fetch already in flight instead of starting its own.
pub fn record_coalesced_wait(namespace: &str) {
    counter!(names::COALESCED_WAITS_TOTAL, "namespace" => namespace.to_string()).increment(1);
}

// =============================================================================
// Invalidation Metrics
// =============================================================================

pub fn record_invalidation(tenant: &str, outcome: &'static str) {
    counter!(
        names::INVALIDATIONS_TOTAL,
        "tenant" => tenant.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_subscriber_reconnect(tenant: &str) {
    counter!(names::SUBSCRIBER_RECONNECTS_TOTAL, "tenant" => tenant.to_string()).increment(1);
}

// =============================================================================
// Entry Gauges
// =============================================================================

pub fn set_cache_entries(tier: &'static str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "tier" => tier).set(count as f64);
}
