//! Reference tier: TTL cache in front of the upstream client.
//!
//! Each key is in one of three states:
//!
//! - `Empty`: no slot in the map.
//! - `Fetching`: a leader started an upstream fetch; later callers await
//!   the same shared future instead of issuing their own request.
//! - `Valid`: a payload with an expiry; reads past the expiry start a new
//!   fetch.
//!
//! Fetches run in their own task, so a caller that gives up does not
//! cancel the fetch for everyone else. Every fetch is tagged with a
//! generation; a completed fetch writes back only if its slot is still the
//! one it created. An invalidation that lands mid-fetch therefore wins:
//! the waiters get the fetched payload, but it is not cached.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tiercache_core::{CacheError, CacheKey, Namespace, TenantId};
use tiercache_upstream::UpstreamClient;
use tokio::time::Instant;

use crate::metrics;

/// Shared read-only payload handed to every caller of the same fetch.
pub type Payload = Arc<Value>;

type SharedFetch = Shared<BoxFuture<'static, Result<Payload, CacheError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Empty,
    Fetching,
    Valid,
}

/// Successful reference lookup.
#[derive(Debug, Clone)]
pub struct ReferenceRead {
    pub payload: Payload,
    /// `true` when served from a valid entry without waiting on upstream.
    pub cache_hit: bool,
}

#[derive(Debug, Clone)]
struct ReferenceEntry {
    payload: Payload,
    expires_at: Instant,
}

enum Slot {
    Fetching { generation: u64, fetch: SharedFetch },
    Valid(ReferenceEntry),
}

/// Shortest TTL an entry can be given.
pub const MIN_TTL: Duration = Duration::from_millis(1);
/// Longest TTL an entry can be given; larger values are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Per-namespace time-to-live, clamped to `MIN_TTL..=MAX_TTL`.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    default_ttl: Duration,
    per_namespace: HashMap<Namespace, Duration>,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(180))
    }
}

impl TtlPolicy {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl: default_ttl.clamp(MIN_TTL, MAX_TTL),
            per_namespace: HashMap::new(),
        }
    }

    pub fn with_namespace_ttl(mut self, namespace: impl Into<Namespace>, ttl: Duration) -> Self {
        self.per_namespace
            .insert(namespace.into(), ttl.clamp(MIN_TTL, MAX_TTL));
        self
    }

    pub fn ttl_for(&self, namespace: &Namespace) -> Duration {
        self.per_namespace
            .get(namespace)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub upstream_fetches: u64,
    pub coalesced_waits: u64,
    pub evictions: u64,
}

struct Inner {
    slots: DashMap<CacheKey, Slot>,
    upstream: Arc<dyn UpstreamClient>,
    ttl: TtlPolicy,
    fetch_timeout: Duration,
    next_generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    upstream_fetches: AtomicU64,
    coalesced_waits: AtomicU64,
    evictions: AtomicU64,
}

/// TTL cache with single-flight upstream fetches. Cheap to clone.
#[derive(Clone)]
pub struct ReferenceStore {
    inner: Arc<Inner>,
}

impl ReferenceStore {
    pub fn new(upstream: Arc<dyn UpstreamClient>, ttl: TtlPolicy, fetch_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                upstream,
                ttl,
                fetch_timeout,
                next_generation: AtomicU64::new(1),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                upstream_fetches: AtomicU64::new(0),
                coalesced_waits: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    /// Read a record, fetching it at most once across concurrent callers.
    ///
    /// Every caller waiting on the same fetch observes the same outcome.
    /// On failure nothing is cached, so the next call retries upstream.
    pub async fn get(&self, key: &CacheKey) -> Result<ReferenceRead, CacheError> {
        let now = Instant::now();
        let namespace = key.namespace().as_str();

        // Hits only need the shard read lock.
        if let Some(slot) = self.inner.slots.get(key)
            && let Slot::Valid(entry) = &*slot
            && now < entry.expires_at
        {
            let payload = Arc::clone(&entry.payload);
            drop(slot);
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_hit("reference", namespace);
            return Ok(ReferenceRead {
                payload,
                cache_hit: true,
            });
        }

        let fetch = match self.inner.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let in_flight = match occupied.get() {
                    Slot::Valid(entry) if now < entry.expires_at => {
                        self.inner.hits.fetch_add(1, Ordering::Relaxed);
                        metrics::record_cache_hit("reference", namespace);
                        return Ok(ReferenceRead {
                            payload: Arc::clone(&entry.payload),
                            cache_hit: true,
                        });
                    }
                    Slot::Fetching { fetch, .. } => Some(fetch.clone()),
                    Slot::Valid(_) => None,
                };

                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_miss("reference", namespace);
                match in_flight {
                    Some(fetch) => {
                        self.inner.coalesced_waits.fetch_add(1, Ordering::Relaxed);
                        metrics::record_coalesced_wait(namespace);
                        tracing::trace!(key = %key, "joining in-flight fetch");
                        fetch
                    }
                    None => {
                        self.inner.evictions.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(key = %key, "reference entry expired, refetching");
                        let (generation, fetch) = self.start_fetch(key.clone());
                        occupied.insert(Slot::Fetching {
                            generation,
                            fetch: fetch.clone(),
                        });
                        fetch
                    }
                }
            }
            Entry::Vacant(vacant) => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_miss("reference", namespace);
                let (generation, fetch) = self.start_fetch(key.clone());
                vacant.insert(Slot::Fetching {
                    generation,
                    fetch: fetch.clone(),
                });
                fetch
            }
        };

        let payload = fetch.await?;
        Ok(ReferenceRead {
            payload,
            cache_hit: false,
        })
    }

    /// Drop a key whatever its state. Returns whether a slot existed.
    ///
    /// A fetch in flight for the key keeps running for its waiters, but
    /// its result is discarded.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let existed = self.inner.slots.remove(key).is_some();
        if existed {
            self.inner.evictions.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(key = %key, existed, "reference entry invalidated");
        existed
    }

    /// Drop every slot belonging to `tenant`.
    pub fn invalidate_tenant(&self, tenant: &TenantId) -> usize {
        let before = self.inner.slots.len();
        self.inner.slots.retain(|key, _| !key.belongs_to(tenant));
        let dropped = before.saturating_sub(self.inner.slots.len());
        self.inner
            .evictions
            .fetch_add(dropped as u64, Ordering::Relaxed);
        tracing::info!(tenant = %tenant, dropped, "reference entries invalidated for tenant");
        dropped
    }

    /// Remove expired entries. In-flight fetches are left alone.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.slots.len();
        self.inner.slots.retain(|_, slot| match slot {
            Slot::Valid(entry) => now < entry.expires_at,
            Slot::Fetching { .. } => true,
        });
        let removed = before.saturating_sub(self.inner.slots.len());
        if removed > 0 {
            self.inner
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, "cleaned up expired reference entries");
        }
        metrics::set_cache_entries("reference", self.inner.slots.len());
        removed
    }

    /// Current state of a key. An expired entry still reports `Valid`
    /// until it is read or swept.
    pub fn state(&self, key: &CacheKey) -> EntryState {
        match self.inner.slots.get(key).as_deref() {
            None => EntryState::Empty,
            Some(Slot::Fetching { .. }) => EntryState::Fetching,
            Some(Slot::Valid(_)) => EntryState::Valid,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    pub fn stats(&self) -> ReferenceStats {
        ReferenceStats {
            entries: self.inner.slots.len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            upstream_fetches: self.inner.upstream_fetches.load(Ordering::Relaxed),
            coalesced_waits: self.inner.coalesced_waits.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }

    /// Spawn the upstream fetch and wrap its handle in a shared future.
    /// Called with the key's shard lock held, before the slot is published.
    ///
    /// A fetch that panics or is cancelled releases its slot, so the next
    /// caller starts over instead of joining a dead fetch.
    fn start_fetch(&self, key: CacheKey) -> (u64, SharedFetch) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            match AssertUnwindSafe(inner.run_fetch(&task_key, generation))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    inner.release_slot(&task_key, generation);
                    tracing::error!(key = %task_key, "reference fetch panicked");
                    Err(CacheError::upstream("reference fetch panicked"))
                }
            }
        });

        let inner = Arc::clone(&self.inner);
        let fetch = async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => {
                    inner.release_slot(&key, generation);
                    Err(CacheError::upstream(format!("fetch task failed: {err}")))
                }
            }
        }
        .boxed()
        .shared();
        (generation, fetch)
    }
}

impl Inner {
    async fn run_fetch(&self, key: &CacheKey, generation: u64) -> Result<Payload, CacheError> {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let result = match tokio::time::timeout(self.fetch_timeout, self.upstream.fetch_record(key))
            .await
        {
            Ok(Ok(value)) => Ok(Arc::new(value)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(CacheError::timeout(key, self.fetch_timeout)),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        metrics::record_upstream_fetch(key.namespace().as_str(), outcome, started.elapsed());

        self.complete_fetch(key, generation, &result);
        result
    }

    /// Remove the slot if it still belongs to fetch `generation`.
    fn release_slot(&self, key: &CacheKey, generation: u64) -> bool {
        self.slots
            .remove_if(key, |_, slot| owns_slot(slot, generation))
            .is_some()
    }

    fn complete_fetch(&self, key: &CacheKey, generation: u64, result: &Result<Payload, CacheError>) {

        match result {
            Ok(payload) => {
                let Some(mut slot) = self.slots.get_mut(key) else {
                    tracing::debug!(key = %key, "key invalidated during fetch, result not cached");
                    return;
                };
                if !owns_slot(&*slot, generation) {
                    tracing::debug!(key = %key, "slot replaced during fetch, result not cached");
                    return;
                }
                let ttl = self.ttl.ttl_for(key.namespace());
                let now = Instant::now();
                *slot = Slot::Valid(ReferenceEntry {
                    payload: Arc::clone(payload),
                    expires_at: now.checked_add(ttl).unwrap_or(now + MIN_TTL),
                });
                drop(slot);
                tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "reference entry cached");
                metrics::set_cache_entries("reference", self.slots.len());
            }
            Err(err) => {
                self.release_slot(key, generation);
                match err {
                    CacheError::Timeout { timeout_ms, .. } => tracing::warn!(
                        key = %key,
                        timeout_ms,
                        "reference fetch timed out"
                    ),
                    other => tracing::warn!(
                        key = %key,
                        error = %other,
                        "reference fetch failed"
                    ),
                }
            }
        }
    }
}

fn owns_slot(slot: &Slot, generation: u64) -> bool {
    matches!(slot, Slot::Fetching { generation: current, .. } if *current == generation)
}
