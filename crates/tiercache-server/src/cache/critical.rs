//! Critical tier: versioned, push-updated entries with no fallback.
//!
//! Entries are written only by the startup seed and by the invalidation
//! subscriber. A read of a key that was never provisioned is a
//! configuration error; the store never consults upstream.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tiercache_core::{
    CacheError, CacheKey, CriticalEntry, CriticalValue, InvalidationKind, InvalidationMessage,
    TenantId,
};

use crate::metrics;

#[derive(Debug, Clone)]
struct Versioned {
    value: CriticalValue,
    version: u64,
}

/// Outcome of a bulk seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub applied: usize,
    /// Entries skipped because a newer version was already present.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CriticalStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub updates_applied: u64,
    pub stale_writes: u64,
}

pub struct CriticalStore {
    entries: DashMap<CacheKey, Versioned>,
    seeded: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    updates_applied: AtomicU64,
    stale_writes: AtomicU64,
}

impl Default for CriticalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CriticalStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            seeded: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            updates_applied: AtomicU64::new(0),
            stale_writes: AtomicU64::new(0),
        }
    }

    /// Current value of a provisioned key.
    ///
    /// Fails with `Configuration` before the seed completes and for keys
    /// that were never provisioned.
    pub fn get(&self, key: &CacheKey) -> Result<CriticalValue, CacheError> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Like [`get`](Self::get), but also returns the stored version.
    pub fn get_entry(&self, key: &CacheKey) -> Result<CriticalEntry, CacheError> {
        if !self.is_seeded() {
            return Err(CacheError::configuration(
                "critical store is still loading its seed",
            ));
        }

        match self.entries.get(key) {
            Some(found) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit("critical", key.namespace().as_str());
                Ok(CriticalEntry::new(
                    key.clone(),
                    found.value.clone(),
                    found.version,
                ))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_miss("critical", key.namespace().as_str());
                tracing::debug!(key = %key, "critical key is not provisioned");
                Err(CacheError::configuration(format!(
                    "{key} is not provisioned"
                )))
            }
        }
    }

    /// Apply an `Update` message from the invalidation channel.
    ///
    /// Returns the version now stored. Messages without a value or
    /// version, and `Invalidate` messages, are rejected as invalid:
    /// a critical entry may only be replaced by a newer one.
    pub fn apply(&self, message: &InvalidationMessage) -> Result<u64, CacheError> {
        if message.kind != InvalidationKind::Update {
            return Err(CacheError::invalid_message(format!(
                "critical namespace '{}' only accepts update messages",
                message.namespace
            )));
        }
        let (Some(value), Some(version)) = (message.new_value.clone(), message.version) else {
            return Err(CacheError::invalid_message(
                "critical update requires new_value and version",
            ));
        };

        self.upsert(message.key(), value, version)
    }

    /// Bulk-load initial entries and mark the store ready.
    ///
    /// The version rule applies, so an update that raced ahead of the seed
    /// is never overwritten by an older seeded version.
    pub fn seed(&self, entries: impl IntoIterator<Item = CriticalEntry>) -> SeedReport {
        let mut report = SeedReport::default();
        for entry in entries {
            match self.upsert(entry.key, entry.value, entry.version) {
                Ok(_) => report.applied += 1,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping seed entry");
                    report.skipped += 1;
                }
            }
        }

        self.seeded.store(true, Ordering::Release);
        metrics::set_cache_entries("critical", self.entries.len());
        tracing::info!(
            applied = report.applied,
            skipped = report.skipped,
            entries = self.entries.len(),
            "critical store seeded"
        );
        report
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded.load(Ordering::Acquire)
    }

    /// Drop every entry. Administrative only; the store stays ready.
    pub fn reset(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        metrics::set_cache_entries("critical", 0);
        tracing::warn!(dropped, "critical store reset");
    }

    /// Drop every entry of one tenant, returning how many were removed.
    pub fn reset_tenant(&self, tenant: &TenantId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.belongs_to(tenant));
        let dropped = before.saturating_sub(self.entries.len());
        metrics::set_cache_entries("critical", self.entries.len());
        tracing::warn!(tenant = %tenant, dropped, "critical entries reset for tenant");
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CriticalStats {
        CriticalStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
        }
    }

    /// Insert or replace under the shard lock so the version comparison and
    /// the write are one step.
    fn upsert(&self, key: CacheKey, value: CriticalValue, version: u64) -> Result<u64, CacheError> {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().version;
                if version <= current {
                    self.stale_writes.fetch_add(1, Ordering::Relaxed);
                    return Err(CacheError::StaleWriteIgnored {
                        key: occupied.key().to_string(),
                        incoming: version,
                        current,
                    });
                }
                tracing::debug!(
                    key = %occupied.key(),
                    from = current,
                    to = version,
                    "critical entry replaced"
                );
                occupied.insert(Versioned { value, version });
            }
            Entry::Vacant(vacant) => {
                tracing::debug!(key = %vacant.key(), version, "critical entry created");
                vacant.insert(Versioned { value, version });
            }
        }
        self.updates_applied.fetch_add(1, Ordering::Relaxed);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tiercache_core::Namespace;

    fn cost_key() -> CacheKey {
        CacheKey::new("tenant-1", Namespace::CREDIT_COST, "crm.leads.create")
    }

    fn seeded_store() -> CriticalStore {
        let store = CriticalStore::new();
        store.seed([CriticalEntry::new(cost_key(), CriticalValue::Number(3.0), 1)]);
        store
    }

    #[test]
    fn test_get_fails_before_seed() {
        let store = CriticalStore::new();
        let err = store.get(&cost_key()).unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn test_newer_version_wins_and_stale_is_ignored() {
        let store = seeded_store();
        assert_eq!(store.get(&cost_key()).unwrap(), CriticalValue::Number(3.0));

        let v2 = InvalidationMessage::update(&cost_key(), CriticalValue::Number(5.0), 2);
        assert_eq!(store.apply(&v2).unwrap(), 2);
        assert_eq!(store.get(&cost_key()).unwrap(), CriticalValue::Number(5.0));

        let v1 = InvalidationMessage::update(&cost_key(), CriticalValue::Number(1.0), 1);
        let err = store.apply(&v1).unwrap_err();
        assert!(matches!(
            err,
            CacheError::StaleWriteIgnored {
                incoming: 1,
                current: 2,
                ..
            }
        ));
        assert_eq!(store.get(&cost_key()).unwrap(), CriticalValue::Number(5.0));
        assert_eq!(store.get_entry(&cost_key()).unwrap().version, 2);
    }

    #[test]
    fn test_equal_version_is_stale() {
        let store = seeded_store();
        let replay = InvalidationMessage::update(&cost_key(), CriticalValue::Number(9.0), 1);
        assert!(store.apply(&replay).is_err());
        assert_eq!(store.stats().stale_writes, 1);
    }

    #[test]
    fn test_unknown_key_is_configuration_error() {
        let store = seeded_store();
        let key = CacheKey::new("tenant-1", Namespace::CREDIT_COST, "unknown.action");
        assert!(matches!(
            store.get(&key).unwrap_err(),
            CacheError::Configuration(_)
        ));
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_tenants_are_isolated() {
        let store = seeded_store();
        let other = CacheKey::new("tenant-2", Namespace::CREDIT_COST, "crm.leads.create");
        assert!(store.get(&other).is_err());
    }

    #[test]
    fn test_invalidate_kind_is_rejected() {
        let store = seeded_store();
        let msg = InvalidationMessage::invalidate(&cost_key());
        assert!(matches!(
            store.apply(&msg).unwrap_err(),
            CacheError::InvalidMessage(_)
        ));
        assert!(store.get(&cost_key()).is_ok());
    }

    #[test]
    fn test_update_creates_new_key() {
        let store = seeded_store();
        let key = CacheKey::new("tenant-1", Namespace::ROLE_PERMISSIONS, "admin");
        let perms: BTreeSet<String> = ["crm.read".to_string(), "crm.write".to_string()].into();
        let msg = InvalidationMessage::update(&key, CriticalValue::StringSet(perms.clone()), 1);

        store.apply(&msg).unwrap();
        assert_eq!(store.get(&key).unwrap().as_string_set(), Some(&perms));
    }

    #[test]
    fn test_seed_respects_versions() {
        let store = CriticalStore::new();
        let report = store.seed([
            CriticalEntry::new(cost_key(), CriticalValue::Number(5.0), 2),
            CriticalEntry::new(cost_key(), CriticalValue::Number(3.0), 1),
        ]);
        assert_eq!(report, SeedReport { applied: 1, skipped: 1 });
        assert_eq!(store.get(&cost_key()).unwrap(), CriticalValue::Number(5.0));
    }

    #[test]
    fn test_reset_tenant() {
        let store = seeded_store();
        store.seed([CriticalEntry::new(
            CacheKey::new("tenant-2", Namespace::USER_STATUS, "user-1"),
            CriticalValue::Enum("active".into()),
            1,
        )]);

        assert_eq!(store.reset_tenant(&TenantId::new("tenant-1")), 1);
        assert!(store.get(&cost_key()).is_err());
        assert_eq!(store.len(), 1);

        store.reset();
        assert!(store.is_empty());
    }
}
