//! Namespace routing and the single lookup entry point for callers.

use std::collections::HashMap;
use std::sync::Arc;

use tiercache_core::{CacheError, CacheKey, CriticalValue, Namespace, TenantId, Tier};

use super::critical::CriticalStore;
use super::reference::{ReferenceRead, ReferenceStore};
use crate::metrics;

/// Static namespace -> tier table, fixed at startup.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<Namespace, Tier>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::empty()
            .with_route(Namespace::CREDIT_COST, Tier::Critical)
            .with_route(Namespace::ROLE_PERMISSIONS, Tier::Critical)
            .with_route(Namespace::USER_STATUS, Tier::Critical)
            .with_route(Namespace::FEATURE_CONFIG, Tier::Critical)
            .with_route(Namespace::USER_PROFILE, Tier::Reference)
            .with_route(Namespace::HIERARCHY, Tier::Reference)
            .with_route(Namespace::AUDIT, Tier::Reference)
    }
}

impl RoutingTable {
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    pub fn with_route(mut self, namespace: impl Into<Namespace>, tier: Tier) -> Self {
        self.routes.insert(namespace.into(), tier);
        self
    }

    pub fn tier_of(&self, namespace: &Namespace) -> Option<Tier> {
        self.routes.get(namespace).copied()
    }

    pub fn is_critical(&self, namespace: &Namespace) -> bool {
        self.tier_of(namespace) == Some(Tier::Critical)
    }

    /// Namespaces routed to `tier`, sorted.
    pub fn namespaces(&self, tier: Tier) -> Vec<&Namespace> {
        let mut out: Vec<_> = self
            .routes
            .iter()
            .filter(|(_, t)| **t == tier)
            .map(|(ns, _)| ns)
            .collect();
        out.sort();
        out
    }
}

/// Result of a routed lookup.
#[derive(Debug, Clone)]
pub enum LookupValue {
    Critical(CriticalValue),
    Reference(ReferenceRead),
}

impl LookupValue {
    pub fn tier(&self) -> Tier {
        match self {
            LookupValue::Critical(_) => Tier::Critical,
            LookupValue::Reference(_) => Tier::Reference,
        }
    }
}

/// Dispatches lookups to the tier that owns the namespace.
#[derive(Clone)]
pub struct LookupRouter {
    routes: Arc<RoutingTable>,
    critical: Arc<CriticalStore>,
    reference: ReferenceStore,
}

impl LookupRouter {
    pub fn new(
        routes: Arc<RoutingTable>,
        critical: Arc<CriticalStore>,
        reference: ReferenceStore,
    ) -> Self {
        Self {
            routes,
            critical,
            reference,
        }
    }

    /// Look up any key, whichever tier owns its namespace.
    ///
    /// Unrouted namespaces fail with `Configuration`.
    pub async fn lookup(
        &self,
        tenant_id: impl Into<TenantId>,
        namespace: impl Into<Namespace>,
        identifier: impl Into<String>,
    ) -> Result<LookupValue, CacheError> {
        let key = CacheKey::new(tenant_id, namespace, identifier);
        match self.route(&key)? {
            Tier::Critical => self.critical_value(&key).map(LookupValue::Critical),
            Tier::Reference => self.reference_record(&key).await.map(LookupValue::Reference),
        }
    }

    pub fn get_critical_value(
        &self,
        tenant_id: impl Into<TenantId>,
        namespace: impl Into<Namespace>,
        identifier: impl Into<String>,
    ) -> Result<CriticalValue, CacheError> {
        let key = CacheKey::new(tenant_id, namespace, identifier);
        self.expect_tier(&key, Tier::Critical)?;
        self.critical_value(&key)
    }

    pub async fn get_reference_record(
        &self,
        tenant_id: impl Into<TenantId>,
        namespace: impl Into<Namespace>,
        identifier: impl Into<String>,
    ) -> Result<ReferenceRead, CacheError> {
        let key = CacheKey::new(tenant_id, namespace, identifier);
        self.expect_tier(&key, Tier::Reference)?;
        self.reference_record(&key).await
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    fn route(&self, key: &CacheKey) -> Result<Tier, CacheError> {
        self.routes.tier_of(key.namespace()).ok_or_else(|| {
            tracing::debug!(key = %key, "lookup for unrouted namespace");
            CacheError::configuration(format!(
                "namespace '{}' is not routed to any tier",
                key.namespace()
            ))
        })
    }

    fn expect_tier(&self, key: &CacheKey, expected: Tier) -> Result<(), CacheError> {
        let tier = self.route(key)?;
        if tier != expected {
            return Err(CacheError::configuration(format!(
                "namespace '{}' belongs to the {tier} tier, not {expected}",
                key.namespace()
            )));
        }
        Ok(())
    }

    fn critical_value(&self, key: &CacheKey) -> Result<CriticalValue, CacheError> {
        self.critical
            .get(key)
            .inspect_err(|err| log_failure(key, Tier::Critical, err))
    }

    async fn reference_record(&self, key: &CacheKey) -> Result<ReferenceRead, CacheError> {
        self.reference
            .get(key)
            .await
            .inspect_err(|err| log_failure(key, Tier::Reference, err))
    }
}

fn log_failure(key: &CacheKey, tier: Tier, err: &CacheError) {
    let tier_label = match tier {
        Tier::Critical => "critical",
        Tier::Reference => "reference",
    };
    metrics::record_lookup_error(tier_label, err.kind());
    tracing::debug!(
        key = %key,
        tier = %tier,
        kind = err.kind(),
        disposition = ?err.disposition(),
        "lookup failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routes() {
        let table = RoutingTable::default();
        assert!(table.is_critical(&Namespace::new(Namespace::CREDIT_COST)));
        assert!(!table.is_critical(&Namespace::new(Namespace::AUDIT)));
        assert_eq!(table.namespaces(Tier::Critical).len(), 4);
        assert_eq!(table.namespaces(Tier::Reference).len(), 3);
    }

    #[test]
    fn test_later_route_overrides() {
        let table = RoutingTable::default().with_route(Namespace::AUDIT, Tier::Critical);
        assert_eq!(
            table.tier_of(&Namespace::new(Namespace::AUDIT)),
            Some(Tier::Critical)
        );
    }
}
