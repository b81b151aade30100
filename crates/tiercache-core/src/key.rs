//! Tenant-partitioned cache keys.
//!
//! Every key carries its tenant, so two tenants can never observe each
//! other's entries even when namespace and identifier collide.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an isolated customer/organization scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Data kind of a cache key (`credit-cost`, `user-profile`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub const CREDIT_COST: &'static str = "credit-cost";
    pub const ROLE_PERMISSIONS: &'static str = "role-permissions";
    pub const USER_STATUS: &'static str = "user-status";
    pub const FEATURE_CONFIG: &'static str = "feature-config";
    pub const USER_PROFILE: &'static str = "user-profile";
    pub const HIERARCHY: &'static str = "hierarchy";
    pub const AUDIT: &'static str = "audit";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Namespace {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which store owns a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Authorization/billing data: never stale, never fetched on miss.
    Critical,
    /// Larger records served through a TTL cache in front of the Wrapper.
    Reference,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Critical => write!(f, "critical"),
            Tier::Reference => write!(f, "reference"),
        }
    }
}

/// Composite `(tenant, namespace, identifier)` key.
///
/// Keys are immutable once built; equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    tenant_id: TenantId,
    namespace: Namespace,
    identifier: String,
}

impl CacheKey {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        namespace: impl Into<Namespace>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            namespace: namespace.into(),
            identifier: identifier.into(),
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether this key belongs to `tenant`.
    #[inline]
    pub fn belongs_to(&self, tenant: &TenantId) -> bool {
        &self.tenant_id == tenant
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.tenant_id, self.namespace, self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_structural_equality() {
        let a = CacheKey::new("tenant-1", Namespace::CREDIT_COST, "crm.leads.create");
        let b = CacheKey::new(
            TenantId::new("tenant-1"),
            Namespace::new("credit-cost"),
            String::from("crm.leads.create"),
        );
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_tenants_are_distinct() {
        let a = CacheKey::new("tenant-1", Namespace::USER_PROFILE, "user-456");
        let b = CacheKey::new("tenant-2", Namespace::USER_PROFILE, "user-456");
        assert_ne!(a, b);
        assert!(a.belongs_to(&TenantId::new("tenant-1")));
        assert!(!b.belongs_to(&TenantId::new("tenant-1")));
    }

    #[test]
    fn test_display() {
        let key = CacheKey::new("tenant-1", Namespace::HIERARCHY, "org-9");
        assert_eq!(key.to_string(), "tenant-1:hierarchy:org-9");
        assert_eq!(Tier::Reference.to_string(), "reference");
    }
}
