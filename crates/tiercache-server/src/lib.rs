//! Multi-tenant, dual-tier in-process cache.
//!
//! - **Critical tier**: credit costs, permissions, user status, feature
//!   configuration. Seeded at startup, updated only by versioned pushes,
//!   never fetched on miss.
//! - **Reference tier**: profiles, hierarchy, audit records. TTL-bounded and
//!   fetched from the Wrapper with one request per key in flight.
//!
//! [`runtime::CacheRuntime`] assembles both tiers, the
//! [`cache::LookupRouter`], one [`pubsub::InvalidationSubscriber`] per
//! tenant, and a background sweeper.

pub mod cache;
pub mod config;
pub mod metrics;
pub mod observability;
pub mod pubsub;
pub mod runtime;
pub mod seed;

pub use cache::{
    CriticalStore, EntryState, LookupRouter, LookupValue, ReferenceRead, ReferenceStore,
    RoutingTable, TtlPolicy,
};
pub use self::config::{AppConfig, ConfigError};
pub use runtime::{CacheRuntime, CacheRuntimeBuilder};
pub use tiercache_core::{CacheError, CacheKey, CriticalValue, Namespace, TenantId, Tier};
