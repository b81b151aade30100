//! The two cache tiers and the router in front of them.
//!
//! - [`CriticalStore`]: versioned, push-updated, never fetched on miss
//! - [`ReferenceStore`]: TTL-bounded, fetched from upstream with single-flight
//! - [`LookupRouter`]: picks the tier from a static namespace table

pub mod critical;
pub mod reference;
pub mod router;

pub use critical::{CriticalStats, CriticalStore, SeedReport};
pub use reference::{
    EntryState, MAX_TTL, Payload, ReferenceRead, ReferenceStats, ReferenceStore, TtlPolicy,
};
pub use router::{LookupRouter, LookupValue, RoutingTable};
