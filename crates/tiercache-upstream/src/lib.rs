//! Boundary to the Wrapper, the authoritative upstream for reference data.
//!
//! - [`UpstreamClient`] fetches one reference record and knows nothing about
//!   caching.
//! - [`HttpUpstreamClient`] talks to the Wrapper over HTTP with a request
//!   timeout, bounded retries for transient failures and an optional
//!   [`CircuitBreaker`].
//! - [`SeedSource`] is the one-time bulk load of critical entries performed
//!   before the process starts serving lookups.

pub mod circuit_breaker;
pub mod client;
pub mod retry;
pub mod seed;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
pub use client::{HttpUpstreamClient, UpstreamClient, UpstreamConfig};
pub use retry::RetryPolicy;
pub use seed::{SeedSource, StaticSeedSource, WrapperSeedSource};
