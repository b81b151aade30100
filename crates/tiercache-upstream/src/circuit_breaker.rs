//! Circuit breaker in front of the Wrapper.
//!
//! After a run of consecutive failed fetches the breaker opens and every
//! fetch fails fast with `UpstreamUnavailable` until the cool-down elapses.
//! The first requests after the cool-down are probes; enough successful
//! probes close the circuit again, a failed probe re-opens it.
//!
//! ```text
//! Closed --failure_threshold--> Open --recovery_timeout--> HalfOpen
//!   ^                            ^                            |
//!   |                            +-------probe fails----------+
//!   +------------------success threshold met------------------+
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HALF_OPEN_SUCCESS_THRESHOLD: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// All requests pass through.
    Closed,
    /// Requests are rejected until `until`.
    Open { until: Instant },
    /// Probe requests are let through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open { .. } => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed fetches before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open.
    pub recovery_timeout: Duration,
    /// Successful probes needed to close the circuit from half-open.
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            half_open_success_threshold: DEFAULT_HALF_OPEN_SUCCESS_THRESHOLD,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_half_open_success_threshold(mut self, threshold: u32) -> Self {
        self.half_open_success_threshold = threshold.max(1);
        self
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_half_open_successes: u32,
    config: CircuitBreakerConfig,
    state_transitions: u64,
    fast_fail_count: u64,
}

/// Thread-safe circuit breaker, cheap to clone.
///
/// Critical sections are short and never hold the lock across I/O.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<Inner>>,
}

/// Snapshot of breaker counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub state_transitions: u64,
    pub fast_fail_count: u64,
    pub consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_half_open_successes: 0,
                config,
                state_transitions: 0,
                fast_fail_count: 0,
            })),
        }
    }

    /// Whether a request may go to the network.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open { until } => {
                if Instant::now() >= until {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_half_open_successes = 0;
                    inner.state_transitions += 1;
                    tracing::info!(
                        previous_state = "open",
                        new_state = "half_open",
                        "upstream circuit breaker letting probe requests through"
                    );
                    true
                } else {
                    inner.fast_fail_count += 1;
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.consecutive_half_open_successes += 1;
                if inner.consecutive_half_open_successes >= inner.config.half_open_success_threshold
                {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_half_open_successes = 0;
                    inner.state_transitions += 1;
                    tracing::info!(
                        previous_state = "half_open",
                        new_state = "closed",
                        "upstream circuit breaker closed"
                    );
                }
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Record a failed fetch. Only transient failures should be recorded.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= inner.config.failure_threshold {
                    inner.state = CircuitState::Open {
                        until: Instant::now() + inner.config.recovery_timeout,
                    };
                    inner.state_transitions += 1;
                    tracing::warn!(
                        consecutive_failures = inner.consecutive_failures,
                        recovery_timeout_secs = inner.config.recovery_timeout.as_secs(),
                        "upstream circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open {
                    until: Instant::now() + inner.config.recovery_timeout,
                };
                inner.consecutive_half_open_successes = 0;
                inner.state_transitions += 1;
                tracing::warn!(
                    previous_state = "half_open",
                    new_state = "open",
                    "upstream circuit breaker re-opened after failed probe"
                );
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Current state; an elapsed open state reads as half-open.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            other => other,
        }
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: match inner.state {
                CircuitState::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
                other => other,
            },
            state_transitions: inner.state_transitions,
            fast_fail_count: inner.fast_fail_count,
            consecutive_failures: inner.consecutive_failures,
        }
    }
}
