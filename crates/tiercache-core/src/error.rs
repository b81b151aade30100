use thiserror::Error;

/// Error taxonomy shared by both cache tiers, the upstream client and the
/// invalidation subscriber.
///
/// `Clone` is required because a single upstream fetch result is handed to
/// every caller waiting on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A critical key (or namespace route) was never provisioned.
    #[error("Not configured: {0}")]
    Configuration(String),

    /// The upstream fetch failed after retries or while the breaker is open.
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable {
        status: Option<u16>,
        message: String,
    },

    /// The upstream fetch exceeded its deadline.
    #[error("Upstream fetch for {key} timed out after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },

    /// A malformed or inapplicable invalidation payload.
    #[error("Invalid invalidation message: {0}")]
    InvalidMessage(String),

    /// An update whose version is not newer than the stored entry.
    #[error("Stale write ignored for {key}: version {incoming} <= {current}")]
    StaleWriteIgnored {
        key: String,
        incoming: u64,
        current: u64,
    },
}

/// How a failed lookup should be presented to the end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// "Not configured for this tenant"; retrying will not help.
    NotConfigured,
    /// "Temporarily unavailable"; a later attempt may succeed.
    TemporarilyUnavailable,
    /// Operational only, never surfaced to callers.
    Ignored,
}

impl CacheError {
    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an UpstreamUnavailable error without an HTTP status
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            status: None,
            message: message.into(),
        }
    }

    /// Create an UpstreamUnavailable error carrying the upstream HTTP status
    pub fn upstream_status(status: u16, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            status: Some(status),
            message: format!("status {status}: {}", message.into()),
        }
    }

    /// Create a new Timeout error
    pub fn timeout(key: impl ToString, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            key: key.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a new InvalidMessage error
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage(message.into())
    }

    /// Upstream HTTP status embedded in the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UpstreamUnavailable { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether a later attempt of the same lookup may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. } | Self::Timeout { .. })
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Configuration(_) => Disposition::NotConfigured,
            Self::UpstreamUnavailable { .. } | Self::Timeout { .. } => {
                Disposition::TemporarilyUnavailable
            }
            Self::InvalidMessage(_) | Self::StaleWriteIgnored { .. } => Disposition::Ignored,
        }
    }

    /// Short label used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::InvalidMessage(_) => "invalid_message",
            Self::StaleWriteIgnored { .. } => "stale_write_ignored",
        }
    }
}

impl Disposition {
    /// Message suitable for the request-handling layer.
    pub fn user_message(&self) -> &'static str {
        match self {
            Disposition::NotConfigured => "not configured for this tenant",
            Disposition::TemporarilyUnavailable => "temporarily unavailable, please retry",
            Disposition::Ignored => "ignored",
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
