//! Per-tenant invalidation listener.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tiercache_core::{CacheError, InvalidationMessage, TenantId, Tier};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{InvalidationTransport, MessageStream, channel_name};
use crate::cache::{CriticalStore, ReferenceStore, RoutingTable};
use crate::metrics;

/// Resubscribe delays: `initial`, doubling up to `max`. Reset after every
/// successful subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// What a single message did to the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationOutcome {
    CriticalUpdated { version: u64 },
    ReferenceEvicted { existed: bool },
}

enum StreamEnd {
    Shutdown,
    Disconnected,
}

/// Applies one tenant's invalidation channel to the stores.
///
/// Messages are handled one at a time in delivery order, so for any key
/// the last message delivered is the one that takes effect.
pub struct InvalidationSubscriber {
    tenant: TenantId,
    channel: String,
    transport: Arc<dyn InvalidationTransport>,
    routes: Arc<RoutingTable>,
    critical: Arc<CriticalStore>,
    reference: ReferenceStore,
    backoff: BackoffPolicy,
}

impl InvalidationSubscriber {
    pub fn new(
        tenant: TenantId,
        channel_template: &str,
        transport: Arc<dyn InvalidationTransport>,
        routes: Arc<RoutingTable>,
        critical: Arc<CriticalStore>,
        reference: ReferenceStore,
    ) -> Self {
        let channel = channel_name(channel_template, &tenant);
        Self {
            tenant,
            channel,
            transport,
            routes,
            critical,
            reference,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Subscribe and apply messages until shutdown, resubscribing with
    /// backoff whenever the subscription fails or is lost.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tenant = %self.tenant, channel = %self.channel, "invalidation subscriber started");
        let mut backoff = self.backoff.initial;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.transport.subscribe(&self.channel).await {
                Ok(stream) => {
                    info!(tenant = %self.tenant, channel = %self.channel, "subscribed to invalidation channel");
                    backoff = self.backoff.initial;
                    match self.drain(stream, &mut shutdown).await {
                        StreamEnd::Shutdown => break,
                        StreamEnd::Disconnected => warn!(
                            tenant = %self.tenant,
                            backoff_ms = backoff.as_millis() as u64,
                            "invalidation stream lost, resubscribing"
                        ),
                    }
                }
                Err(e) => error!(
                    tenant = %self.tenant,
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "failed to subscribe to invalidation channel, retrying"
                ),
            }

            metrics::record_subscriber_reconnect(self.tenant.as_str());
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = self.backoff.next(backoff);
        }

        info!(tenant = %self.tenant, "invalidation subscriber stopped");
    }

    async fn drain(&self, mut stream: MessageStream, shutdown: &mut watch::Receiver<bool>) -> StreamEnd {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => return StreamEnd::Shutdown,
                next = stream.next() => match next {
                    Some(payload) => self.process(&payload),
                    None => return StreamEnd::Disconnected,
                },
            }
        }
    }

    /// Handle one payload, logging instead of failing.
    pub fn process(&self, raw: &[u8]) {
        match self.handle_payload(raw) {
            Ok(outcome) => {
                debug!(tenant = %self.tenant, ?outcome, "invalidation applied");
                let label = match outcome {
                    InvalidationOutcome::CriticalUpdated { .. } => "applied",
                    InvalidationOutcome::ReferenceEvicted { .. } => "evicted",
                };
                metrics::record_invalidation(self.tenant.as_str(), label);
            }
            Err(err @ CacheError::StaleWriteIgnored { .. }) => {
                debug!(tenant = %self.tenant, error = %err, "stale invalidation ignored");
                metrics::record_invalidation(self.tenant.as_str(), "stale");
            }
            Err(err) => {
                warn!(tenant = %self.tenant, error = %err, "dropping invalidation message");
                metrics::record_invalidation(self.tenant.as_str(), "invalid");
            }
        }
    }

    /// Parse a payload and apply it to the store owning its namespace.
    pub fn handle_payload(&self, raw: &[u8]) -> Result<InvalidationOutcome, CacheError> {
        let message = InvalidationMessage::parse(raw)?;
        if message.tenant_id != self.tenant {
            return Err(CacheError::invalid_message(format!(
                "message for tenant '{}' received on channel {}",
                message.tenant_id, self.channel
            )));
        }

        match self.routes.tier_of(&message.namespace) {
            Some(Tier::Critical) => {
                let version = self.critical.apply(&message)?;
                Ok(InvalidationOutcome::CriticalUpdated { version })
            }
            _ => {
                let existed = self.reference.invalidate(&message.key());
                Ok(InvalidationOutcome::ReferenceEvicted { existed })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        let mut delay = policy.initial;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(delay.as_secs());
            delay = policy.next(delay);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }
}
