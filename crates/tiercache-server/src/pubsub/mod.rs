//! Per-tenant invalidation channels.
//!
//! A transport delivers raw payloads published on a channel; the
//! [`InvalidationSubscriber`] parses them and applies each one to the store
//! that owns its namespace, in delivery order.
//!
//! ## Example Flow
//!
//! ```text
//! Admin tool: PUBLISH tenant:acme:changes {"kind":"update",...,"version":2}
//!   ↓
//! Subscriber (acme): critical namespace → CriticalStore::apply
//! Subscriber (acme): other namespace    → ReferenceStore::invalidate
//! ```

pub mod memory;
pub mod redis;
pub mod subscriber;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tiercache_core::{InvalidationMessage, TenantId};

pub use memory::InMemoryTransport;
pub use self::redis::RedisTransport;
pub use subscriber::{BackoffPolicy, InvalidationOutcome, InvalidationSubscriber};

/// Placeholder replaced by the tenant id in channel templates.
pub const TENANT_PLACEHOLDER: &str = "{tenant_id}";

/// Raw payloads in delivery order. The stream ends when the subscription
/// is lost.
pub type MessageStream = BoxStream<'static, Vec<u8>>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport connection error: {0}")]
    Connection(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Publish/subscribe channel carrying invalidation messages.
#[async_trait]
pub trait InvalidationTransport: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TransportError>;

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError>;
}

/// Expand a channel template such as `tenant:{tenant_id}:changes`.
pub fn channel_name(template: &str, tenant: &TenantId) -> String {
    template.replace(TENANT_PLACEHOLDER, tenant.as_str())
}

/// Publish a message on its tenant's channel.
pub async fn publish_invalidation(
    transport: &dyn InvalidationTransport,
    channel_template: &str,
    message: &InvalidationMessage,
) -> Result<(), TransportError> {
    let channel = channel_name(channel_template, &message.tenant_id);
    let payload = message
        .to_json()
        .map_err(|e| TransportError::Serialization(e.to_string()))?;

    transport.publish(&channel, payload.as_bytes()).await?;
    tracing::debug!(
        channel = %channel,
        key = %message.key(),
        kind = ?message.kind,
        "published invalidation"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        assert_eq!(
            channel_name("tenant:{tenant_id}:changes", &TenantId::new("acme")),
            "tenant:acme:changes"
        );
    }
}
