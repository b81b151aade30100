//! Redis pub/sub transport for multi-instance deployments.
//!
//! Each subscription opens a dedicated pub/sub connection; publishing goes
//! through the pooled connections.

use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime, redis::AsyncCommands};
use futures_util::StreamExt;

use super::{InvalidationTransport, MessageStream, TransportError};

pub struct RedisTransport {
    client: redis::Client,
    pool: Pool,
}

impl RedisTransport {
    pub fn new(redis_url: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| TransportError::Connection(format!("failed to create Redis client: {e}")))?;
        let pool = deadpool_redis::Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| TransportError::Connection(format!("failed to create Redis pool: {e}")))?;

        Ok(Self { client, pool })
    }
}

#[async_trait]
impl InvalidationTransport for RedisTransport {
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TransportError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| TransportError::Connection(format!("failed to get pub/sub connection: {e}")))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        tracing::info!(channel, "subscribed to Redis channel");

        Ok(pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec())
            .boxed())
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TransportError::Connection(format!("failed to get Redis connection: {e}")))?;

        let _: () = conn
            .publish(channel, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }
}
