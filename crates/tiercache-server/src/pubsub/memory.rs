//! In-process transport backed by tokio broadcast channels.
//!
//! Used when Redis is disabled (single-instance deployments) and in tests.
//! [`InMemoryTransport::disconnect`] and [`InMemoryTransport::set_available`]
//! simulate a lost connection and a broker outage.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;

use super::{InvalidationTransport, MessageStream, TransportError};

const DEFAULT_CAPACITY: usize = 1024;

pub struct InMemoryTransport {
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
    capacity: usize,
    available: AtomicBool,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            available: AtomicBool::new(true),
        }
    }

    /// End every open subscription on `channel`.
    pub fn disconnect(&self, channel: &str) {
        if self.channels.remove(channel).is_some() {
            tracing::debug!(channel, "in-memory channel disconnected");
        }
    }

    /// While unavailable, subscribe and publish fail.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if !available {
            self.channels.clear();
        }
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn ensure_available(&self) -> Result<(), TransportError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Connection("transport unavailable".into()))
        }
    }
}

#[async_trait]
impl InvalidationTransport for InMemoryTransport {
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, TransportError> {
        self.ensure_available()?;
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let channel = channel.to_string();
        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(channel = %channel, skipped, "subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.ensure_available()?;
        let sender = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();
        // No subscribers is not an error, matching Redis PUBLISH.
        let _ = sender.send(payload.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber_in_order() {
        let transport = InMemoryTransport::new();
        let mut stream = transport.subscribe("tenant:a:changes").await.unwrap();

        transport.publish("tenant:a:changes", b"one").await.unwrap();
        transport.publish("tenant:a:changes", b"two").await.unwrap();
        transport.publish("tenant:b:changes", b"other").await.unwrap();

        assert_eq!(stream.next().await.unwrap(), b"one".to_vec());
        assert_eq!(stream.next().await.unwrap(), b"two".to_vec());
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream() {
        let transport = InMemoryTransport::new();
        let mut stream = transport.subscribe("c").await.unwrap();
        assert_eq!(transport.subscriber_count("c"), 1);

        transport.disconnect("c");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_rejects_subscribe() {
        let transport = InMemoryTransport::new();
        transport.set_available(false);
        assert!(transport.subscribe("c").await.is_err());
        transport.set_available(true);
        assert!(transport.subscribe("c").await.is_ok());
    }
}
