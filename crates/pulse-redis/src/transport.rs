//! Broker transport abstraction and the in-process implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tracing::warn;

use crate::client::{BrokerError, BrokerResult};

/// Per-channel buffer of the in-memory broker.
const MEMORY_CHANNEL_CAPACITY: usize = 1024;

/// A shared pub/sub channel that several processes can join.
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    /// Publish one payload on `channel`.
    async fn publish(&self, channel: &str, payload: String) -> BrokerResult<()>;

    /// Subscribe to `channel`. The stream ends when the subscription is lost.
    async fn subscribe(&self, channel: &str) -> BrokerResult<BoxStream<'static, String>>;
}

/// In-memory broker based on broadcast channels per channel name.
///
/// Clones share the same channels, so bridges attached to different buses in
/// one process behave like separate processes on one Redis.
#[derive(Clone)]
pub struct MemoryTransport {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    available: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the broker going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |sender| sender.receiver_count())
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(MEMORY_CHANNEL_CAPACITY).0)
            .clone()
    }

    fn check_available(&self) -> BrokerResult<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("in-memory broker is down".to_string()))
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: String) -> BrokerResult<()> {
        self.check_available()?;
        // No subscribers is not an error, matching Redis PUBLISH.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> BrokerResult<BoxStream<'static, String>> {
        self.check_available()?;
        let rx = self.sender(channel).subscribe();
        let channel = channel.to_string();
        let messages = futures::stream::unfold(rx, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(payload) => return Some((payload, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %channel, skipped, "In-memory broker subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_subscribers_share_channel() {
        let broker = MemoryTransport::new();
        let mut first = broker.subscribe("c").await.unwrap();
        let mut second = broker.clone().subscribe("c").await.unwrap();
        let mut other = broker.subscribe("elsewhere").await.unwrap();

        broker.publish("c", "hello".to_string()).await.unwrap();

        let got = timeout(Duration::from_secs(1), first.next()).await.unwrap();
        assert_eq!(got.as_deref(), Some("hello"));
        let got = timeout(Duration::from_secs(1), second.next()).await.unwrap();
        assert_eq!(got.as_deref(), Some("hello"));
        assert!(timeout(Duration::from_millis(20), other.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_broker_fails_calls() {
        let broker = MemoryTransport::new();
        broker.set_available(false);
        assert!(broker.publish("c", "x".to_string()).await.is_err());
        assert!(broker.subscribe("c").await.is_err());

        broker.set_available(true);
        assert!(broker.publish("c", "x".to_string()).await.is_ok());
    }
}
