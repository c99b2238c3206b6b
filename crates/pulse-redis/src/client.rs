//! Redis broker transport.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::transport::BrokerTransport;

/// Broker error types.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Redis pub/sub transport.
///
/// Holds one lazily created outbound connection, reused for every publish.
/// A failed connect leaves the slot empty so the next publish retries; a
/// failed publish discards the cached connection.
pub struct RedisTransport {
    client: redis::Client,
    outbound: Mutex<Option<ConnectionManager>>,
}

impl RedisTransport {
    /// Create a transport from a URL. Does not connect.
    ///
    /// Example URL: `redis://127.0.0.1:6379`
    pub fn open(redis_url: &str) -> BrokerResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            outbound: Mutex::new(None),
        })
    }

    async fn connection(&self) -> BrokerResult<ConnectionManager> {
        let mut slot = self.outbound.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = ConnectionManager::new(self.client.clone()).await?;
        info!("Connected to Redis broker for publishing");
        *slot = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl BrokerTransport for RedisTransport {
    async fn publish(&self, channel: &str, payload: String) -> BrokerResult<()> {
        let mut conn = self.connection().await?;
        match conn.publish::<_, _, ()>(channel, payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                *self.outbound.lock().await = None;
                Err(e.into())
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> BrokerResult<BoxStream<'static, String>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        info!(channel = %channel, "Connected to Redis broker for listening");

        let messages = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        debug!(error = %e, "Dropping non-text broker message");
                        None
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

    #[test]
    fn test_open_does_not_connect() {
        assert!(RedisTransport::open("redis://127.0.0.1:1").is_ok());
    }

    #[test]
    fn test_open_rejects_bad_url() {
        assert!(matches!(
            RedisTransport::open("not a url"),
            Err(BrokerError::Connection(_))
        ));
    }
}
