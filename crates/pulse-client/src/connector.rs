//! Transport connectors.
//!
//! A [`Connector`] opens one duplex text connection to the fan-out server.
//! The connection is exposed as a pair of channels so the manager never
//! touches the socket directly: dropping `outgoing` closes the socket, and
//! `incoming` yields `None` once the peer has gone away.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::ClientResult;

/// One open transport connection.
pub struct Connection {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> ClientResult<Connection>;
}

/// WebSocket connector for the `/ws` endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> ClientResult<Connection> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        debug!(url = %self.url, "WebSocket connection established");
        let (mut write, mut read) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if write.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let url = self.url.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(url = %url, error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(Connection {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
