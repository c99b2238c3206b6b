//! Client error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected event with status {0}")]
    Rejected(u16),

    #[error("Connection failed: {0}")]
    Connect(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
