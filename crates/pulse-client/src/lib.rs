//! Pulse client.
//!
//! Shares one transport connection between many topic subscribers, keeps
//! subscription intent across reconnects, and posts events to a server from
//! processes that do not host one.

pub mod backoff;
pub mod connector;
pub mod error;
pub mod manager;
pub mod publisher;

pub use backoff::{Backoff, ReconnectConfig};
pub use connector::{Connection, Connector, WsConnector};
pub use error::{ClientError, ClientResult};
pub use manager::{is_echo, ClientConfig, ClientManager, Phase, TopicSubscription};
pub use publisher::HttpPublisher;
