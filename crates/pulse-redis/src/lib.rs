//! Pulse Redis Broker Bridge
//!
//! Shares local event bus traffic between server instances over a Redis
//! pub/sub channel. Without a broker URL every instance runs standalone.

pub mod bridge;
pub mod client;
pub mod transport;

pub use bridge::{BridgeConfig, BridgeStats, BrokerBridge};
pub use client::{BrokerError, BrokerResult, RedisTransport};
pub use transport::{BrokerTransport, MemoryTransport};
