//! Pulse Core Library
//!
//! Event model, topic derivation, the local event bus and the subscription
//! stream adapter for realtime task board updates.

pub mod broadcast;
pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod protocol;
pub mod stream;
pub mod topic;

pub use broadcast::Broadcaster;
pub use bus::{EventMirror, Listener, LocalEventBus, Subscription};
pub use config::PulseConfig;
pub use error::{PulseError, PulseResult};
pub use event::{Event, EventKind, EventPayload};
pub use protocol::ClientMessage;
pub use stream::{StreamOptions, SubscriptionStream};
pub use topic::{topics_for_event, topics_for_request, SubscriptionRequest, Topic};
