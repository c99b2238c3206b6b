//! Socket control protocol.
//!
//! Client to server messages are JSON objects tagged by `type`:
//!
//! - `{"type":"subscribe","project_id":"p1"}` (also `topic`, `topics`, `user_id`, `client_id`)
//! - `{"type":"unsubscribe","topic":"user:u1"}`
//! - `{"type":"identify","client_id":"c-42"}`
//!
//! Server to client messages are serialized [`Event`](crate::Event) values.

use serde::{Deserialize, Serialize};

use crate::topic::{SubscriptionRequest, Topic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe(SubscriptionRequest),
    Unsubscribe(SubscriptionRequest),
    Identify { client_id: String },
}

impl ClientMessage {
    /// Parse a control message. Malformed or unknown messages yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn subscribe(topic: &Topic) -> Self {
        Self::Subscribe(SubscriptionRequest::for_topic(topic))
    }

    pub fn unsubscribe(topic: &Topic) -> Self {
        Self::Unsubscribe(SubscriptionRequest::for_topic(topic))
    }

    pub fn identify(client_id: impl Into<String>) -> Self {
        Self::Identify {
            client_id: client_id.into(),
        }
    }
}
