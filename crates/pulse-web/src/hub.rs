//! Connection hub: the registry of live socket connections and their topics.
//!
//! The hub is transport-agnostic. Each registered connection gets a bounded
//! queue of serialized events; the websocket handler drains it into the
//! socket. A connection whose queue is full or closed is removed. Removing a
//! connection drops its sender, which ends the writer and closes the socket,
//! so a connection never lingers in the registry after its transport is gone
//! and a stalled reader cannot grow server memory.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use pulse_core::topic::intersects;
use pulse_core::{
    topics_for_event, topics_for_request, ClientMessage, Event, LocalEventBus, Subscription, Topic,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Events queued per connection before it is considered stalled.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Identifier of one live connection.
pub type ConnectionId = u64;

/// Serialized event, shared between every connection it is delivered to.
pub type Payload = Arc<str>;

struct Connection {
    topics: HashSet<Topic>,
    client_id: Option<String>,
    tx: mpsc::Sender<Payload>,
}

/// Registry of live connections.
pub struct ConnectionHub {
    connections: DashMap<ConnectionId, Connection>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(0),
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ConnectionHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hub whose connections queue at most `capacity` undelivered events.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity: capacity.max(1),
            ..Self::default()
        })
    }

    /// Deliver every event published on `bus` to matching connections.
    pub fn attach(self: &Arc<Self>, bus: &LocalEventBus) -> Subscription {
        let hub = Arc::downgrade(self);
        bus.subscribe_all(move |event| {
            if let Some(hub) = hub.upgrade() {
                hub.deliver(event);
            }
            Ok(())
        })
    }

    /// Register a new connection with an empty topic set.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Payload>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.connections.insert(
            id,
            Connection {
                topics: HashSet::new(),
                client_id: None,
                tx,
            },
        );
        (id, rx)
    }

    /// Remove a connection, closing its outbound channel.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.connections.remove(&id).is_some()
    }

    /// Apply a control message to a connection. Unknown ids are ignored.
    pub fn apply(&self, id: ConnectionId, message: ClientMessage) {
        let Some(mut conn) = self.connections.get_mut(&id) else {
            return;
        };
        match message {
            ClientMessage::Subscribe(request) => {
                let topics = topics_for_request(&request);
                debug!(connection_id = id, ?topics, "Subscribing connection");
                if let Some(client_id) = request.client_id {
                    conn.client_id = Some(client_id);
                }
                conn.topics.extend(topics);
            }
            ClientMessage::Unsubscribe(request) => {
                let topics = topics_for_request(&request);
                debug!(connection_id = id, ?topics, "Unsubscribing connection");
                if let Some(client_id) = request.client_id {
                    conn.client_id = Some(client_id);
                }
                for topic in &topics {
                    conn.topics.remove(topic);
                }
            }
            ClientMessage::Identify { client_id } => {
                debug!(connection_id = id, client_id = %client_id, "Connection identified");
                conn.client_id = Some(client_id);
            }
        }
    }

    /// Send `event` to every connection whose topics intersect the event's.
    ///
    /// Returns the number of connections it was handed to. Connections whose
    /// queue is closed or full are removed; nothing is retried.
    pub fn deliver(&self, event: &Event) -> usize {
        let topics: BTreeSet<Topic> = topics_for_event(event);
        if topics.is_empty() {
            debug!(kind = %event.kind(), "Event has no topic, not delivered");
            return 0;
        }

        let payload: Payload = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(kind = %event.kind(), error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for conn in self.connections.iter() {
            if !intersects(&conn.topics, &topics) {
                continue;
            }
            match conn.tx.try_send(Arc::clone(&payload)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(connection_id = *conn.key(), "Connection queue full, dropping slow connection");
                    dropped.push(*conn.key());
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection_id = *conn.key(), "Dropping closed connection");
                    dropped.push(*conn.key());
                }
            }
        }

        for id in dropped {
            self.remove(id);
        }

        debug!(kind = %event.kind(), delivered, "Event fanned out");
        delivered
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Topics of a connection, sorted.
    pub fn topics(&self, id: ConnectionId) -> Option<Vec<Topic>> {
        self.connections.get(&id).map(|conn| {
            let mut topics: Vec<Topic> = conn.topics.iter().cloned().collect();
            topics.sort();
            topics
        })
    }

    /// Correlation id a connection identified itself with.
    pub fn client_id(&self, id: ConnectionId) -> Option<String> {
        self.connections
            .get(&id)
            .and_then(|conn| conn.client_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::event::{EventPayload, NotificationSnapshot};
    use pulse_core::SubscriptionRequest;
    use std::time::Duration;
    use tokio::time::timeout;

    fn task_deleted(project_id: Option<&str>) -> Event {
        Event::new(EventPayload::TaskDeleted {
            task_id: "t1".to_string(),
            project_id: project_id.map(str::to_string),
        })
    }

    fn notification(recipient_id: &str) -> Event {
        Event::new(EventPayload::NotificationCreated {
            notification: NotificationSnapshot {
                id: "n1".to_string(),
                recipient_id: Some(recipient_id.to_string()),
                message: "ping".to_string(),
                task_id: None,
                read: false,
                created_at: None,
            },
        })
    }

    fn subscribe(hub: &ConnectionHub, id: ConnectionId, request: SubscriptionRequest) {
        hub.apply(id, ClientMessage::Subscribe(request));
    }

    fn drain(rx: &mut mpsc::Receiver<Payload>) -> Vec<Payload> {
        let mut out = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            out.push(payload);
        }
        out
    }

    #[test]
    fn test_delivers_exactly_once_to_matching_connections() {
        let hub = ConnectionHub::new();
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        let (c, mut rx_c) = hub.register();
        subscribe(&hub, a, SubscriptionRequest::for_project("p1"));
        subscribe(&hub, b, SubscriptionRequest {
            topics: vec!["project:p1".to_string(), "project:*".to_string()],
            ..SubscriptionRequest::default()
        });
        subscribe(&hub, c, SubscriptionRequest::for_project("p2"));

        assert_eq!(hub.deliver(&task_deleted(Some("p1"))), 2);

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[test]
    fn test_event_without_topic_reaches_nobody() {
        let hub = ConnectionHub::new();
        let (a, mut rx_a) = hub.register();
        subscribe(&hub, a, SubscriptionRequest {
            topics: vec!["project:*".to_string(), "user:*".to_string()],
            ..SubscriptionRequest::default()
        });

        assert_eq!(hub.deliver(&task_deleted(None)), 0);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery_for_that_connection_only() {
        let hub = ConnectionHub::new();
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        subscribe(&hub, a, SubscriptionRequest::for_project("p1"));
        subscribe(&hub, b, SubscriptionRequest::for_project("p1"));

        hub.apply(a, ClientMessage::Unsubscribe(SubscriptionRequest {
            topic: Some("project:p1".to_string()),
            ..SubscriptionRequest::default()
        }));
        hub.deliver(&task_deleted(Some("p1")));

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
        assert_eq!(hub.topics(a), Some(vec![]));
    }

    #[test]
    fn test_user_topics_route_notifications() {
        let hub = ConnectionHub::new();
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        subscribe(&hub, a, SubscriptionRequest::for_user("u1"));
        subscribe(&hub, b, SubscriptionRequest::for_user("u2"));

        hub.deliver(&notification("u1"));

        let received = drain(&mut rx_a);
        assert_eq!(received.len(), 1);
        let event: Event = serde_json::from_str(&received[0]).unwrap();
        assert_eq!(event, notification("u1"));
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_closed_connection_is_removed_on_send() {
        let hub = ConnectionHub::new();
        let (a, rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        subscribe(&hub, a, SubscriptionRequest::for_project("p1"));
        subscribe(&hub, b, SubscriptionRequest::for_project("p1"));
        drop(rx_a);

        assert_eq!(hub.deliver(&task_deleted(Some("p1"))), 1);
        assert_eq!(hub.len(), 1);
        assert!(hub.topics(a).is_none());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn test_stalled_connection_is_dropped_others_keep_receiving() {
        let hub = ConnectionHub::with_capacity(2);
        let (slow, mut rx_slow) = hub.register();
        let (fast, mut rx_fast) = hub.register();
        subscribe(&hub, slow, SubscriptionRequest::for_project("p1"));
        subscribe(&hub, fast, SubscriptionRequest::for_project("p1"));

        assert_eq!(hub.deliver(&task_deleted(Some("p1"))), 2);
        assert_eq!(drain(&mut rx_fast).len(), 1);
        assert_eq!(hub.deliver(&task_deleted(Some("p1"))), 2);
        assert_eq!(drain(&mut rx_fast).len(), 1);

        // The slow reader never drained; its third event overflows.
        assert_eq!(hub.deliver(&task_deleted(Some("p1"))), 1);
        assert!(hub.topics(slow).is_none());
        assert_eq!(hub.len(), 1);
        assert_eq!(drain(&mut rx_fast).len(), 1);

        // Queued events are still readable, then the queue reports closed.
        assert_eq!(drain(&mut rx_slow).len(), 2);
        assert!(rx_slow.is_closed());

        assert_eq!(hub.deliver(&task_deleted(Some("p1"))), 1);
        assert_eq!(drain(&mut rx_fast).len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let hub = ConnectionHub::with_capacity(0);
        let (a, mut rx_a) = hub.register();
        subscribe(&hub, a, SubscriptionRequest::for_project("p1"));
        assert_eq!(hub.deliver(&task_deleted(Some("p1"))), 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
    }

    #[test]
    fn test_identify_keeps_topics() {
        let hub = ConnectionHub::new();
        let (a, _rx) = hub.register();
        subscribe(&hub, a, SubscriptionRequest::for_project("p1"));
        hub.apply(a, ClientMessage::identify("client-7"));

        assert_eq!(hub.client_id(a).as_deref(), Some("client-7"));
        assert_eq!(hub.topics(a), Some(vec![Topic::project("p1").unwrap()]));
    }

    #[test]
    fn test_remove_closes_channel() {
        let hub = ConnectionHub::new();
        let (a, mut rx_a) = hub.register();
        assert!(hub.remove(a));
        assert!(!hub.remove(a));
        assert!(rx_a.try_recv().is_err());
        assert!(hub.is_empty());
        hub.apply(a, ClientMessage::identify("ghost"));
        assert!(hub.client_id(a).is_none());
    }

    #[tokio::test]
    async fn test_attached_hub_receives_bus_events() {
        let bus = LocalEventBus::new();
        let hub = ConnectionHub::new();
        let _fanout = hub.attach(&bus);
        let (a, mut rx_a) = hub.register();
        subscribe(&hub, a, SubscriptionRequest::for_project("p1"));

        bus.publish(task_deleted(Some("p1")));
        let payload = timeout(Duration::from_secs(1), rx_a.recv())
            .await
            .unwrap()
            .unwrap();
        let event: Event = serde_json::from_str(&payload).unwrap();
        assert_eq!(event, task_deleted(Some("p1")));
    }
}
