//! Client connection manager.
//!
//! Many independent consumers in one client process share a single transport
//! connection. Each [`ClientManager::subscribe_to_topic`] call bumps a
//! reference count in the desired-topic table; the transport is subscribed to
//! a topic when its count goes 0 -> 1 and unsubscribed when it returns to 0.
//!
//! A background driver owns the connection. It runs only while at least one
//! topic is desired, reconnects with bounded exponential backoff, and on every
//! open sends `identify` followed by one `subscribe` per desired topic. The
//! table is replayed from scratch, never diffed against the old connection.
//!
//! Inbound events are dispatched through a client-local [`LocalEventBus`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pulse_core::{ClientMessage, Event, EventKind, LocalEventBus, Subscription, Topic};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, ReconnectConfig};
use crate::connector::{Connection, Connector};

/// Whether `event` was caused by the client identified by `client_id`.
pub fn is_echo(event: &Event, client_id: &str) -> bool {
    event.originated_from(client_id)
}

/// Connection lifecycle as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Stable id sent in `identify` and compared against event origins.
    pub client_id: String,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_client_id(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }
}

struct State {
    desired: HashMap<Topic, usize>,
    phase: Phase,
    outbound: Option<mpsc::UnboundedSender<String>>,
    driver_running: bool,
}

struct Shared {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    bus: LocalEventBus,
    state: Mutex<State>,
    /// Signalled when the desired-topic table becomes empty.
    idle: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<Event>(text) {
            Ok(event) => self.bus.publish_local(event),
            Err(e) => debug!(error = %e, "Dropping unrecognized inbound message"),
        }
    }
}

fn send(outbound: &mpsc::UnboundedSender<String>, message: &ClientMessage) {
    match serde_json::to_string(message) {
        Ok(text) => {
            // A closed channel means the driver is about to notice the close
            // and replay on the next open.
            let _ = outbound.send(text);
        }
        Err(e) => warn!(error = %e, "Failed to serialize control message"),
    }
}

/// Shared-connection subscription manager. Cheap to clone.
#[derive(Clone)]
pub struct ClientManager {
    shared: Arc<Shared>,
}

impl ClientManager {
    /// Create a manager. Nothing connects until the first topic is desired.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                bus: LocalEventBus::new(),
                state: Mutex::new(State {
                    desired: HashMap::new(),
                    phase: Phase::Disconnected,
                    outbound: None,
                    driver_running: false,
                }),
                idle: Notify::new(),
            }),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.shared.config.client_id
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    /// The bus inbound events are dispatched on.
    pub fn bus(&self) -> &LocalEventBus {
        &self.shared.bus
    }

    /// Desired topics, sorted.
    pub fn desired_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.shared.lock().desired.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Current reference count of `topic`.
    pub fn ref_count(&self, topic: &Topic) -> usize {
        self.shared.lock().desired.get(topic).copied().unwrap_or(0)
    }

    /// Express interest in `topic` until the returned handle is released.
    pub fn subscribe_to_topic(&self, topic: Topic) -> TopicSubscription {
        let mut state = self.shared.lock();
        let count = state.desired.entry(topic.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            debug!(%topic, "Topic desired");
            if let Some(outbound) = &state.outbound {
                send(outbound, &ClientMessage::subscribe(&topic));
            }
        }
        if !state.driver_running {
            state.driver_running = true;
            tokio::spawn(drive(Arc::clone(&self.shared)));
        }
        drop(state);

        TopicSubscription {
            shared: Arc::clone(&self.shared),
            topic,
            active: AtomicBool::new(true),
        }
    }

    /// Listen for one event kind.
    pub fn on_event<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(kind, listener)
    }

    /// Listen for every event kind.
    pub fn on_all_events<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.bus.subscribe_all(listener)
    }

    /// Listen for one event kind, skipping events this client caused.
    pub fn on_remote_event<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let client_id = self.shared.config.client_id.clone();
        self.shared.bus.subscribe(kind, skip_echoes(client_id, listener))
    }

    /// Listen for every event kind, skipping events this client caused.
    pub fn on_all_remote_events<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let client_id = self.shared.config.client_id.clone();
        self.shared.bus.subscribe_all(skip_echoes(client_id, listener))
    }
}

fn skip_echoes<F>(
    client_id: String,
    listener: F,
) -> impl Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
{
    move |event| {
        if is_echo(event, &client_id) {
            debug!(kind = %event.kind(), "Skipping echo of own write");
            return Ok(());
        }
        listener(event)
    }
}

/// Interest in one topic. Released by [`unsubscribe`](Self::unsubscribe) or
/// on drop.
#[must_use = "dropping a TopicSubscription releases the topic"]
pub struct TopicSubscription {
    shared: Arc<Shared>,
    topic: Topic,
    active: AtomicBool,
}

impl TopicSubscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Release this interest. Only the first call has an effect.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut state = self.shared.lock();
        let Some(count) = state.desired.get_mut(&self.topic) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        state.desired.remove(&self.topic);
        debug!(topic = %self.topic, "Topic released");
        if let Some(outbound) = &state.outbound {
            send(outbound, &ClientMessage::unsubscribe(&self.topic));
        }
        if state.desired.is_empty() {
            self.shared.idle.notify_one();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

enum Close {
    Remote,
    Idle,
}

async fn drive(shared: Arc<Shared>) {
    let mut backoff = Backoff::new(shared.config.reconnect);

    loop {
        {
            let mut state = shared.lock();
            if state.desired.is_empty() {
                state.phase = Phase::Disconnected;
                state.driver_running = false;
                debug!("No topics desired, connection driver stopped");
                return;
            }
            state.phase = Phase::Connecting;
        }

        let Connection {
            outgoing,
            mut incoming,
        } = match shared.connector.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(error = %e, attempt = backoff.attempt(), delay_ms = delay.as_millis() as u64, "Connection failed, retrying");
                shared.lock().phase = Phase::Closed;
                wait(&shared, delay).await;
                shared.lock().phase = Phase::Disconnected;
                continue;
            }
        };

        {
            let mut state = shared.lock();
            if state.desired.is_empty() {
                continue;
            }
            send(&outgoing, &ClientMessage::identify(&shared.config.client_id));
            let mut topics: Vec<&Topic> = state.desired.keys().collect();
            topics.sort();
            for topic in topics {
                send(&outgoing, &ClientMessage::subscribe(topic));
            }
            state.outbound = Some(outgoing);
            state.phase = Phase::Open;
            info!(
                client_id = %shared.config.client_id,
                topics = state.desired.len(),
                "Connection open, subscriptions replayed"
            );
        }
        backoff.reset();

        let close = loop {
            tokio::select! {
                message = incoming.recv() => match message {
                    Some(text) => shared.dispatch(&text),
                    None => break Close::Remote,
                },
                _ = shared.idle.notified() => {
                    if shared.lock().desired.is_empty() {
                        break Close::Idle;
                    }
                }
            }
        };

        {
            let mut state = shared.lock();
            state.outbound = None;
            state.phase = Phase::Closed;
        }

        match close {
            Close::Idle => debug!("Closing idle connection"),
            Close::Remote => {
                let delay = backoff.next_delay();
                warn!(attempt = backoff.attempt(), delay_ms = delay.as_millis() as u64, "Connection closed, reconnecting");
                wait(&shared, delay).await;
                shared.lock().phase = Phase::Disconnected;
            }
        }
    }
}

/// Sleep for `delay`, cut short if every topic is released meanwhile.
///
/// `idle` may hold a permit from a release that was already undone, so a
/// wake-up only ends the wait while the table is actually empty.
async fn wait(shared: &Shared, delay: std::time::Duration) {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return,
            _ = shared.idle.notified() => {
                if shared.lock().desired.is_empty() {
                    return;
                }
            }
        }
    }
}
