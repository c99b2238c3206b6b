//! Broker bridge.
//!
//! Mirrors every event published on the local bus to a shared broker channel
//! and re-injects events published by other instances into the local bus.
//!
//! ```text
//! bus.publish ──► mirror ──► publisher task ──► broker channel (pulse:events:v1)
//!                                                     │
//! bus.publish_local ◄── listener task ◄───────────────┘ (other instances only)
//! ```
//!
//! Broker faults never reach the caller of `publish`: local delivery has
//! already happened, the failure is logged, and the event simply does not
//! cross processes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use pulse_core::config::BrokerSettings;
use pulse_core::{Event, EventMirror, LocalEventBus};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{BrokerResult, RedisTransport};
use crate::transport::BrokerTransport;

/// Wire form of a mirrored event.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    /// Instance id of the publishing process.
    source: String,
    published_at: DateTime<Utc>,
    event: Event,
}

/// Bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Versioned channel name shared by every compatible instance.
    pub channel: String,
    /// Unique id of this process, used to skip our own messages.
    pub instance_id: String,
    /// First delay before re-subscribing after the inbound link drops.
    pub resubscribe_delay: Duration,
    /// Ceiling for the re-subscribe delay.
    pub max_resubscribe_delay: Duration,
}

impl BridgeConfig {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            resubscribe_delay: Duration::from_millis(500),
            max_resubscribe_delay: Duration::from_secs(30),
        }
    }

    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self::new(settings.channel())
    }
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    failed: AtomicU64,
    received: AtomicU64,
}

/// Snapshot of bridge activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub published: u64,
    pub failed: u64,
    pub received: u64,
}

/// Connects one [`LocalEventBus`] to a shared broker channel.
pub struct BrokerBridge {
    config: BridgeConfig,
    outbound: mpsc::UnboundedSender<Event>,
    listening: watch::Receiver<bool>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
}

impl BrokerBridge {
    /// Attach a bridge to `bus` over `transport`.
    ///
    /// Installs the bridge as the bus mirror and starts the publisher and
    /// listener tasks. Must be called from within a Tokio runtime.
    pub fn attach(
        bus: &LocalEventBus,
        transport: Arc<dyn BrokerTransport>,
        config: BridgeConfig,
    ) -> Arc<Self> {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (listening_tx, listening) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let shutdown = CancellationToken::new();

        tokio::spawn(run_publisher(
            Arc::clone(&transport),
            config.clone(),
            rx,
            Arc::clone(&counters),
            shutdown.clone(),
        ));
        tokio::spawn(run_listener(
            bus.clone(),
            transport,
            config.clone(),
            listening_tx,
            Arc::clone(&counters),
            shutdown.clone(),
        ));

        info!(
            channel = %config.channel,
            instance_id = %config.instance_id,
            "Broker bridge attached"
        );

        let bridge = Arc::new(Self {
            config,
            outbound,
            listening,
            counters,
            shutdown,
        });
        bus.set_mirror(&bridge);
        bridge
    }

    /// Attach a Redis-backed bridge when `settings` names a broker.
    ///
    /// Returns `Ok(None)` in single-process mode. Connections are opened
    /// lazily, so an unreachable broker does not fail startup.
    pub fn connect(
        bus: &LocalEventBus,
        settings: &BrokerSettings,
    ) -> BrokerResult<Option<Arc<Self>>> {
        let Some(url) = settings.url.as_deref() else {
            info!("No broker configured, running in single-process mode");
            return Ok(None);
        };
        let transport = Arc::new(RedisTransport::open(url)?);
        Ok(Some(Self::attach(
            bus,
            transport,
            BridgeConfig::from_settings(settings),
        )))
    }

    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    /// Whether the inbound subscription is currently established.
    pub fn is_listening(&self) -> bool {
        *self.listening.borrow()
    }

    /// Wait until the inbound subscription is established.
    pub async fn wait_until_listening(&self) {
        let mut listening = self.listening.clone();
        let _ = listening.wait_for(|up| *up).await;
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            published: self.counters.published.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
        }
    }

    /// Stop the publisher and listener tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl EventMirror for BrokerBridge {
    fn mirror(&self, event: &Event) {
        if self.outbound.send(event.clone()).is_err() {
            debug!(kind = %event.kind(), "Broker publisher stopped, event stays local");
        }
    }
}

impl Drop for BrokerBridge {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_publisher(
    transport: Arc<dyn BrokerTransport>,
    config: BridgeConfig,
    mut rx: mpsc::UnboundedReceiver<Event>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let kind = event.kind();
        let envelope = Envelope {
            source: config.instance_id.clone(),
            published_at: Utc::now(),
            event,
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%kind, error = %e, "Failed to encode event for broker");
                continue;
            }
        };

        match transport.publish(&config.channel, payload).await {
            Ok(()) => {
                counters.published.fetch_add(1, Ordering::Relaxed);
                debug!(%kind, channel = %config.channel, "Event mirrored to broker");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(%kind, error = %e, "Broker publish failed, event delivered locally only");
            }
        }
    }
    debug!("Broker publisher stopped");
}

async fn run_listener(
    bus: LocalEventBus,
    transport: Arc<dyn BrokerTransport>,
    config: BridgeConfig,
    listening: watch::Sender<bool>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
) {
    let mut delay = config.resubscribe_delay;

    while !shutdown.is_cancelled() {
        match transport.subscribe(&config.channel).await {
            Ok(mut messages) => {
                delay = config.resubscribe_delay;
                let _ = listening.send(true);
                info!(channel = %config.channel, "Listening for broker events");

                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            let _ = listening.send(false);
                            return;
                        }
                        message = messages.next() => match message {
                            Some(payload) => reinject(&bus, &config, &counters, &payload),
                            None => break,
                        },
                    }
                }

                let _ = listening.send(false);
                warn!(channel = %config.channel, "Broker subscription lost");
            }
            Err(e) => {
                warn!(
                    channel = %config.channel,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Broker subscribe failed"
                );
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(config.max_resubscribe_delay);
    }
    debug!("Broker listener stopped");
}

fn reinject(bus: &LocalEventBus, config: &BridgeConfig, counters: &Counters, payload: &str) {
    let envelope: Envelope = match serde_json::from_str(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "Dropping undecodable broker message");
            return;
        }
    };
    if envelope.source == config.instance_id {
        return;
    }

    counters.received.fetch_add(1, Ordering::Relaxed);
    let lag_ms = (Utc::now() - envelope.published_at).num_milliseconds();
    debug!(
        kind = %envelope.event.kind(),
        source = %envelope.source,
        lag_ms,
        "Re-injecting broker event"
    );
    bus.publish_local(envelope.event);
}
