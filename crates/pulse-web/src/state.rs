//! Application state.

use std::sync::Arc;

use pulse_core::{Broadcaster, LocalEventBus, StreamOptions, Subscription};
use pulse_redis::BrokerBridge;

use crate::hub::ConnectionHub;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub bus: LocalEventBus,
    pub broadcaster: Broadcaster,
    pub hub: Arc<ConnectionHub>,
    pub bridge: Option<Arc<BrokerBridge>>,
    pub stream_options: StreamOptions,
    /// Keeps the hub's bus listener registered for the life of the server.
    _fanout: Arc<Subscription>,
}

impl AppState {
    pub fn new(
        bus: LocalEventBus,
        bridge: Option<Arc<BrokerBridge>>,
        stream_options: StreamOptions,
    ) -> Self {
        let hub = ConnectionHub::new();
        let fanout = hub.attach(&bus);
        Self {
            broadcaster: Broadcaster::new(bus.clone()),
            bus,
            hub,
            bridge,
            stream_options,
            _fanout: Arc::new(fanout),
        }
    }
}
