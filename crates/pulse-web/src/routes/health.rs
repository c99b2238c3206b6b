//! Health endpoint.

use axum::{extract::State, Json};
use pulse_redis::BridgeStats;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub connections: usize,
    /// `"standalone"` or `"broker"`.
    pub mode: &'static str,
    pub broker_listening: bool,
    pub broker: Option<BridgeStats>,
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    let bridge = state.bridge.as_deref();
    Json(Health {
        status: "ok",
        connections: state.hub.len(),
        mode: if bridge.is_some() { "broker" } else { "standalone" },
        broker_listening: bridge.is_some_and(|b| b.is_listening()),
        broker: bridge.map(|b| b.stats()),
    })
}
