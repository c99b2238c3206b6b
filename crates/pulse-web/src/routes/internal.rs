//! Internal publish endpoint for out-of-process writers.

use axum::{extract::State, http::StatusCode, Json};
use pulse_core::Event;
use tracing::info;

use crate::state::AppState;

/// Receive an event and publish it on the bus.
///
/// Always accepts a well-formed event; delivery happens asynchronously.
pub async fn publish(State(state): State<AppState>, Json(event): Json<Event>) -> StatusCode {
    info!(kind = %event.kind(), origin = ?event.origin, "Received event over HTTP, broadcasting");
    state.broadcaster.broadcast(event);
    StatusCode::ACCEPTED
}
