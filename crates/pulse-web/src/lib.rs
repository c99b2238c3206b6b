//! Pulse Web Server
//!
//! Axum server for realtime fan-out: the `/ws` socket endpoint, the `/events`
//! server-sent events stream, and the internal publish endpoint.

pub mod hub;
pub mod routes;
pub mod state;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use pulse_core::{LocalEventBus, PulseConfig};
use pulse_redis::BrokerBridge;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route("/events", get(routes::events::stream_events))
        .route("/health", get(routes::health::health))
        .route("/internal/publish", post(routes::internal::publish))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Build the bus, attach the broker bridge if configured, and serve until
/// Ctrl+C.
pub async fn run_server(config: PulseConfig) -> anyhow::Result<()> {
    let bus = LocalEventBus::new();
    let bridge = BrokerBridge::connect(&bus, &config.broker)?;
    let state = AppState::new(bus, bridge.clone(), config.stream.options());
    let app = create_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(bridge) = bridge {
        bridge.shutdown();
    }
    tracing::info!("Web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
