//! WebSocket handler for real-time updates.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use pulse_core::ClientMessage;
use tracing::{debug, info};

use crate::state::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle individual WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut rx) = state.hub.register();

    info!(connection_id = id, connections = state.hub.len(), "WebSocket client connected");

    // Forward events routed to this connection
    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sender
                .send(Message::Text(payload.to_string().into()))
                .await
                .is_err()
            {
                debug!(connection_id = id, "WebSocket send failed, client disconnected");
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Apply control messages from the client
    let hub = state.hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match ClientMessage::parse(text.as_str()) {
                    Some(message) => hub.apply(id, message),
                    None => debug!(connection_id = id, "Ignoring malformed control message"),
                },
                Message::Close(_) => {
                    debug!(connection_id = id, "WebSocket client sent close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    // Whichever side ends first, the connection leaves the hub. Removing it
    // drops the outbound sender, so the writer drains and closes the socket.
    tokio::select! {
        _ = &mut recv_task => {
            state.hub.remove(id);
            let _ = send_task.await;
        }
        _ = &mut send_task => {
            state.hub.remove(id);
            recv_task.abort();
        }
    }

    info!(connection_id = id, connections = state.hub.len(), "WebSocket client disconnected");
}
