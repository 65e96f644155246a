//! WebSocket endpoint for parameter streaming.
//!
//! Each client gets its own bridge: session snapshots flow out as JSON text
//! frames, and inbound JSON `StreamUpdate` frames are applied to the device.
//! Malformed inbound frames are logged and skipped; the stream ends when the
//! client closes or an update fails to apply.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::bridge::{self, StreamUpdate};
use crate::server::AppState;
use crate::session::SessionState;

/// WebSocket upgrade handler.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, receiver) = socket.split();
    info!("parameter stream client connected");

    let (snapshot_tx, mut snapshot_rx) = mpsc::channel::<SessionState>(16);
    let forward = tokio::spawn(async move {
        while let Some(snapshot) = snapshot_rx.recv().await {
            let Ok(json) = serde_json::to_string(&snapshot) else {
                continue;
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let inbound = receiver.filter_map(|message| async move {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<StreamUpdate>(text.as_str()) {
                Ok(update) => Some(update),
                Err(error) => {
                    warn!(%error, "ignoring malformed stream update");
                    None
                }
            },
            // pings are answered at the protocol layer; close ends the
            // underlying stream on the next poll
            _ => None,
        }
    });

    let result = bridge::run(state.session.clone(), Box::pin(inbound), snapshot_tx).await;
    match result {
        Ok(()) => info!("parameter stream client disconnected"),
        Err(error) => warn!(%error, "parameter stream aborted"),
    }

    // the bridge dropped its sender, so the forward task is draining out
    let _ = forward.await;
}
