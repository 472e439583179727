//! WebSocket Transport Handler
//!
//! Each text frame is a Bayeux message batch; each handled batch yields one
//! reply frame. Batches run concurrently so a suspended connect never holds
//! back a publish or subscribe sent on the same socket.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::application::services::{BayeuxService, TransportContext};
use crate::domain::entities::{Message, MessageBatch};
use crate::presentation::http::extractors::BrowserCookie;
use crate::startup::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    browser: BrowserCookie,
) -> Response {
    let ctx = TransportContext::websocket(browser.browser_id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, ctx))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, ctx: TransportContext) {
    let connection_id = Uuid::new_v4().simple().to_string();
    tracing::debug!(connection_id = %connection_id, "New WebSocket connection");

    // Split socket for concurrent read/write
    let (mut sender, mut receiver) = socket.split();

    // Channel for outgoing reply batches
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Message>>();

    // Spawn task to forward reply batches to the socket
    let sender_task = tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            let text = match serde_json::to_string(&batch) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("Failed to serialize reply batch: {}", e);
                    continue;
                }
            };
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let ctx = Arc::new(ctx);
    let mut batches = JoinSet::new();

    // Main message loop
    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let batch = match serde_json::from_str::<MessageBatch>(text.as_str()) {
                            Ok(batch) => batch.into_vec(),
                            Err(e) => {
                                tracing::debug!(
                                    connection_id = %connection_id,
                                    error = %e,
                                    "Malformed frame"
                                );
                                continue;
                            }
                        };

                        let server = state.server.clone();
                        let ctx = ctx.clone();
                        let tx = tx.clone();
                        batches.spawn(async move {
                            let replies = server.handle(batch, &ctx).await;
                            let _ = tx.send(replies);
                        });
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::debug!(connection_id = %connection_id, "Connection closed");
                        break;
                    }
                    Some(Ok(WsMessage::Ping(_))) => {
                        // Pong is handled automatically by axum
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }

            Some(finished) = batches.join_next() => {
                if let Err(e) = finished {
                    tracing::error!(connection_id = %connection_id, error = %e, "Batch task failed");
                }
            }
        }
    }

    // Cleanup: dropping in-flight batches disarms their suspended connects;
    // the sessions themselves expire through the sweeper.
    batches.abort_all();
    sender_task.abort();

    tracing::debug!(connection_id = %connection_id, "WebSocket connection finished");
}
