//! WebSocket endpoint: one peer per connection, envelope dispatch.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use sandbox_core::{Envelope, Peer};
use tokio::sync::mpsc;

use crate::session::Session;

/// WebSocket upgrade handler. Mount on `GET /ws` with `Arc<Session>` state.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(session): State<Arc<Session>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session))
}

async fn handle_socket(socket: WebSocket, session: Arc<Session>) {
    let (mut sender, mut receiver) = socket.split();

    // the peer's outbound queue; every registry broadcast lands here
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let peer = Peer::new(tx);
    let peer_id = peer.id();
    tracing::info!(peer = %peer_id, "websocket connected");

    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(err) => {
                    tracing::error!(%err, "failed to serialize envelope");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(peer = %peer_id, %err, "websocket error");
                break;
            }
        };

        // malformed envelopes are dropped, never fatal
        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(peer = %peer_id, %err, "malformed envelope dropped");
                continue;
            }
        };

        session.handle_envelope(&peer, &envelope);
    }

    session.handle_disconnect(peer_id);
    send_task.abort();
    tracing::info!(peer = %peer_id, "websocket disconnected");
}

/// Router with the `/ws` route mounted.
#[must_use]
pub fn ws_router(session: Arc<Session>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(session)
}
