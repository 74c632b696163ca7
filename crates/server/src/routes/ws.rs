// crates/server/src/routes/ws.rs
//! WebSocket endpoint for job start/resume.
//!
//! - `WS /ws` - every text frame is a control message (`start`, `resume`,
//!   or raw FASTA); every outbound frame is one JSON job event.
//!
//! Inbound frames go to a [`ConnectionSession`]. Outbound events are queued
//! on the connection's channel by the broker and written to the socket by a
//! dedicated forwarder task outside the broker lock. A client that stops
//! reading is closed once its backlog reaches the broker's outbound limit.

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use seqrelay_broker::ConnectionSession;
use tracing::{debug, info};

use crate::metrics::record_ws_connection;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (handle, mut rx) = state.broker.connect();
    let conn = handle.id();
    let mut session = ConnectionSession::new(state.broker.clone(), Arc::clone(&state.runner), handle);
    record_ws_connection(true);
    info!(conn = %conn, "websocket connected");

    let mut forward_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if sink.send(Message::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // Ping/Pong are handled by axum; binary frames are ignored
                }
                Some(Err(e)) => {
                    debug!(conn = %conn, error = %e, "websocket read failed");
                    break;
                }
            },
            _ = &mut forward_task => {
                debug!(conn = %conn, "websocket write side closed");
                break;
            }
        }
    }

    // Dropping the session detaches the connection from every job.
    drop(session);
    forward_task.abort();
    record_ws_connection(false);
    info!(conn = %conn, "websocket disconnected");
}
