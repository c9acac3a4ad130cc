//! Websocket transport.
//!
//! One task per socket reads frames and feeds them to the lifecycle handler
//! in arrival order; a writer task drains the connection's outbound queue.
//! When the reader ends, for whatever reason, the handler sees a disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::api::AppState;
use crate::connection::ConnectionHandle;
use crate::lifecycle::LifecycleHandler;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let lifecycle = state.lifecycle.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, lifecycle))
}

async fn handle_socket(socket: WebSocket, lifecycle: Arc<LifecycleHandler>) {
    let (mut sink, mut stream) = socket.split();
    let (conn, mut outbound) = ConnectionHandle::new();
    lifecycle.on_connect(&conn);

    let conn_id = conn.id();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match event.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!(conn = %conn_id.short(), event = event.name(), error = %e, "Dropping unencodable event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => lifecycle.handle_frame(&conn, &text).await,
            Ok(WsMessage::Binary(bytes)) => lifecycle.handle_binary_frame(&conn, bytes.len()),
            Ok(WsMessage::Close(_)) => break,
            // Ping/pong are answered by axum.
            Ok(_) => {}
            Err(e) => {
                debug!(conn = %conn_id.short(), error = %e, "Websocket read failed");
                break;
            }
        }
    }

    lifecycle.on_disconnect(&conn).await;
    // The socket is gone; anything still queued has nowhere to go.
    writer.abort();
}
