//! WebSocket connection handling.
//!
//! One task pair per connection: a writer draining the outbound channel the
//! router sends into, and the read loop parsing text frames into
//! [`ClientEvent`]s. Malformed frames are dropped with a log; they never
//! reach the router and never abort the connection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::http::AppState;
use crate::protocol::ClientEvent;
use crate::router::RouterHandle;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.router))
}

async fn handle_socket(socket: WebSocket, router: RouterHandle) {
    let conn_id = Uuid::new_v4();
    info!(%conn_id, "websocket connected");

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    router.register(conn_id, outbound_tx);

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(%conn_id, error = %e, "failed to serialize server event");
                    continue;
                }
            };
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => router.event(conn_id, event),
                Err(e) => debug!(%conn_id, error = %e, "dropping malformed frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong handled by axum, binary frames ignored
            Err(e) => {
                debug!(%conn_id, error = %e, "websocket read error");
                break;
            }
        }
    }

    info!(%conn_id, "websocket closed");
    router.connection_closed(conn_id);
    writer.abort();
}
