//! WebSocket subscriber protocol

use ab_bench_core::{ClientMessage, ConnectionId, ServerMessage, SessionController};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

/// Serve one subscriber connection until it closes
pub async fn handle_socket(socket: WebSocket, controller: SessionController) {
    let connection_id = controller.broadcaster().next_connection_id();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    tracing::debug!(connection_id, "Subscriber connected");

    let forward = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode server message");
                    continue;
                }
            };
            if ws_tx.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(connection_id, error = %e, "WebSocket error");
                break;
            }
        };
        if frame.is_close() {
            break;
        }
        // Pings are answered by warp, binary frames are not part of the protocol
        let Ok(text) = frame.to_str() else {
            continue;
        };
        handle_client_message(&controller, connection_id, &tx, text);
    }

    let dropped = controller.drop_connection(connection_id);
    tracing::debug!(connection_id, dropped, "Subscriber disconnected");
    drop(tx);
    let _ = forward.await;
}

/// Apply one client frame
pub(crate) fn handle_client_message(
    controller: &SessionController,
    connection_id: ConnectionId,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    text: &str,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { session_id }) => {
            if let Err(e) = controller.subscribe(&session_id, connection_id, tx.clone()) {
                let _ = tx.send(ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        }
        Ok(ClientMessage::Disconnect { session_id, reason }) => {
            let removed = controller.unsubscribe(&session_id, connection_id);
            tracing::debug!(
                connection_id,
                session_id = %session_id,
                reason = reason.as_deref().unwrap_or("none"),
                removed,
                "Subscriber left session"
            );
        }
        Err(e) => {
            let _ = tx.send(ServerMessage::Error {
                message: format!("invalid message: {e}"),
            });
        }
    }
}
