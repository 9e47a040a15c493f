//! Live notification socket: `GET /ws/notifications?token=<jwt>`.
//!
//! Each upgraded socket is split into a writer task fed by a bounded queue and
//! a read loop. The queue side is what the connection registry holds.

use crate::rest::AppState;
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use notifier_channels::connections::ConnectionError;
use notifier_channels::{ConnectionId, ConnectionRegistry, LiveConnection};
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let registry = state.connections.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, query.token, registry))
}

/// Registry-facing half of an upgraded socket.
pub struct SocketConnection {
    id: ConnectionId,
    open: AtomicBool,
    tx: mpsc::Sender<Message>,
}

impl SocketConnection {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: ConnectionId::generate(),
            open: AtomicBool::new(true),
            tx,
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

#[async_trait]
impl LiveConnection for SocketConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        self.tx
            .send(Message::Text(text))
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    async fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::AcqRel) {
            let frame = CloseFrame {
                code,
                reason: Cow::Owned(reason.to_string()),
            };
            let _ = self.tx.send(Message::Close(Some(frame))).await;
        }
    }
}

async fn handle_socket(
    socket: WebSocket,
    token: Option<String>,
    registry: Arc<ConnectionRegistry>,
) {
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    let connection = Arc::new(SocketConnection::new(tx));
    let conn_id = connection.id();
    info!(%conn_id, "New live socket connection");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = sink.send(msg).await {
                debug!(%conn_id, error = %e, "Live socket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    if registry
        .handshake(connection.clone(), token.as_deref())
        .await
        .is_none()
    {
        // The close frame is already queued; let the writer flush it.
        drop(connection);
        let _ = writer.await;
        return;
    }

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                debug!(%conn_id, len = text.len(), "Live socket message received");
                if connection.send_text(format!("Echo: {text}")).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!(%conn_id, "Live socket close requested");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(%conn_id, error = %e, "Live socket transport error");
                break;
            }
        }
    }

    connection.mark_closed();
    registry.disconnect(conn_id);
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifier_channels::connections::CLOSE_NOT_ACCEPTABLE;

    #[tokio::test]
    async fn test_send_text_is_queued_for_writer() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = SocketConnection::new(tx);

        conn.send_text("hello".into()).await.unwrap();
        assert!(matches!(rx.recv().await, Some(Message::Text(t)) if t == "hello"));
    }

    #[tokio::test]
    async fn test_close_sends_frame_once_and_blocks_sends() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = SocketConnection::new(tx);

        conn.close(CLOSE_NOT_ACCEPTABLE, "invalid token").await;
        conn.close(CLOSE_NOT_ACCEPTABLE, "invalid token").await;
        assert!(!conn.is_open());

        match rx.recv().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, CLOSE_NOT_ACCEPTABLE);
                assert_eq!(frame.reason, "invalid token");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            conn.send_text("late".into()).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_dropped_writer_reads_as_closed() {
        let (tx, rx) = mpsc::channel(4);
        let conn = SocketConnection::new(tx);
        drop(rx);
        assert!(!conn.is_open());
    }
}
