//! Registry of authenticated live-socket sessions.
//!
//! Two independent maps: `user -> connection` for delivery and
//! `connection -> user` for cleanup on disconnect. A user holds at most one
//! registered connection; a second handshake replaces the mapping but leaves
//! the earlier socket open.

use async_trait::async_trait;
use dashmap::DashMap;
use notifier_platform::auth::TokenVerifier;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// WebSocket close code 1003, sent when the handshake token is refused.
pub const CLOSE_NOT_ACCEPTABLE: u16 = 1003;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}

/// One duplex client connection, as seen by the registry.
#[async_trait]
pub trait LiveConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> Result<(), ConnectionError>;

    async fn close(&self, code: u16, reason: &str);
}

pub struct ConnectionRegistry {
    verifier: TokenVerifier,
    sessions: DashMap<Uuid, Arc<dyn LiveConnection>>,
    owners: DashMap<ConnectionId, Uuid>,
}

impl ConnectionRegistry {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self {
            verifier,
            sessions: DashMap::new(),
            owners: DashMap::new(),
        }
    }

    /// Authenticates a freshly opened connection from its `token` query value.
    ///
    /// On any failure the connection is closed with [`CLOSE_NOT_ACCEPTABLE`]
    /// and nothing is registered.
    pub async fn handshake(
        &self,
        connection: Arc<dyn LiveConnection>,
        token: Option<&str>,
    ) -> Option<Uuid> {
        let id = connection.id();
        let user_id = match self.authenticate(token) {
            Ok(user_id) => user_id,
            Err(reason) => {
                warn!(connection = %id, reason, "Rejecting live connection");
                metrics::counter!("live.handshakes", "result" => "rejected").increment(1);
                connection.close(CLOSE_NOT_ACCEPTABLE, reason).await;
                return None;
            }
        };

        if let Some(previous) = self.sessions.insert(user_id, connection) {
            debug!(
                user_id = %user_id,
                previous = %previous.id(),
                "Replacing existing session mapping"
            );
        }
        self.owners.insert(id, user_id);

        info!(user_id = %user_id, connection = %id, "Live connection authenticated");
        metrics::counter!("live.handshakes", "result" => "accepted").increment(1);
        metrics::gauge!("live.sessions").set(self.sessions.len() as f64);
        Some(user_id)
    }

    fn authenticate(&self, token: Option<&str>) -> Result<Uuid, &'static str> {
        let token = token.filter(|t| !t.is_empty()).ok_or("missing token")?;
        let claims = self.verifier.verify(token).map_err(|e| {
            debug!(error = %e, "Token verification failed");
            "invalid token"
        })?;
        match claims.user_uuid() {
            Some(Ok(user_id)) => Ok(user_id),
            Some(Err(_)) => Err("userId claim is not a UUID"),
            None => Err("missing userId claim"),
        }
    }

    /// Forgets a closed connection. The user mapping is removed only while it
    /// still points at this connection. Unknown connections are ignored.
    pub fn disconnect(&self, id: ConnectionId) -> Option<Uuid> {
        let (_, user_id) = self.owners.remove(&id)?;
        self.sessions
            .remove_if(&user_id, |_, conn| conn.id() == id);
        info!(user_id = %user_id, connection = %id, "Live connection closed");
        metrics::gauge!("live.sessions").set(self.sessions.len() as f64);
        Some(user_id)
    }

    /// Sends to the user's open session. Returns false (and logs) when there
    /// is none or the send fails.
    pub async fn send_to_user(&self, user_id: Uuid, text: &str) -> bool {
        let connection = self.sessions.get(&user_id).map(|c| c.value().clone());
        match connection {
            Some(conn) if conn.is_open() => match conn.send_text(text.to_string()).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(user_id = %user_id, connection = %conn.id(), error = %e, "Failed to send to user");
                    false
                }
            },
            _ => {
                warn!(user_id = %user_id, "No open session for user, message dropped");
                false
            }
        }
    }

    /// Sends to every registered open connection; returns how many accepted it.
    pub async fn broadcast(&self, text: &str) -> usize {
        let targets: Vec<Arc<dyn LiveConnection>> = self
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .filter(|c| c.is_open())
            .collect();

        let mut delivered = 0;
        for conn in targets {
            match conn.send_text(text.to_string()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(connection = %conn.id(), error = %e, "Broadcast send failed"),
            }
        }
        delivered
    }

    pub fn user_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.owners.len()
    }

    pub fn is_connected(&self, user_id: Uuid) -> bool {
        self.sessions.get(&user_id).is_some_and(|c| c.is_open())
    }
}
