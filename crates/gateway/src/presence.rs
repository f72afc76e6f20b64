use std::{collections::HashMap, time::Instant};

use tokio::sync::{RwLock, mpsc};

// ── Connection handle ────────────────────────────────────────────────────────

/// One live transport session bound to a verified user identity.
///
/// Cloning is cheap; every clone feeds the same write loop.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: String,
    pub user_id: String,
    /// Channel for sending serialized frames to this connection's write loop.
    sender: mpsc::UnboundedSender<String>,
    pub connected_at: Instant,
}

impl ConnectionHandle {
    pub fn new(user_id: impl Into<String>, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            conn_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            sender,
            connected_at: Instant::now(),
        }
    }

    /// Queue a serialized frame. Returns false once the write loop is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.conn_id == other.conn_id
    }
}

impl Eq for ConnectionHandle {}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Whether a register/deregister flipped the user's online state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    CameOnline,
    WentOffline,
    Unchanged,
}

/// user_id → live connections of that user.
///
/// A user id is present iff it has at least one live connection.
#[derive(Default)]
pub struct PresenceRegistry {
    users: RwLock<HashMap<String, HashMap<String, ConnectionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Registering the same conn_id twice is a no-op.
    pub async fn register(&self, conn: ConnectionHandle) -> PresenceTransition {
        let mut users = self.users.write().await;
        let conns = users.entry(conn.user_id.clone()).or_default();
        let was_offline = conns.is_empty();
        conns.entry(conn.conn_id.clone()).or_insert(conn);
        if was_offline {
            PresenceTransition::CameOnline
        } else {
            PresenceTransition::Unchanged
        }
    }

    /// Remove a connection, dropping the user entry when it was the last one.
    /// Unknown pairs are ignored so a double close is harmless.
    pub async fn deregister(&self, user_id: &str, conn_id: &str) -> PresenceTransition {
        let mut users = self.users.write().await;
        let Some(conns) = users.get_mut(user_id) else {
            return PresenceTransition::Unchanged;
        };
        if conns.remove(conn_id).is_none() {
            return PresenceTransition::Unchanged;
        }
        if conns.is_empty() {
            users.remove(user_id);
            PresenceTransition::WentOffline
        } else {
            PresenceTransition::Unchanged
        }
    }

    /// Snapshot of a user's live connections (possibly empty).
    pub async fn connections_for(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.users
            .read()
            .await
            .get(user_id)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every user with at least one live connection, sorted.
    pub async fn online_user_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.users.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn all_connections(&self) -> Vec<ConnectionHandle> {
        self.users
            .read()
            .await
            .values()
            .flat_map(|c| c.values().cloned())
            .collect()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.users.read().await.contains_key(user_id)
    }

    pub async fn online_count(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.users.read().await.values().map(HashMap::len).sum()
    }
}
