use std::{sync::Arc, time::Duration};

use {
    dashmap::DashMap,
    tokio::sync::{Mutex, Notify, OwnedMutexGuard, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use {
    murmur_config::MurmurConfig,
    murmur_metrics::{CONNECTIONS_ACTIVE, ONLINE_USERS, gauge},
    murmur_protocol::{OnlineUsersPayload, OutboundEvent},
    murmur_store::ConversationStore,
};

use crate::{
    auth::ResolvedAuth,
    broadcast::push,
    directory::UserDirectory,
    presence::{ConnectionHandle, PresenceRegistry, PresenceTransition},
};

// ── Options ──────────────────────────────────────────────────────────────────

/// Runtime knobs taken from config.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub max_text_chars: usize,
    pub presence_coalesce: Duration,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self::from_config(&MurmurConfig::default())
    }
}

impl GatewayOptions {
    pub fn from_config(config: &MurmurConfig) -> Self {
        Self {
            max_text_chars: config.messages.max_text_chars,
            presence_coalesce: Duration::from_millis(config.presence.coalesce_ms),
            ping_interval: Duration::from_secs(config.server.ping_interval_secs.max(1)),
            idle_timeout: Duration::from_secs(config.server.idle_timeout_secs.max(1)),
        }
    }
}

// ── Per-conversation ordering ────────────────────────────────────────────────

/// Exclusive write turn on one conversation. Released on drop; the lock entry
/// is pruned once nobody else is waiting on it.
pub struct ConversationTurn<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    conversation_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationTurn<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across connection tasks.
pub struct GatewayState {
    /// Live connections per user.
    pub presence: PresenceRegistry,
    pub store: Arc<dyn ConversationStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub auth: ResolvedAuth,
    pub options: GatewayOptions,
    /// Server version string.
    pub version: String,
    /// Cancelled at shutdown; connection tasks and the broadcaster watch it.
    pub shutdown: CancellationToken,
    ordering: DashMap<String, Arc<Mutex<()>>>,
    presence_changed: Notify,
}

impl GatewayState {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        directory: Arc<dyn UserDirectory>,
        auth: ResolvedAuth,
        options: GatewayOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            presence: PresenceRegistry::new(),
            store,
            directory,
            auth,
            options,
            version: env!("CARGO_PKG_VERSION").to_string(),
            shutdown: CancellationToken::new(),
            ordering: DashMap::new(),
            presence_changed: Notify::new(),
        })
    }

    /// Bind a new transport session to `user_id` and register it.
    ///
    /// The new connection is sent the current online set straight away; a
    /// presence broadcast is requested only when the user just came online.
    pub async fn on_connect(
        &self,
        user_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) -> ConnectionHandle {
        let conn = ConnectionHandle::new(user_id, sender);
        let transition = self.presence.register(conn.clone()).await;
        info!(conn_id = %conn.conn_id, user_id, ?transition, "connection opened");
        self.record_presence_gauges().await;
        if transition == PresenceTransition::CameOnline {
            self.signal_presence_changed();
        }

        let snapshot = OutboundEvent::OnlineUsers(OnlineUsersPayload {
            user_ids: self.presence.online_user_ids().await,
        });
        push(self, &conn, &snapshot).await;
        conn
    }

    /// Deregister a connection. Safe to call more than once.
    pub async fn on_disconnect(&self, conn: &ConnectionHandle) {
        let transition = self
            .presence
            .deregister(&conn.user_id, &conn.conn_id)
            .await;
        if transition == PresenceTransition::WentOffline {
            info!(conn_id = %conn.conn_id, user_id = %conn.user_id, "user went offline");
            self.signal_presence_changed();
        }
        self.record_presence_gauges().await;
    }

    /// Ask the presence broadcaster for a fresh `online-users` round.
    pub fn signal_presence_changed(&self) {
        self.presence_changed.notify_one();
    }

    /// Wait until a presence transition has been signalled.
    pub(crate) async fn presence_changed(&self) {
        self.presence_changed.notified().await;
    }

    /// Serialize writes to one conversation. Turns on different conversations
    /// never contend.
    pub async fn lock_conversation(&self, conversation_id: &str) -> ConversationTurn<'_> {
        let lock = Arc::clone(
            self.ordering
                .entry(conversation_id.to_string())
                .or_default()
                .value(),
        );
        let guard = lock.lock_owned().await;
        ConversationTurn {
            locks: &self.ordering,
            conversation_id: conversation_id.to_string(),
            guard: Some(guard),
        }
    }

    async fn record_presence_gauges(&self) {
        gauge!(CONNECTIONS_ACTIVE).set(self.presence.connection_count().await as f64);
        gauge!(ONLINE_USERS).set(self.presence.online_count().await as f64);
    }
}
