/// Config schema types (server, auth, store, presence, messages, users).
use serde::{Deserialize, Serialize};

use murmur_protocol::{
    DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_TEXT_CHARS, DEFAULT_PING_INTERVAL_SECS,
    DEFAULT_PRESENCE_COALESCE_MS,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MurmurConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub store: StoreConfig,
    pub presence: PresenceConfig,
    pub messages: MessagesConfig,
    pub users: UsersConfig,
}

/// HTTP / WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Interval between WebSocket pings sent by the gateway.
    pub ping_interval_secs: u64,
    /// A connection with no inbound traffic (pongs included) for this long is closed.
    pub idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 18790,
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

/// Identity verification. Tokens are issued elsewhere; the gateway only checks them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the token issuer. When unset, `MURMUR_JWT_SECRET`
    /// and then `JWT_SECRET` are read from the environment.
    pub jwt_secret: Option<String>,
    /// Cookie carrying the token for browser clients.
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            cookie_name: "jwt".into(),
        }
    }
}

impl AuthConfig {
    pub fn resolve_secret(&self) -> Option<String> {
        self.jwt_secret
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("MURMUR_JWT_SECRET").ok())
            .or_else(|| std::env::var("JWT_SECRET").ok())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// sqlx connection URL. Defaults to `murmur.db` under the data directory.
    pub database_url: Option<String>,
    /// Keep everything in process memory (development only).
    pub in_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Window over which presence transitions are folded into one broadcast.
    pub coalesce_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            coalesce_ms: DEFAULT_PRESENCE_COALESCE_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    pub max_text_chars: usize,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersConfig {
    /// Known recipient ids. Empty means any non-blank id is accepted.
    pub known: Vec<String>,
}
