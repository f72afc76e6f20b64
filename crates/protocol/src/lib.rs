//! Wire protocol shared by the gateway, the REST surface and clients.
//!
//! Every realtime frame is a JSON text frame of the form
//! `{"event": "<name>", "data": <payload>}`. Event names are stable across
//! implementations; payload fields are camelCase.

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest inbound text frame the gateway will parse.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Default upper bound on message text length, in characters.
pub const DEFAULT_MAX_TEXT_CHARS: usize = 4000;

pub const DEFAULT_PING_INTERVAL_SECS: u64 = 25;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PRESENCE_COALESCE_MS: u64 = 50;

// ── Data model ───────────────────────────────────────────────────────────────

/// A persisted chat message. Immutable after creation except `seen`, which
/// only ever moves from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    pub seen: bool,
    /// Epoch milliseconds.
    pub created_at: u64,
}

/// Denormalized summary of the newest message in a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    pub sender_id: String,
    pub seen: bool,
}

impl From<&Message> for LastMessage {
    fn from(m: &Message) -> Self {
        Self {
            text: m.text.clone(),
            sender_id: m.sender_id.clone(),
            seen: m.seen,
        }
    }
}

/// The durable unit grouping every message between exactly two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    /// Always two ids, sorted, so the pair is unordered.
    pub participant_ids: [String; 2],
    pub last_message: LastMessage,
    /// Epoch milliseconds of the last write.
    pub updated_at: u64,
}

impl Conversation {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant_ids.iter().any(|p| p == user_id)
    }

    /// The participant that is not `user_id`. `None` if `user_id` is not a
    /// participant.
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        let [a, b] = &self.participant_ids;
        if a == user_id {
            Some(b)
        } else if b == user_id {
            Some(a)
        } else {
            None
        }
    }
}

/// Sort two user ids into the canonical participant order.
pub fn participant_pair(a: &str, b: &str) -> [String; 2] {
    if a <= b {
        [a.to_string(), b.to_string()]
    } else {
        [b.to_string(), a.to_string()]
    }
}

// ── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageParams {
    pub recipient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    /// Client-chosen correlation token echoed on `message-sent` / `error`.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSeenParams {
    pub conversation_id: String,
    /// Informational only; the gateway uses the identity bound to the
    /// connection and drops events where the two disagree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<String>,
}

/// Client → gateway events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundEvent {
    SendMessage(SendMessageParams),
    MarkSeen(MarkSeenParams),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesSeenPayload {
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsersPayload {
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSentPayload {
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub error: ErrorShape,
}

/// Gateway → client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundEvent {
    NewMessage(Message),
    MessagesSeen(MessagesSeenPayload),
    OnlineUsers(OnlineUsersPayload),
    MessageSent(MessageSentPayload),
    Error(ErrorPayload),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new-message",
            Self::MessagesSeen(_) => "messages-seen",
            Self::OnlineUsers(_) => "online-users",
            Self::MessageSent(_) => "message-sent",
            Self::Error(_) => "error",
        }
    }

    /// Serialize into a text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the {MAX_PAYLOAD_BYTES} byte limit")]
    TooLarge(usize),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Parse an inbound text frame.
pub fn decode_inbound(text: &str) -> Result<InboundEvent, FrameError> {
    if text.len() > MAX_PAYLOAD_BYTES {
        return Err(FrameError::TooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

// ── Errors ───────────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
