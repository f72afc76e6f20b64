//! Conversation Store: durable conversations and messages.
//!
//! Every method is atomic on its own. Callers that need ordering across
//! several writes to one conversation serialize those writes themselves.

pub mod error;
pub mod memory;
pub mod sqlite;

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use murmur_protocol::{Conversation, Message};

pub use {
    error::{Result, StoreError},
    memory::MemoryConversationStore,
    sqlite::SqliteConversationStore,
};

/// A message about to be persisted. The store assigns id, `seen = false` and
/// the creation time.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub image_path: Option<String>,
}

/// Outcome of a seen-flag bulk update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeenUpdate {
    /// Messages that flipped from unseen to seen.
    pub updated: u64,
    /// Whether `lastMessage.seen` flipped as part of this update.
    pub last_message_updated: bool,
}

impl SeenUpdate {
    pub fn changed(&self) -> bool {
        self.updated > 0 || self.last_message_updated
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Resolve the conversation for the unordered pair `{a, b}`, creating it
    /// if this is the pair's first exchange.
    async fn find_or_create_conversation(&self, a: &str, b: &str) -> Result<Conversation>;

    async fn find_conversation_between(&self, a: &str, b: &str) -> Result<Option<Conversation>>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Persist a message and point the conversation's `lastMessage` at it.
    async fn insert_message(&self, message: NewMessage) -> Result<Message>;

    /// Mark every unseen message in the conversation not sent by `viewer_id`
    /// as seen. Never clears a flag.
    async fn mark_seen(&self, conversation_id: &str, viewer_id: &str) -> Result<SeenUpdate>;

    /// Conversations `participant` takes part in, most recently updated first.
    async fn list_conversations(&self, participant: &str) -> Result<Vec<Conversation>>;

    /// Messages of a conversation in the order they were persisted.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
