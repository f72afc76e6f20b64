//! Process-local store used by tests and `murmur serve --in-memory`.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use {async_trait::async_trait, tokio::sync::RwLock};

use murmur_protocol::{Conversation, LastMessage, Message, participant_pair};

use crate::{ConversationStore, NewMessage, Result, SeenUpdate, StoreError, new_id, now_ms};

struct StoredConversation {
    conversation: Conversation,
    /// Tie-breaker for conversations touched within the same millisecond.
    touched: u64,
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<String, StoredConversation>,
    by_pair: HashMap<[String; 2], String>,
    messages: HashMap<String, Vec<Message>>,
    touches: u64,
}

impl Inner {
    fn touch(&mut self) -> u64 {
        self.touches += 1;
        self.touches
    }
}

/// In-memory conversation store.
#[derive(Default)]
pub struct MemoryConversationStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while unavailable every write fails with
    /// [`StoreError::Unavailable`] and nothing is mutated.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn find_or_create_conversation(&self, a: &str, b: &str) -> Result<Conversation> {
        self.check_writable()?;
        let pair = participant_pair(a, b);
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner
            .by_pair
            .get(&pair)
            .and_then(|id| inner.conversations.get(id))
        {
            return Ok(existing.conversation.clone());
        }

        let conversation = Conversation {
            id: new_id(),
            participant_ids: pair.clone(),
            last_message: LastMessage::default(),
            updated_at: now_ms(),
        };
        let touched = inner.touch();
        inner.by_pair.insert(pair, conversation.id.clone());
        inner.messages.insert(conversation.id.clone(), Vec::new());
        inner
            .conversations
            .insert(conversation.id.clone(), StoredConversation {
                conversation: conversation.clone(),
                touched,
            });
        Ok(conversation)
    }

    async fn find_conversation_between(&self, a: &str, b: &str) -> Result<Option<Conversation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_pair
            .get(&participant_pair(a, b))
            .and_then(|id| inner.conversations.get(id))
            .map(|c| c.conversation.clone()))
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self
            .inner
            .read()
            .await
            .conversations
            .get(id)
            .map(|c| c.conversation.clone()))
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        let touched = inner.touch();
        let Some(stored) = inner.conversations.get_mut(&new.conversation_id) else {
            return Err(StoreError::ConversationNotFound(new.conversation_id));
        };

        let message = Message {
            id: new_id(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            text: new.text,
            image_path: new.image_path,
            seen: false,
            created_at: now_ms(),
        };
        stored.conversation.last_message = LastMessage::from(&message);
        stored.conversation.updated_at = message.created_at;
        stored.touched = touched;

        inner
            .messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn mark_seen(&self, conversation_id: &str, viewer_id: &str) -> Result<SeenUpdate> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        let Inner {
            conversations,
            messages,
            ..
        } = &mut *inner;
        let Some(stored) = conversations.get_mut(conversation_id) else {
            return Err(StoreError::ConversationNotFound(conversation_id.to_string()));
        };

        let mut update = SeenUpdate::default();
        for message in messages.get_mut(conversation_id).into_iter().flatten() {
            if !message.seen && message.sender_id != viewer_id {
                message.seen = true;
                update.updated += 1;
            }
        }

        let last = &mut stored.conversation.last_message;
        if !last.seen && !last.sender_id.is_empty() && last.sender_id != viewer_id {
            last.seen = true;
            update.last_message_updated = true;
        }
        Ok(update)
    }

    async fn list_conversations(&self, participant: &str) -> Result<Vec<Conversation>> {
        let inner = self.inner.read().await;
        let mut found: Vec<_> = inner
            .conversations
            .values()
            .filter(|c| c.conversation.has_participant(participant))
            .collect();
        found.sort_by(|a, b| {
            (b.conversation.updated_at, b.touched).cmp(&(a.conversation.updated_at, a.touched))
        });
        Ok(found.into_iter().map(|c| c.conversation.clone()).collect())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .inner
            .read()
            .await
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(conversation_id: &str, sender: &str, text: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation_id.into(),
            sender_id: sender.into(),
            text: text.into(),
            image_path: None,
        }
    }

    #[tokio::test]
    async fn one_conversation_per_pair() {
        let store = MemoryConversationStore::new();
        let ab = store.find_or_create_conversation("a", "b").await.unwrap();
        let ba = store.find_or_create_conversation("b", "a").await.unwrap();
        assert_eq!(ab.id, ba.id);
        let found = store.find_conversation_between("b", "a").await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(ab.id));
    }

    #[tokio::test]
    async fn insert_updates_last_message() {
        let store = MemoryConversationStore::new();
        let conv = store.find_or_create_conversation("a", "b").await.unwrap();
        store.insert_message(text(&conv.id, "a", "one")).await.unwrap();
        let m = store.insert_message(text(&conv.id, "b", "two")).await.unwrap();
        assert!(!m.seen);

        let conv = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(conv.last_message, LastMessage {
            text: "two".into(),
            sender_id: "b".into(),
            seen: false,
        });
        let texts: Vec<_> = store
            .list_messages(&conv.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, ["one", "two"]);
    }

    #[tokio::test]
    async fn insert_into_unknown_conversation_fails() {
        let store = MemoryConversationStore::new();
        let err = store.insert_message(text("nope", "a", "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn mark_seen_only_touches_other_senders() {
        let store = MemoryConversationStore::new();
        let conv = store.find_or_create_conversation("a", "b").await.unwrap();
        store.insert_message(text(&conv.id, "a", "1")).await.unwrap();
        store.insert_message(text(&conv.id, "b", "2")).await.unwrap();
        store.insert_message(text(&conv.id, "a", "3")).await.unwrap();

        let update = store.mark_seen(&conv.id, "b").await.unwrap();
        assert_eq!(update, SeenUpdate {
            updated: 2,
            last_message_updated: true,
        });

        let seen: Vec<_> = store
            .list_messages(&conv.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| (m.sender_id, m.seen))
            .collect();
        assert_eq!(seen, [
            ("a".to_string(), true),
            ("b".to_string(), false),
            ("a".to_string(), true)
        ]);

        let again = store.mark_seen(&conv.id, "b").await.unwrap();
        assert!(!again.changed());
    }

    #[tokio::test]
    async fn own_last_message_is_not_marked() {
        let store = MemoryConversationStore::new();
        let conv = store.find_or_create_conversation("a", "b").await.unwrap();
        store.insert_message(text(&conv.id, "a", "1")).await.unwrap();
        store.insert_message(text(&conv.id, "b", "2")).await.unwrap();

        let update = store.mark_seen(&conv.id, "b").await.unwrap();
        assert_eq!(update.updated, 1);
        assert!(!update.last_message_updated);
        let conv = store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert!(!conv.last_message.seen);
    }

    #[tokio::test]
    async fn list_conversations_most_recent_first() {
        let store = MemoryConversationStore::new();
        let ab = store.find_or_create_conversation("a", "b").await.unwrap();
        let ac = store.find_or_create_conversation("a", "c").await.unwrap();
        store.find_or_create_conversation("b", "c").await.unwrap();
        store.insert_message(text(&ab.id, "b", "late")).await.unwrap();

        let ids: Vec<_> = store
            .list_conversations("a")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, [ab.id, ac.id]);
    }

    #[tokio::test]
    async fn unavailable_store_rejects_writes_without_mutation() {
        let store = MemoryConversationStore::new();
        let conv = store.find_or_create_conversation("a", "b").await.unwrap();
        store.set_available(false);
        let err = store.insert_message(text(&conv.id, "a", "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        store.set_available(true);
        assert!(store.list_messages(&conv.id).await.unwrap().is_empty());
    }
}
