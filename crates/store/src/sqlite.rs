//! SQLite-backed conversation store.

use std::{str::FromStr, time::Duration};

use {
    async_trait::async_trait,
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    },
    tracing::debug,
};

use murmur_protocol::{Conversation, LastMessage, Message, participant_pair};

use crate::{ConversationStore, NewMessage, Result, SeenUpdate, StoreError, new_id, now_ms};

pub struct SqliteConversationStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    participant_a: String,
    participant_b: String,
    last_text: String,
    last_sender_id: String,
    last_seen: i32,
    updated_at: i64,
}

impl From<ConversationRow> for Conversation {
    fn from(r: ConversationRow) -> Self {
        Self {
            id: r.id,
            participant_ids: [r.participant_a, r.participant_b],
            last_message: LastMessage {
                text: r.last_text,
                sender_id: r.last_sender_id,
                seen: r.last_seen != 0,
            },
            updated_at: r.updated_at as u64,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    sender_id: String,
    text: String,
    image_path: Option<String>,
    seen: i32,
    created_at: i64,
}

impl From<MessageRow> for Message {
    fn from(r: MessageRow) -> Self {
        Self {
            id: r.id,
            conversation_id: r.conversation_id,
            sender_id: r.sender_id,
            text: r.text,
            image_path: r.image_path,
            seen: r.seen != 0,
            created_at: r.created_at as u64,
        }
    }
}

const CONVERSATION_COLUMNS: &str =
    "id, participant_a, participant_b, last_text, last_sender_id, last_seen, updated_at";

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, text, image_path, seen, created_at";

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `url` and create the schema.
    ///
    /// `sqlite::memory:` databases are private to one connection, so the pool
    /// is capped at a single connection for them. File databases run in WAL
    /// mode so readers never wait on the writer.
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)?.busy_timeout(BUSY_TIMEOUT);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 8 })
            .connect_with(options)
            .await?;
        Self::init(&pool).await?;
        debug!(url, "conversation store ready");
        Ok(Self::new(pool))
    }

    /// Create the `conversations` and `messages` tables if they don't exist.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS conversations (
                id              TEXT PRIMARY KEY,
                participant_a   TEXT NOT NULL,
                participant_b   TEXT NOT NULL,
                last_text       TEXT NOT NULL DEFAULT '',
                last_sender_id  TEXT NOT NULL DEFAULT '',
                last_seen       INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL,
                UNIQUE (participant_a, participant_b)
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS messages (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL,
                text            TEXT NOT NULL DEFAULT '',
                image_path      TEXT,
                seen            INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages (conversation_id, seq)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn find_or_create_conversation(&self, a: &str, b: &str) -> Result<Conversation> {
        let [first, second] = participant_pair(a, b);
        let now = now_ms() as i64;
        sqlx::query(
            r#"INSERT INTO conversations (id, participant_a, participant_b, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (participant_a, participant_b) DO NOTHING"#,
        )
        .bind(new_id())
        .bind(&first)
        .bind(&second)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_conversation_between(&first, &second)
            .await?
            .ok_or_else(|| StoreError::Database(sqlx::Error::RowNotFound))
    }

    async fn find_conversation_between(&self, a: &str, b: &str) -> Result<Option<Conversation>> {
        let [first, second] = participant_pair(a, b);
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE participant_a = ? AND participant_b = ?"
        ))
        .bind(first)
        .bind(second)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let message = Message {
            id: new_id(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            text: new.text,
            image_path: new.image_path,
            seen: false,
            created_at: now_ms(),
        };

        let mut tx = self.pool.begin().await?;
        let touched = sqlx::query(
            r#"UPDATE conversations
               SET last_text = ?, last_sender_id = ?, last_seen = 0, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&message.text)
        .bind(&message.sender_id)
        .bind(message.created_at as i64)
        .bind(&message.conversation_id)
        .execute(&mut *tx)
        .await?;
        if touched.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::ConversationNotFound(message.conversation_id));
        }

        sqlx::query(
            r#"INSERT INTO messages (id, conversation_id, sender_id, text, image_path, seen, created_at)
               VALUES (?, ?, ?, ?, ?, 0, ?)"#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.text)
        .bind(&message.image_path)
        .bind(message.created_at as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(message)
    }

    async fn mark_seen(&self, conversation_id: &str, viewer_id: &str) -> Result<SeenUpdate> {
        // Write first: a deferred transaction that reads before writing cannot
        // wait for the write lock and fails with SQLITE_BUSY instead.
        let mut tx = self.pool.begin().await?;
        let messages = sqlx::query(
            "UPDATE messages SET seen = 1 WHERE conversation_id = ? AND sender_id != ? AND seen = 0",
        )
        .bind(conversation_id)
        .bind(viewer_id)
        .execute(&mut *tx)
        .await?;

        let last = sqlx::query(
            r#"UPDATE conversations SET last_seen = 1
               WHERE id = ? AND last_seen = 0 AND last_sender_id != '' AND last_sender_id != ?"#,
        )
        .bind(conversation_id)
        .bind(viewer_id)
        .execute(&mut *tx)
        .await?;

        if messages.rows_affected() == 0 && last.rows_affected() == 0 {
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT id FROM conversations WHERE id = ?")
                    .bind(conversation_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if exists.is_none() {
                tx.rollback().await?;
                return Err(StoreError::ConversationNotFound(conversation_id.to_string()));
            }
        }
        tx.commit().await?;

        Ok(SeenUpdate {
            updated: messages.rows_affected(),
            last_message_updated: last.rows_affected() > 0,
        })
    }

    async fn list_conversations(&self, participant: &str) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE participant_a = ? OR participant_b = ?
             ORDER BY updated_at DESC, rowid DESC"
        ))
        .bind(participant)
        .bind(participant)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? ORDER BY seq ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
