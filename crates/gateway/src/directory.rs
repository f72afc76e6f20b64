//! Recipient lookup against the account collaborator.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;

use murmur_config::UsersConfig;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Whether `user_id` names an account that can receive messages.
    async fn contains(&self, user_id: &str) -> bool;
}

/// Accepts every non-blank id.
pub struct OpenDirectory;

#[async_trait]
impl UserDirectory for OpenDirectory {
    async fn contains(&self, user_id: &str) -> bool {
        !user_id.trim().is_empty()
    }
}

/// Fixed allow-list, typically from `[users] known = [...]`.
pub struct StaticDirectory {
    known: HashSet<String>,
}

impl StaticDirectory {
    pub fn new(known: impl IntoIterator<Item = String>) -> Self {
        Self {
            known: known.into_iter().collect(),
        }
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn contains(&self, user_id: &str) -> bool {
        self.known.contains(user_id)
    }
}

pub fn from_config(users: &UsersConfig) -> Arc<dyn UserDirectory> {
    if users.known.is_empty() {
        Arc::new(OpenDirectory)
    } else {
        Arc::new(StaticDirectory::new(users.known.iter().cloned()))
    }
}
