//! Storage layer for user profiles and chat history
//!
//! The bot only depends on the [`StorageProvider`] trait. [`InMemoryStorage`]
//! is the bundled implementation; writes are serialized by its lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::llm::ChatMessage;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend rejected or failed the operation
    #[error("Storage backend error: {0}")]
    Backend(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Interface language preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English
    #[default]
    English,
    /// Russian
    Russian,
}

impl Language {
    /// Human-readable name shown in menus.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Russian => "Русский",
        }
    }
}

/// Per-user preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Chosen logical model, if any
    pub selected_model: Option<String>,
    /// Custom system instruction
    pub instruction: Option<String>,
    /// Replay stored history to the model
    pub context_mode_on: bool,
    /// Use `instruction` instead of the default system message
    pub instruction_mode_on: bool,
    /// Interface language
    pub language: Language,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            selected_model: None,
            instruction: None,
            context_mode_on: true,
            instruction_mode_on: false,
            language: Language::default(),
        }
    }
}

/// A persisted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Text content
    pub content: String,
    /// `true` for user messages, `false` for model replies
    pub is_from_user: bool,
    /// Time of insertion
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Conversation message for replay to a model.
    #[must_use]
    pub fn to_chat_message(&self) -> ChatMessage {
        if self.is_from_user {
            ChatMessage::user(&self.content)
        } else {
            ChatMessage::assistant(&self.content)
        }
    }
}

/// Interface for storage providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Stored conversation of a user, oldest first
    async fn get_context_messages(&self, user_id: i64) -> Result<Vec<ChatMessage>, StorageError>;
    /// Append a message to a user's history
    async fn add_message(
        &self,
        user_id: i64,
        content: String,
        is_from_user: bool,
    ) -> Result<(), StorageError>;
    /// Remove a user's history
    async fn delete_messages(&self, user_id: i64) -> Result<(), StorageError>;
    /// Load a profile, defaulting for unknown users
    async fn get_profile(&self, user_id: i64) -> Result<UserProfile, StorageError>;
    /// Replace a profile
    async fn update_profile(&self, user_id: i64, profile: UserProfile)
        -> Result<(), StorageError>;
    /// Check connection to storage
    async fn check_connection(&self) -> Result<(), String>;
}

#[derive(Default)]
struct Tables {
    messages: HashMap<i64, Vec<StoredMessage>>,
    profiles: HashMap<i64, UserProfile>,
}

/// Process-local storage
#[derive(Default)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
    context_limit: Option<usize>,
}

impl InMemoryStorage {
    /// Unbounded storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that returns at most the `limit` most recent messages as context.
    #[must_use]
    pub fn with_context_limit(limit: usize) -> Self {
        Self {
            tables: RwLock::default(),
            context_limit: Some(limit),
        }
    }

    /// Number of users with a stored profile or history.
    pub async fn user_count(&self) -> usize {
        let tables = self.tables.read().await;
        let mut users: Vec<i64> = tables
            .messages
            .keys()
            .chain(tables.profiles.keys())
            .copied()
            .collect();
        users.sort_unstable();
        users.dedup();
        users.len()
    }

    /// Total number of stored messages.
    pub async fn message_count(&self) -> usize {
        self.tables.read().await.messages.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorage {
    async fn get_context_messages(&self, user_id: i64) -> Result<Vec<ChatMessage>, StorageError> {
        let tables = self.tables.read().await;
        let Some(history) = tables.messages.get(&user_id) else {
            return Ok(Vec::new());
        };
        let skip = self
            .context_limit
            .map_or(0, |limit| history.len().saturating_sub(limit));
        Ok(history
            .iter()
            .skip(skip)
            .map(StoredMessage::to_chat_message)
            .collect())
    }

    async fn add_message(
        &self,
        user_id: i64,
        content: String,
        is_from_user: bool,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        tables
            .messages
            .entry(user_id)
            .or_default()
            .push(StoredMessage {
                content,
                is_from_user,
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn delete_messages(&self, user_id: i64) -> Result<(), StorageError> {
        let removed = self.tables.write().await.messages.remove(&user_id);
        debug!(
            user_id,
            removed = removed.map_or(0, |h| h.len()),
            "Chat history cleared"
        );
        Ok(())
    }

    async fn get_profile(&self, user_id: i64) -> Result<UserProfile, StorageError> {
        Ok(self
            .tables
            .read()
            .await
            .profiles
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_profile(
        &self,
        user_id: i64,
        profile: UserProfile,
    ) -> Result<(), StorageError> {
        self.tables.write().await.profiles.insert(user_id, profile);
        Ok(())
    }

    async fn check_connection(&self) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[tokio::test]
    async fn test_history_round_trip_preserves_order() -> Result<(), StorageError> {
        let storage = InMemoryStorage::new();
        storage.add_message(1, "hi".into(), true).await?;
        storage.add_message(1, "hello".into(), false).await?;
        storage.add_message(2, "other".into(), true).await?;

        let context = storage.get_context_messages(1).await?;
        assert_eq!(
            context,
            vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")]
        );
        assert_eq!(storage.user_count().await, 2);

        storage.delete_messages(1).await?;
        assert!(storage.get_context_messages(1).await?.is_empty());
        assert_eq!(storage.message_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_context_limit_keeps_most_recent() -> Result<(), StorageError> {
        let storage = InMemoryStorage::with_context_limit(2);
        for i in 0..5 {
            storage.add_message(7, format!("m{i}"), i % 2 == 0).await?;
        }
        let context = storage.get_context_messages(7).await?;
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].content, "m3");
        assert_eq!(context[0].role, Role::Assistant);
        assert_eq!(context[1].content, "m4");
        Ok(())
    }

    #[tokio::test]
    async fn test_profile_defaults() -> Result<(), StorageError> {
        let storage = InMemoryStorage::new();
        let profile = storage.get_profile(42).await?;
        assert!(profile.context_mode_on);
        assert!(!profile.instruction_mode_on);
        assert_eq!(profile.language, Language::English);

        let updated = UserProfile {
            selected_model: Some("llama".into()),
            ..profile
        };
        storage.update_profile(42, updated.clone()).await?;
        assert_eq!(storage.get_profile(42).await?, updated);
        Ok(())
    }
}
