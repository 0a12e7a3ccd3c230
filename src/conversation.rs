//! Conversation Cache
//!
//! Keeps the exchanged messages of each active conversation in memory so
//! follow-up turns do not need the platform's full history. Best-effort only:
//! entries are lost on eviction or restart and rebuilt by reconstruction.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::cache::{BoundedCache, CacheStats};
use crate::error::Result;

/// Default number of conversations kept in memory
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Author role of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Sanitized author name
    pub display_name: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            display_name: display_name.into(),
        }
    }

    pub fn assistant(content: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            display_name: display_name.into(),
        }
    }
}

/// Cached view of one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Messages in order of authorship
    pub messages: Vec<ChatMessage>,
    /// Model selected when the conversation started
    pub model: String,
}

impl ConversationRecord {
    pub fn new(messages: Vec<ChatMessage>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
        }
    }
}

/// LRU cache of conversation records keyed by conversation ID
pub struct ConversationCache {
    inner: BoundedCache<String, ConversationRecord>,
}

impl ConversationCache {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            inner: BoundedCache::with_label("conversation cache", capacity)?,
        })
    }

    /// Get a conversation, marking it recently used
    pub fn get(&self, id: &str) -> Option<ConversationRecord> {
        let record = self.inner.get(&id.to_string());
        if record.is_some() {
            debug!(conversation_id = id, "Conversation cache HIT");
        } else {
            debug!(conversation_id = id, "Conversation cache MISS");
        }
        record
    }

    /// Store a fresh two-message record for a conversation that just started
    #[allow(clippy::too_many_arguments)]
    pub fn store_new(
        &self,
        id: &str,
        user_msg: &str,
        assistant_msg: &str,
        model: &str,
        user_name: &str,
        bot_name: &str,
        sanitize: impl Fn(&str) -> String,
    ) {
        let record = ConversationRecord::new(
            vec![
                ChatMessage::user(user_msg, sanitize(user_name)),
                ChatMessage::assistant(assistant_msg, sanitize(bot_name)),
            ],
            model,
        );
        self.inner.add(id.to_string(), record);
        debug!(conversation_id = id, model, "Stored new conversation");
    }

    /// Overwrite the full message list and model of a conversation
    pub fn replace(&self, id: &str, messages: Vec<ChatMessage>, model: &str) {
        let count = messages.len();
        self.inner
            .add(id.to_string(), ConversationRecord::new(messages, model));
        debug!(conversation_id = id, messages = count, "Replaced conversation");
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.contains(&id.to_string())
    }

    pub fn remove(&self, id: &str) -> Option<ConversationRecord> {
        self.inner.remove(&id.to_string())
    }

    pub fn purge(&self) {
        self.inner.purge();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}
