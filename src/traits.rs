//! Collaborator Trait Definitions
//!
//! Interfaces the conversation core consumes. Platform and provider
//! adapters implement these; tests plug in in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::conversation::ChatMessage;
use crate::error::Result;

/// Token usage reported by a completion call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Usage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// A finished completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// Result of a completion call that was not a transport/provider failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed(Completion),
    /// The scope was canceled before the provider answered
    Canceled,
}

/// Hosted language model completion service
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Complete the conversation `messages` with `model`.
    ///
    /// Must return [`CompletionOutcome::Canceled`] promptly once `cancel` fires.
    async fn complete(
        &self,
        cancel: &CancellationToken,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionOutcome>;
}

/// One message as stored by the chat platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    pub author_id: String,
    /// Resolved display name of the author
    pub author_name: String,
    pub content: String,
    /// Text of the message this one replies to or quotes
    #[serde(default)]
    pub referenced_content: Option<String>,
    /// Display name of the user whose interaction produced this message
    #[serde(default)]
    pub interaction_user: Option<String>,
}

/// Durable message history of the chat platform
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Newest `limit` messages of a conversation, newest first
    async fn fetch_latest(&self, conversation_id: &str, limit: usize) -> Result<Vec<HistoryMessage>>;

    /// Up to `limit` messages strictly older than `before`, newest first
    async fn fetch_before(
        &self,
        conversation_id: &str,
        before: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>>;
}

/// Delivers text back to the conversation
#[async_trait]
pub trait OutboundNotifier: Send + Sync {
    async fn send(&self, conversation_id: &str, text: &str) -> Result<()>;

    /// Apply a display title to the conversation
    async fn set_title(&self, _conversation_id: &str, _title: &str) -> Result<()> {
        Ok(())
    }
}

/// The bot's own identity on the chat platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub user_id: String,
    pub display_name: String,
}

impl BotIdentity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}
