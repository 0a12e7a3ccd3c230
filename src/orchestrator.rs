//! Conversation Orchestrator
//!
//! Request-handling protocol for the two inbound entry points:
//!
//! ```text
//! new conversation ──► completion ──► cache.store_new ──► reply ──► (title task)
//!
//! follow-up ──► coordinator (cancel predecessor, lock)
//!                 ├── negative cache? ──► ignore
//!                 ├── cache hit / reconstruct
//!                 ├── append user message (cached before the call)
//!                 ├── completion (cancelable)
//!                 └── append reply if still cached ──► reply
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::anchor::AnchorParser;
use crate::cache::CacheStats;
use crate::config::Config;
use crate::conversation::{ChatMessage, ConversationCache, ConversationRecord};
use crate::coordinator::ConcurrencyCoordinator;
use crate::error::{ConversationError, Result};
use crate::names::sanitize;
use crate::negative::NegativeSet;
use crate::reconstruct::{HistoryReconstructor, Reconstruction};
use crate::traits::{
    BotIdentity, Completion, CompletionOutcome, CompletionProvider, HistorySource,
    OutboundNotifier, Usage,
};

/// Sent to the conversation when the completion call fails
pub const FAILURE_NOTICE: &str = "Sorry, I couldn't get a response. Please try again.";

const TITLE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TITLE_CHARS: usize = 100;

/// Request to start a new conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConversation {
    pub conversation_id: String,
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    pub user_name: String,
}

/// A user message posted in an existing conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    pub conversation_id: String,
    pub message_id: String,
    pub content: String,
    pub user_name: String,
}

/// How a request ended when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The model answered and the reply was delivered
    Replied { text: String, usage: Usage },
    /// A newer message (or the caller's deadline) canceled the request
    Superseded,
    /// The conversation is not managed by this bot
    Ignored,
}

/// Composes caches, reconstruction, coordination and the collaborators
pub struct ConversationOrchestrator {
    config: Config,
    provider: Arc<dyn CompletionProvider>,
    notifier: Arc<dyn OutboundNotifier>,
    cache: Arc<ConversationCache>,
    negative: Arc<NegativeSet>,
    reconstructor: HistoryReconstructor,
    coordinator: ConcurrencyCoordinator,
}

impl ConversationOrchestrator {
    /// Build all components from `config`; fails fast on invalid capacities
    pub fn new(
        config: Config,
        provider: Arc<dyn CompletionProvider>,
        history: Arc<dyn HistorySource>,
        notifier: Arc<dyn OutboundNotifier>,
    ) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(ConversationCache::new(config.cache_capacity)?);
        let negative = Arc::new(NegativeSet::new(config.negative_capacity)?);
        let reconstructor = HistoryReconstructor::new(
            history,
            AnchorParser::new(config.unknown_user.clone()),
            BotIdentity::new(config.bot_user_id.clone(), config.bot_name.clone()),
            cache.clone(),
            negative.clone(),
        )
        .with_page_size(config.page_size);

        info!(
            cache_capacity = config.cache_capacity,
            negative_capacity = config.negative_capacity,
            page_size = config.page_size,
            "Conversation orchestrator ready"
        );

        Ok(Self {
            config,
            provider,
            notifier,
            cache,
            negative,
            reconstructor,
            coordinator: ConcurrencyCoordinator::new(),
        })
    }

    /// Start a conversation from its first prompt.
    ///
    /// Not coordinated: a new conversation has no predecessor to cancel.
    pub async fn start_conversation(
        &self,
        parent: &CancellationToken,
        request: NewConversation,
    ) -> Result<Outcome> {
        let id = request.conversation_id.as_str();
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(ConversationError::EmptyPrompt);
        }

        let model = self.config.select_model(request.model.as_deref());
        let messages = vec![ChatMessage::user(prompt, sanitize(&request.user_name))];

        info!(conversation_id = id, model = %model, "Starting conversation");

        let completion = match self.complete(parent, id, &model, &messages).await? {
            Some(completion) => completion,
            None => return Ok(Outcome::Superseded),
        };

        self.negative.remove(id);
        self.cache.store_new(
            id,
            prompt,
            &completion.text,
            &model,
            &request.user_name,
            &self.config.bot_name,
            sanitize,
        );

        self.deliver(id, &completion.text).await;

        if self.config.titles_enabled {
            self.spawn_title(id, prompt);
        }

        Ok(Outcome::Replied {
            text: completion.text,
            usage: completion.usage,
        })
    }

    /// Handle a follow-up message; supersedes any in-flight request for the conversation
    pub async fn handle_message(&self, parent: &CancellationToken, message: FollowUp) -> Result<Outcome> {
        if message.content.trim().is_empty() {
            debug!(conversation_id = %message.conversation_id, "Ignoring empty message");
            return Ok(Outcome::Ignored);
        }

        let id = message.conversation_id.clone();
        self.coordinator
            .run(&id, parent, |token| self.follow_up(token, message))
            .await
    }

    async fn follow_up(&self, token: CancellationToken, message: FollowUp) -> Result<Outcome> {
        let id = message.conversation_id.as_str();

        if self.negative.contains(id) {
            debug!(conversation_id = id, "Conversation is unmanaged");
            return Ok(Outcome::Ignored);
        }

        let record = match self.cache.get(id) {
            Some(record) => record,
            None => match self.reconstructor.reconstruct(id, &message.message_id).await {
                Ok(Reconstruction::Rebuilt(record)) => record,
                Ok(Reconstruction::Empty) | Ok(Reconstruction::Unmanaged) => {
                    return Ok(Outcome::Ignored);
                }
                Err(e) => {
                    // Bound retries within the same burst of messages
                    warn!(conversation_id = id, error = %e, "Reconstruction failed");
                    self.mark_unmanaged(id);
                    return Err(e);
                }
            },
        };

        let ConversationRecord { mut messages, model } = record;
        messages.push(ChatMessage::user(
            message.content.as_str(),
            sanitize(&message.user_name),
        ));
        self.cache.replace(id, messages.clone(), &model);

        if token.is_cancelled() {
            debug!(conversation_id = id, "Superseded before completion");
            return Ok(Outcome::Superseded);
        }

        let completion = match self.complete(&token, id, &model, &messages).await? {
            Some(completion) => completion,
            None => return Ok(Outcome::Superseded),
        };

        match self.cache.get(id) {
            Some(mut current) => {
                current.messages.push(ChatMessage::assistant(
                    completion.text.as_str(),
                    sanitize(&self.config.bot_name),
                ));
                self.cache.replace(id, current.messages, &current.model);
            }
            None => {
                info!(conversation_id = id, "Conversation evicted during completion, reply not cached");
            }
        }

        self.deliver(id, &completion.text).await;

        Ok(Outcome::Replied {
            text: completion.text,
            usage: completion.usage,
        })
    }

    /// Run the completion; `None` when canceled.
    ///
    /// A reply that lands after cancellation is discarded as well.
    async fn complete(
        &self,
        token: &CancellationToken,
        id: &str,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<Option<Completion>> {
        match self.provider.complete(token, model, messages).await {
            Ok(CompletionOutcome::Completed(completion)) if !token.is_cancelled() => {
                info!(
                    conversation_id = id,
                    model,
                    input_tokens = completion.usage.input_tokens,
                    output_tokens = completion.usage.output_tokens,
                    "Completion finished"
                );
                Ok(Some(completion))
            }
            Ok(_) => {
                info!(conversation_id = id, "Completion canceled");
                Ok(None)
            }
            Err(e) => {
                error!(conversation_id = id, error = %e, "Completion failed");
                if let Err(notify_err) = self.notifier.send(id, FAILURE_NOTICE).await {
                    warn!(conversation_id = id, error = %notify_err, "Failed to report error");
                }
                Err(e)
            }
        }
    }

    async fn deliver(&self, id: &str, text: &str) {
        if text.trim().is_empty() {
            warn!(conversation_id = id, "Empty completion, nothing to deliver");
            return;
        }
        if let Err(e) = self.notifier.send(id, text).await {
            warn!(conversation_id = id, error = %e, "Failed to deliver reply");
        }
    }

    /// Generate and apply a title in the background; failures are only logged
    fn spawn_title(&self, id: &str, prompt: &str) {
        let provider = self.provider.clone();
        let notifier = self.notifier.clone();
        let model = self.config.default_model.clone();
        let id = id.to_string();
        let request = vec![ChatMessage::user(
            format!(
                "Write a short title (at most six words) for a conversation that starts with:\n\n{}\n\nReply with the title only.",
                prompt
            ),
            sanitize(&self.config.bot_name),
        )];

        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let result =
                tokio::time::timeout(TITLE_TIMEOUT, provider.complete(&cancel, &model, &request)).await;

            let title = match result {
                Ok(Ok(CompletionOutcome::Completed(completion))) => clean_title(&completion.text),
                Ok(Ok(CompletionOutcome::Canceled)) => None,
                Ok(Err(e)) => {
                    warn!(conversation_id = %id, error = %e, "Title generation failed");
                    None
                }
                Err(_) => {
                    warn!(conversation_id = %id, "Title generation timed out");
                    None
                }
            };

            if let Some(title) = title {
                match notifier.set_title(&id, &title).await {
                    Ok(()) => debug!(conversation_id = %id, title = %title, "Title applied"),
                    Err(e) => warn!(conversation_id = %id, error = %e, "Failed to apply title"),
                }
            }
        });
    }

    /// Negative marking and a cached record are mutually exclusive
    fn mark_unmanaged(&self, id: &str) {
        self.cache.remove(id);
        self.negative.add(id);
    }

    /// Drop all cached state for a conversation
    pub fn forget(&self, id: &str) {
        self.cache.remove(id);
        self.negative.remove(id);
    }

    /// Cached record of a conversation, if any
    pub fn conversation(&self, id: &str) -> Option<ConversationRecord> {
        self.cache.get(id)
    }

    pub fn is_unmanaged(&self, id: &str) -> bool {
        self.negative.contains(id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn negative_stats(&self) -> CacheStats {
        self.negative.stats()
    }

    pub fn coordinator(&self) -> &ConcurrencyCoordinator {
        &self.coordinator
    }
}

/// First non-empty line, unquoted and capped
fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let title: String = line
        .trim_matches(|c| c == '"' || c == '\'' || c == '*' || c == '#')
        .trim()
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();

    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("\"Rust lifetimes\"\nextra"), Some("Rust lifetimes".to_string()));
        assert_eq!(clean_title("\n\n  ## Borrowing  "), Some("Borrowing".to_string()));
        assert_eq!(clean_title("   "), None);
        assert_eq!(clean_title(&"a".repeat(300)).map(|t| t.len()), Some(MAX_TITLE_CHARS));
    }
}
