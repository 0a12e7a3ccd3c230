//! Claude API Client
//!
//! Anthropic Messages API client used as the completion provider.
//! The static system context is sent with cache_control: ephemeral.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::conversation::{ChatMessage, Role};
use crate::error::ConversationError;
use crate::traits::{Completion, CompletionOutcome, CompletionProvider, Usage};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant taking part in a chat thread. \
Several people may write in the same thread; reply to the latest message.";

const DEFAULT_MAX_TOKENS: usize = 4096;

/// System message block with optional cache control
#[derive(Debug, Serialize)]
struct SystemBlock {
    r#type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    r#type: String,
}

/// Message in conversation
#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// API request
#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: usize,
    system: Vec<SystemBlock>,
    messages: Vec<Message>,
}

/// API response
#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: usize,
    output_tokens: usize,
}

/// Claude API client
#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    api_key: Option<String>,
    system_prompt: String,
    max_tokens: usize,
}

impl ClaudeClient {
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.map(|s| s.to_string()),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Create from config
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.anthropic_api_key.as_deref())
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Check if API key is configured
    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    /// Get model ID from hint; full model IDs pass through
    fn model_id(model: &str) -> String {
        match model.to_lowercase().as_str() {
            "haiku" => "claude-3-5-haiku-20241022".to_string(),
            "opus" => "claude-3-opus-20240229".to_string(),
            "sonnet" => "claude-sonnet-4-20250514".to_string(),
            _ => model.to_string(),
        }
    }

    /// Convert cached messages to API messages.
    ///
    /// The Messages API has no author name field, so in threads with more
    /// than one distinct user the name is folded into the user turn.
    fn build_messages(messages: &[ChatMessage]) -> Vec<Message> {
        let users: HashSet<&str> = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.display_name.as_str())
            .collect();
        let multi_user = users.len() > 1;

        messages
            .iter()
            .map(|m| Message {
                role: m.role.as_str().to_string(),
                content: if multi_user && m.role == Role::User {
                    format!("{}: {}", m.display_name, m.content)
                } else {
                    m.content.clone()
                },
            })
            .collect()
    }

    async fn send(&self, model: &str, messages: &[ChatMessage]) -> Result<Completion> {
        let model_id = Self::model_id(model);

        let request = MessageRequest {
            model: model_id.clone(),
            max_tokens: self.max_tokens,
            system: vec![SystemBlock {
                r#type: "text".to_string(),
                text: self.system_prompt.clone(),
                cache_control: Some(CacheControl {
                    r#type: "ephemeral".to_string(),
                }),
            }],
            messages: Self::build_messages(messages),
        };

        debug!("Calling Claude API: model={}, messages={}", model_id, messages.len());

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY not set"))?;

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("Claude API error {}: {}", status, text);
        }

        let result: MessageResponse = response.json().await?;

        let text = result
            .content
            .into_iter()
            .filter_map(|b| if b.r#type == "text" { b.text } else { None })
            .collect::<Vec<_>>()
            .join("\n");

        let usage = Usage {
            input_tokens: result.usage.input_tokens,
            output_tokens: result.usage.output_tokens,
        };

        info!(
            "Claude response: model={}, in={}, out={}",
            model_id, usage.input_tokens, usage.output_tokens
        );

        Ok(Completion { text, usage })
    }
}

#[async_trait]
impl CompletionProvider for ClaudeClient {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        model: &str,
        messages: &[ChatMessage],
    ) -> crate::error::Result<CompletionOutcome> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Claude request canceled");
                Ok(CompletionOutcome::Canceled)
            }
            result = self.send(model, messages) => result
                .map(CompletionOutcome::Completed)
                .map_err(|e| ConversationError::Completion(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_aliases() {
        assert_eq!(ClaudeClient::model_id("Haiku"), "claude-3-5-haiku-20241022");
        assert_eq!(ClaudeClient::model_id("claude-custom-1"), "claude-custom-1");
    }

    #[test]
    fn test_single_user_names_not_folded() {
        let messages = vec![
            ChatMessage::user("hi", "alice"),
            ChatMessage::assistant("hello", "bot"),
            ChatMessage::user("again", "alice"),
        ];

        let built = ClaudeClient::build_messages(&messages);
        assert_eq!(built[0].content, "hi");
        assert_eq!(built[1].role, "assistant");
    }

    #[test]
    fn test_multi_user_names_folded() {
        let messages = vec![
            ChatMessage::user("hi", "alice"),
            ChatMessage::assistant("hello", "bot"),
            ChatMessage::user("me too", "bob"),
        ];

        let built = ClaudeClient::build_messages(&messages);
        assert_eq!(built[0].content, "alice: hi");
        assert_eq!(built[1].content, "hello");
        assert_eq!(built[2].content, "bob: me too");
    }

    #[test]
    fn test_system_prompt_override() {
        let client = ClaudeClient::new(None).with_system_prompt("Answer in haiku.");
        assert_eq!(client.system_prompt, "Answer in haiku.");
        assert!(!client.is_available());
        assert_eq!(ClaudeClient::new(Some("k")).system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_canceled_before_request() {
        let client = ClaudeClient::new(Some("test-key"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = client
            .complete(&cancel, "sonnet", &[ChatMessage::user("hi", "a")])
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::Canceled);
    }
}
