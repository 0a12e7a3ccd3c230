//! Discord REST Adapter
//!
//! Message history source and outbound notifier for Discord threads.
//! The gateway connection is owned by the surrounding application.
//!
//! # Configuration
//!
//! Environment variables:
//! - `DISCORD_BOT_TOKEN`: Discord bot token
//! - `DISCORD_GUILD_ID`: guild used to resolve member nicknames (optional)

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ConversationError, Result};
use crate::traits::{HistoryMessage, HistorySource, OutboundNotifier};

const DISCORD_API_URL: &str = "https://discord.com/api/v10";

/// Discord message length limit
const MAX_MESSAGE_LENGTH: usize = 2000;

const CODE_FENCE: &str = "```";
const FENCE_CLOSE: &str = "\n```";
const FENCE_REOPEN: &str = "```\n";

/// Smallest wrap width; always fits one UTF-8 character
const MIN_LINE_BUDGET: usize = 4;

/// Discord channel names are capped at 100 characters
const MAX_TITLE_LENGTH: usize = 100;

/// Resolved display names are cached for an hour
const NAME_CACHE_TTL_SECS: u64 = 3600;
const NAME_CACHE_CAPACITY: u64 = 10_000;

/// Discord adapter configuration
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// Bot token
    pub bot_token: String,
    /// Guild for nickname lookups
    pub guild_id: Option<String>,
    /// Maximum message length
    pub max_message_length: usize,
}

impl DiscordConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            guild_id: None,
            max_message_length: MAX_MESSAGE_LENGTH,
        }
    }

    /// Load from environment
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bot_token: std::env::var("DISCORD_BOT_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_BOT_TOKEN not set"))?,
            guild_id: std::env::var("DISCORD_GUILD_ID").ok(),
            max_message_length: MAX_MESSAGE_LENGTH,
        })
    }
}

/// Discord REST client
pub struct DiscordClient {
    config: DiscordConfig,
    client: reqwest::Client,
    /// User ID -> resolved display name
    names: Cache<String, String>,
}

impl DiscordClient {
    pub fn new(config: DiscordConfig) -> Self {
        let names = Cache::builder()
            .max_capacity(NAME_CACHE_CAPACITY)
            .time_to_live(Duration::from_secs(NAME_CACHE_TTL_SECS))
            .build();

        Self {
            config,
            client: reqwest::Client::new(),
            names,
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.config.bot_token)
    }

    async fn fetch_page(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>> {
        let url = format!("{}/channels/{}/messages", DISCORD_API_URL, conversation_id);

        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth())
            .query(&query)
            .send()
            .await
            .map_err(|e| ConversationError::History(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ConversationError::History(format!(
                "Discord error {}: {}",
                status, error_text
            )));
        }

        let page: Vec<DiscordMessage> = response
            .json()
            .await
            .map_err(|e| ConversationError::History(e.to_string()))?;

        let mut messages = Vec::with_capacity(page.len());
        for message in page {
            let author_name = self.display_name(&message).await;
            messages.push(message.into_history(author_name));
        }

        debug!(conversation_id, count = messages.len(), "Fetched Discord page");
        Ok(messages)
    }

    /// Resolve the author's display name: nickname, global name, username
    async fn display_name(&self, message: &DiscordMessage) -> String {
        if let Some(nick) = message.member.as_ref().and_then(|m| m.nick.clone()) {
            return nick;
        }

        let author = &message.author;
        if let Some(name) = self.names.get(&author.id).await {
            return name;
        }

        let name = match self.fetch_nickname(&author.id).await {
            Some(nick) => nick,
            None => author.preferred_name().to_string(),
        };
        self.names.insert(author.id.clone(), name.clone()).await;
        name
    }

    async fn fetch_nickname(&self, user_id: &str) -> Option<String> {
        let guild_id = self.config.guild_id.as_deref()?;
        let url = format!("{}/guilds/{}/members/{}", DISCORD_API_URL, guild_id, user_id);

        let response = match self
            .client
            .get(&url)
            .header("Authorization", self.auth())
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("Member lookup for {} returned {}", user_id, response.status());
                return None;
            }
            Err(e) => {
                warn!("Member lookup for {} failed: {}", user_id, e);
                return None;
            }
        };

        response
            .json::<DiscordMember>()
            .await
            .ok()
            .and_then(|member| member.nick)
    }

    /// Send message via Discord API
    async fn send_discord_message(&self, channel_id: &str, content: &str) -> Result<String> {
        let url = format!("{}/channels/{}/messages", DISCORD_API_URL, channel_id);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth())
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .map_err(|e| ConversationError::Notify(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let result: DiscordMessageResponse = response
                .json()
                .await
                .map_err(|e| ConversationError::Notify(e.to_string()))?;
            Ok(result.id)
        } else if status.as_u16() == 429 {
            Err(ConversationError::Notify("Discord rate limited".to_string()))
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(ConversationError::Notify(format!(
                "Discord error {}: {}",
                status, error_text
            )))
        }
    }

    /// Split long messages, keeping code fences balanced across chunks.
    ///
    /// Every chunk fits `max_message_length`, including the fence closed at
    /// its end and the fence reopened at the start of the next one.
    fn split_message(&self, content: &str) -> Vec<String> {
        let max_len = self.config.max_message_length;
        if content.len() <= max_len {
            return vec![content.to_string()];
        }

        let budget = max_len
            .saturating_sub(FENCE_CLOSE.len() + FENCE_REOPEN.len())
            .max(MIN_LINE_BUDGET);

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut has_text = false;

        for line in content.lines() {
            for piece in wrap_line(line, budget) {
                if has_text && current.len() + piece.len() + 1 > budget {
                    let open_block = current.matches(CODE_FENCE).count() % 2 == 1;
                    if open_block {
                        current.push_str(FENCE_CLOSE);
                    }
                    chunks.push(std::mem::take(&mut current));
                    has_text = false;
                    if open_block {
                        current.push_str(FENCE_REOPEN);
                    }
                }

                if has_text {
                    current.push('\n');
                }
                current.push_str(piece);
                has_text = true;
            }
        }

        if has_text {
            chunks.push(current);
        }

        chunks
    }
}

/// Hard-wrap a line into pieces of at most `width` bytes, preferring spaces
fn wrap_line(line: &str, width: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = line;

    while rest.len() > width {
        let mut cut = width;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if let Some(space) = rest[..cut].rfind(' ').filter(|&i| i > 0) {
            cut = space + 1;
        }
        if cut == 0 {
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }

        pieces.push(&rest[..cut]);
        rest = &rest[cut..];
    }

    pieces.push(rest);
    pieces
}

#[async_trait]
impl HistorySource for DiscordClient {
    async fn fetch_latest(&self, conversation_id: &str, limit: usize) -> Result<Vec<HistoryMessage>> {
        self.fetch_page(conversation_id, None, limit).await
    }

    async fn fetch_before(
        &self,
        conversation_id: &str,
        before: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>> {
        self.fetch_page(conversation_id, Some(before), limit).await
    }
}

#[async_trait]
impl OutboundNotifier for DiscordClient {
    async fn send(&self, conversation_id: &str, text: &str) -> Result<()> {
        let chunks = self.split_message(text);

        for (i, chunk) in chunks.iter().enumerate() {
            self.send_discord_message(conversation_id, chunk).await?;

            // Respect rate limits
            if i < chunks.len() - 1 {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }

        Ok(())
    }

    async fn set_title(&self, conversation_id: &str, title: &str) -> Result<()> {
        let url = format!("{}/channels/{}", DISCORD_API_URL, conversation_id);
        let name: String = title.chars().take(MAX_TITLE_LENGTH).collect();

        let response = self
            .client
            .patch(&url)
            .header("Authorization", self.auth())
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(|e| ConversationError::Notify(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ConversationError::Notify(format!(
                "Failed to rename thread: {}",
                response.status()
            )))
        }
    }
}

/// Discord message object as returned by the REST API
#[derive(Debug, Deserialize, Serialize)]
pub struct DiscordMessage {
    pub id: String,
    pub author: DiscordUser,
    #[serde(default)]
    pub content: String,
    pub member: Option<DiscordMember>,
    pub referenced_message: Option<Box<DiscordMessage>>,
    pub interaction_metadata: Option<DiscordInteraction>,
    /// Deprecated predecessor of `interaction_metadata`
    pub interaction: Option<DiscordInteraction>,
}

impl DiscordMessage {
    fn into_history(self, author_name: String) -> HistoryMessage {
        let interaction_user = self
            .interaction_metadata
            .or(self.interaction)
            .map(|i| i.user.preferred_name().to_string());

        HistoryMessage {
            id: self.id,
            author_id: self.author.id,
            author_name,
            content: self.content,
            referenced_content: self.referenced_message.map(|m| m.content),
            interaction_user,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    pub global_name: Option<String>,
}

impl DiscordUser {
    fn preferred_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DiscordMember {
    pub nick: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DiscordInteraction {
    pub user: DiscordUser,
}

#[derive(Debug, Deserialize)]
struct DiscordMessageResponse {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(max_message_length: usize) -> DiscordClient {
        DiscordClient::new(DiscordConfig {
            bot_token: "test".to_string(),
            guild_id: None,
            max_message_length,
        })
    }

    #[test]
    fn test_message_splitting_keeps_code_blocks() {
        let channel = client(30);

        let text = "intro\n```rust\nfn main() {\n    println!(\"Hello\");\n}\n```";
        let chunks = channel.split_message(text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.matches("```").count() % 2, 0, "unbalanced: {:?}", chunk);
        }
    }

    #[test]
    fn test_overlong_line_is_wrapped() {
        let channel = client(MAX_MESSAGE_LENGTH);

        let text = format!("intro\n{}", "a".repeat(4500));
        let chunks = channel.split_message(&text);

        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.len() <= MAX_MESSAGE_LENGTH), "{:?}", chunks.iter().map(String::len).collect::<Vec<_>>());
        assert_eq!(chunks.iter().map(|c| c.matches('a').count()).sum::<usize>(), 4500);
    }

    #[test]
    fn test_overlong_code_line_stays_fenced_and_bounded() {
        let channel = client(MAX_MESSAGE_LENGTH);

        let text = format!("```\n{}\n```", "é".repeat(1800));
        let chunks = channel.split_message(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= MAX_MESSAGE_LENGTH, "chunk of {} bytes", chunk.len());
            assert_eq!(chunk.matches("```").count() % 2, 0, "unbalanced: {:?}", chunk);
        }
        assert_eq!(chunks.iter().map(|c| c.matches('é').count()).sum::<usize>(), 1800);
    }

    #[test]
    fn test_wrap_line_prefers_spaces() {
        assert_eq!(wrap_line("hello brave world", 12), vec!["hello brave ", "world"]);
        assert_eq!(wrap_line("short", 12), vec!["short"]);
    }

    #[test]
    fn test_short_message_not_split() {
        let channel = client(MAX_MESSAGE_LENGTH);
        assert_eq!(channel.split_message("hello"), vec!["hello".to_string()]);
    }

    #[test]
    fn test_history_conversion() {
        let raw = serde_json::json!({
            "id": "10",
            "author": { "id": "bot", "username": "keeper", "global_name": null },
            "content": "",
            "referenced_message": {
                "id": "9",
                "author": { "id": "bot", "username": "keeper" },
                "content": "**Prompt:** hi\n**Model:** haiku"
            },
            "interaction_metadata": {
                "user": { "id": "42", "username": "alice", "global_name": "Alice A" }
            }
        });

        let message: DiscordMessage = serde_json::from_value(raw).unwrap();
        let history = message.into_history("keeper".to_string());

        assert_eq!(history.id, "10");
        assert_eq!(history.author_id, "bot");
        assert_eq!(history.referenced_content.as_deref(), Some("**Prompt:** hi\n**Model:** haiku"));
        assert_eq!(history.interaction_user.as_deref(), Some("Alice A"));
    }

    #[tokio::test]
    async fn test_display_name_precedence() {
        let channel = client(MAX_MESSAGE_LENGTH);

        let with_nick: DiscordMessage = serde_json::from_value(serde_json::json!({
            "id": "1",
            "author": { "id": "7", "username": "bob", "global_name": "Bobby" },
            "content": "x",
            "member": { "nick": "Captain" }
        }))
        .unwrap();
        assert_eq!(channel.display_name(&with_nick).await, "Captain");

        let without_nick: DiscordMessage = serde_json::from_value(serde_json::json!({
            "id": "2",
            "author": { "id": "8", "username": "carol", "global_name": null },
            "content": "x"
        }))
        .unwrap();
        assert_eq!(channel.display_name(&without_nick).await, "carol");
    }
}
