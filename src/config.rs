//! Configuration management

use std::str::FromStr;

use crate::anchor::DEFAULT_UNKNOWN_USER;
use crate::conversation::DEFAULT_CACHE_CAPACITY;
use crate::error::{ConversationError, Result};
use crate::negative::DEFAULT_NEGATIVE_CAPACITY;
use crate::reconstruct::DEFAULT_PAGE_SIZE;

/// Discord rejects history requests above this page size
const MAX_PAGE_SIZE: usize = 100;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Anthropic API key (required for completions)
    pub anthropic_api_key: Option<String>,

    /// Discord bot token (required for history and replies)
    pub discord_bot_token: Option<String>,

    /// The bot's own user ID; anchors authored by anyone else are ignored
    pub bot_user_id: String,

    /// The bot's display name on assistant turns
    pub bot_name: String,

    /// Conversations kept in memory
    pub cache_capacity: usize,

    /// Unmanaged conversation IDs remembered
    pub negative_capacity: usize,

    /// Messages per history page during reconstruction
    pub page_size: usize,

    /// Model used when none (or a disallowed one) is requested
    pub default_model: String,

    /// Models users may request; the default model is always allowed
    pub models: Vec<String>,

    /// Author name used when the anchor's user cannot be recovered
    pub unknown_user: String,

    /// Generate a title for new conversations
    pub titles_enabled: bool,

    /// Deadline attached to every inbound request
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            discord_bot_token: None,
            bot_user_id: String::new(),
            bot_name: "Threadkeeper".to_string(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            negative_capacity: DEFAULT_NEGATIVE_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
            default_model: "sonnet".to_string(),
            models: vec!["haiku".to_string(), "sonnet".to_string(), "opus".to_string()],
            unknown_user: DEFAULT_UNKNOWN_USER.to_string(),
            titles_enabled: true,
            request_timeout_secs: 120,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let default_model = std::env::var("THREADKEEPER_DEFAULT_MODEL")
            .unwrap_or(defaults.default_model);

        let models = std::env::var("THREADKEEPER_MODELS")
            .map(|s| {
                s.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.models);

        let config = Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            discord_bot_token: std::env::var("DISCORD_BOT_TOKEN").ok(),
            bot_user_id: std::env::var("DISCORD_BOT_USER_ID").unwrap_or_default(),
            bot_name: std::env::var("DISCORD_BOT_NAME").unwrap_or(defaults.bot_name),
            cache_capacity: env_or("THREADKEEPER_CACHE_CAPACITY", defaults.cache_capacity)?,
            negative_capacity: env_or("THREADKEEPER_NEGATIVE_CAPACITY", defaults.negative_capacity)?,
            page_size: env_or("THREADKEEPER_PAGE_SIZE", defaults.page_size)?
                .clamp(1, MAX_PAGE_SIZE),
            default_model,
            models,
            unknown_user: std::env::var("THREADKEEPER_UNKNOWN_USER")
                .unwrap_or(defaults.unknown_user),
            titles_enabled: std::env::var("THREADKEEPER_TITLES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.titles_enabled),
            request_timeout_secs: env_or(
                "THREADKEEPER_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the components cannot be built from
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(ConversationError::InvalidCapacity {
                what: "conversation cache",
                size: 0,
            });
        }
        if self.negative_capacity == 0 {
            return Err(ConversationError::InvalidCapacity {
                what: "negative cache",
                size: 0,
            });
        }
        if self.default_model.trim().is_empty() {
            return Err(ConversationError::Config("default model is empty".to_string()));
        }
        Ok(())
    }

    /// Pick the requested model when allowed, otherwise the default
    pub fn select_model(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|m| *m == self.default_model || self.models.iter().any(|allowed| allowed.as_str() == *m))
            .unwrap_or(self.default_model.as_str())
            .to_string()
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConversationError::Config(format!("{} has invalid value {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}
