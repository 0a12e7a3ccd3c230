//! Anchor Message Parser
//!
//! The first message of every bot-managed conversation carries the original
//! prompt and selected model in a fixed template:
//!
//! ```text
//! **Prompt:** <prompt, may span lines>
//! **Model:** <model>
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ConversationError, Result};

pub const PROMPT_MARKER: &str = "**Prompt:**";
pub const MODEL_MARKER: &str = "**Model:**";

/// Placeholder author when the anchor's triggering user cannot be recovered
pub const DEFAULT_UNKNOWN_USER: &str = "User";

// Greedy prompt capture: a prompt quoting the model marker still parses
static ANCHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\*\*Prompt:\*\*(?P<prompt>.*)\*\*Model:\*\*(?P<model>[^\n]*)")
        .expect("anchor pattern is valid")
});

/// Fields recovered from an anchor message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorInfo {
    pub prompt: String,
    pub model: String,
    /// Raw (unsanitized) display name of the user who started the conversation
    pub user_name: String,
}

/// Stateless parser for anchor messages
#[derive(Debug, Clone)]
pub struct AnchorParser {
    unknown_user: String,
}

impl Default for AnchorParser {
    fn default() -> Self {
        Self::new(DEFAULT_UNKNOWN_USER)
    }
}

impl AnchorParser {
    pub fn new(unknown_user: impl Into<String>) -> Self {
        Self {
            unknown_user: unknown_user.into(),
        }
    }

    /// Render the anchor text for a new conversation
    pub fn render(prompt: &str, model: &str) -> String {
        format!("{} {}\n{} {}", PROMPT_MARKER, prompt.trim(), MODEL_MARKER, model.trim())
    }

    /// Extract prompt, model and original author from anchor text.
    ///
    /// `user_name` is the triggering user's display name when the platform
    /// exposes it alongside the message.
    pub fn parse(&self, text: &str, user_name: Option<&str>) -> Result<AnchorInfo> {
        if !text.contains(PROMPT_MARKER) {
            return Err(ConversationError::AnchorUnparseable(
                "missing prompt marker".to_string(),
            ));
        }

        let caps = ANCHOR_RE.captures(text).ok_or_else(|| {
            ConversationError::AnchorUnparseable("missing model marker".to_string())
        })?;

        let prompt = caps.name("prompt").map_or("", |m| m.as_str()).trim();
        let model = caps.name("model").map_or("", |m| m.as_str()).trim();

        if prompt.is_empty() {
            return Err(ConversationError::AnchorUnparseable("empty prompt".to_string()));
        }
        if model.is_empty() {
            return Err(ConversationError::AnchorUnparseable("empty model".to_string()));
        }

        let user_name = user_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.unknown_user);

        Ok(AnchorInfo {
            prompt: prompt.to_string(),
            model: model.to_string(),
            user_name: user_name.to_string(),
        })
    }
}
