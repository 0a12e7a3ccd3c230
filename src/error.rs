//! Error types shared by the conversation core and its adapters.

/// Errors surfaced by the conversation cache, reconstruction and orchestration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConversationError {
    #[error("Invalid {what} capacity: {size} (must be > 0)")]
    InvalidCapacity { what: &'static str, size: usize },

    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("Anchor message unparseable: {0}")]
    AnchorUnparseable(String),

    #[error("History fetch failed: {0}")]
    History(String),

    #[error("Completion failed: {0}")]
    Completion(String),

    #[error("Notify failed: {0}")]
    Notify(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ConversationError>;
