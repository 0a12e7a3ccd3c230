//! Threadkeeper
//!
//! Conversation state cache between an event-driven chat client and a
//! hosted language model.
//!
//! # Features
//!
//! - **Bounded Caches**: LRU conversation cache + negative cache of unmanaged threads
//! - **Single-Flight**: at most one completion per conversation, newest message wins
//! - **Reconstruction**: paginated history replay when the cache lost a conversation
//! - **Anchor Parsing**: prompt/model recovery from the thread's first message
//!
//! # Architecture
//!
//! ```text
//! Gateway ──► Relay (stdio) ──► Orchestrator ──► Claude API
//!                                   │
//!                                   ├── Coordinator (keyed locks + cancellation)
//!                                   ├── ConversationCache (LRU)
//!                                   ├── NegativeSet (LRU)
//!                                   └── Reconstructor ──► Discord history
//!                                          └── AnchorParser
//! ```

pub mod anchor;
pub mod cache;
pub mod claude;
pub mod config;
pub mod conversation;
pub mod coordinator;
pub mod discord;
pub mod error;
pub mod names;
pub mod negative;
pub mod orchestrator;
pub mod reconstruct;
pub mod relay;
pub mod traits;

pub use anchor::{AnchorInfo, AnchorParser};
pub use cache::{BoundedCache, CacheStats};
pub use claude::ClaudeClient;
pub use config::Config;
pub use conversation::{ChatMessage, ConversationCache, ConversationRecord, Role};
pub use coordinator::ConcurrencyCoordinator;
pub use discord::{DiscordClient, DiscordConfig};
pub use error::{ConversationError, Result};
pub use negative::NegativeSet;
pub use orchestrator::{ConversationOrchestrator, FollowUp, NewConversation, Outcome};
pub use reconstruct::{HistoryReconstructor, Reconstruction};
pub use relay::{InboundEvent, Relay};
pub use traits::{
    BotIdentity, Completion, CompletionOutcome, CompletionProvider, HistoryMessage,
    HistorySource, OutboundNotifier, Usage,
};
