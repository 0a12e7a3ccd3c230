//! History Reconstruction
//!
//! Rebuilds a conversation record from the platform's durable history when
//! the cache never held it or evicted it. Only conversations anchored by a
//! bot-authored, parseable anchor message are managed; everything else is
//! remembered in the negative cache so it is not re-fetched on every message.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::anchor::AnchorParser;
use crate::conversation::{ChatMessage, ConversationCache, ConversationRecord};
use crate::error::Result;
use crate::names::sanitize;
use crate::negative::NegativeSet;
use crate::traits::{BotIdentity, HistoryMessage, HistorySource};

/// Messages requested per history page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Outcome of a reconstruction attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconstruction {
    /// Conversation rebuilt and cached
    Rebuilt(ConversationRecord),
    /// The platform returned no history at all
    Empty,
    /// Not started by this bot, or the anchor could not be parsed
    Unmanaged,
}

/// Replays platform history into the conversation cache
pub struct HistoryReconstructor {
    source: Arc<dyn HistorySource>,
    parser: AnchorParser,
    bot: BotIdentity,
    cache: Arc<ConversationCache>,
    negative: Arc<NegativeSet>,
    page_size: usize,
}

impl HistoryReconstructor {
    pub fn new(
        source: Arc<dyn HistorySource>,
        parser: AnchorParser,
        bot: BotIdentity,
        cache: Arc<ConversationCache>,
        negative: Arc<NegativeSet>,
    ) -> Self {
        Self {
            source,
            parser,
            bot,
            cache,
            negative,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Rebuild `conversation_id`, skipping `trigger_id` (the message being handled).
    ///
    /// History fetch failures are returned as errors without touching either cache.
    pub async fn reconstruct(&self, conversation_id: &str, trigger_id: &str) -> Result<Reconstruction> {
        let history = self.fetch_all(conversation_id).await?;

        let Some(anchor) = history.first() else {
            debug!(conversation_id, "No history, not our conversation");
            return Ok(Reconstruction::Empty);
        };

        if anchor.author_id != self.bot.user_id {
            info!(
                conversation_id,
                author_id = %anchor.author_id,
                "Conversation not started by this bot"
            );
            self.mark_unmanaged(conversation_id);
            return Ok(Reconstruction::Unmanaged);
        }

        // Reply-style anchors keep their text on the referenced message
        let anchor_text = if anchor.content.trim().is_empty() {
            anchor.referenced_content.as_deref().unwrap_or("")
        } else {
            anchor.content.as_str()
        };

        let info = match self
            .parser
            .parse(anchor_text, anchor.interaction_user.as_deref())
        {
            Ok(info) => info,
            Err(e) => {
                warn!(conversation_id, error = %e, "Anchor message unparseable");
                self.mark_unmanaged(conversation_id);
                return Ok(Reconstruction::Unmanaged);
            }
        };

        let bot_name = sanitize(&self.bot.display_name);
        let mut messages = Vec::with_capacity(history.len());
        messages.push(ChatMessage::user(info.prompt, sanitize(&info.user_name)));

        for msg in history.iter().skip(1) {
            if msg.id == trigger_id || msg.content.trim().is_empty() {
                continue;
            }

            if msg.author_id == self.bot.user_id {
                messages.push(ChatMessage::assistant(msg.content.clone(), bot_name.clone()));
            } else {
                messages.push(ChatMessage::user(msg.content.clone(), sanitize(&msg.author_name)));
            }
        }

        info!(
            conversation_id,
            messages = messages.len(),
            model = %info.model,
            "Reconstructed conversation from history"
        );

        self.negative.remove(conversation_id);
        self.cache.replace(conversation_id, messages.clone(), &info.model);

        Ok(Reconstruction::Rebuilt(ConversationRecord::new(messages, info.model)))
    }

    /// Page backwards through the full history, returning it oldest first
    async fn fetch_all(&self, conversation_id: &str) -> Result<Vec<HistoryMessage>> {
        let mut all: Vec<HistoryMessage> = Vec::new();
        let mut pages = 0usize;

        loop {
            let page = match all.last() {
                None => self.source.fetch_latest(conversation_id, self.page_size).await?,
                Some(oldest) => {
                    self.source
                        .fetch_before(conversation_id, &oldest.id, self.page_size)
                        .await?
                }
            };
            pages += 1;

            let len = page.len();
            all.extend(page);

            if len < self.page_size {
                break;
            }
        }

        debug!(conversation_id, pages, messages = all.len(), "Fetched history");

        all.reverse();
        Ok(all)
    }

    fn mark_unmanaged(&self, conversation_id: &str) {
        self.cache.remove(conversation_id);
        self.negative.add(conversation_id);
    }
}
