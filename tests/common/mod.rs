//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use threadkeeper::{
    AnchorParser, ChatMessage, Completion, CompletionOutcome, CompletionProvider, Config,
    ConversationError, ConversationOrchestrator, HistoryMessage, HistorySource, OutboundNotifier,
    Result, Usage,
};
use tokio_util::sync::CancellationToken;

pub const BOT_ID: &str = "bot-1";
pub const BOT_NAME: &str = "Thread Keeper";

/// Completion provider that answers "reply to: <last message>".
///
/// Messages containing "slow" take `slow_delay`; every call honors cancellation.
pub struct FakeProvider {
    pub slow_delay: Duration,
    pub fail: bool,
    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub events: Mutex<Vec<String>>,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            slow_delay: Duration::from_millis(200),
            fail: false,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with_delay(slow_delay: Duration) -> Self {
        Self {
            slow_delay,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl CompletionProvider for FakeProvider {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        _model: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.seen.lock().push(messages.to_vec());

        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.events.lock().push(format!("start {}", last));

        let delay = if last.contains("slow") {
            self.slow_delay
        } else {
            Duration::from_millis(1)
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                self.events.lock().push(format!("canceled {}", last));
                Ok(CompletionOutcome::Canceled)
            }
            _ = tokio::time::sleep(delay) => {
                if self.fail {
                    Err(ConversationError::Completion("provider unavailable".to_string()))
                } else {
                    Ok(CompletionOutcome::Completed(Completion {
                        text: format!("reply to: {}", last),
                        usage: Usage { input_tokens: messages.len(), output_tokens: 1 },
                    }))
                }
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// History stored oldest first, served newest first in pages
pub struct FakeHistory {
    pub messages: Mutex<Vec<HistoryMessage>>,
    pub fetches: AtomicUsize,
    pub fail: bool,
    pub delay: Duration,
}

impl FakeHistory {
    pub fn new(messages: Vec<HistoryMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
            fetches: AtomicUsize::new(0),
            fail: false,
            delay: Duration::ZERO,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::empty()
        }
    }

    /// Answer every fetch after `delay`
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn page(&self, end: Option<usize>, limit: usize) -> Result<Vec<HistoryMessage>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ConversationError::History("gateway timeout".to_string()));
        }
        let messages = self.messages.lock();
        let end = end.unwrap_or(messages.len());
        let start = end.saturating_sub(limit);
        Ok(messages[start..end].iter().rev().cloned().collect())
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn fetch_latest(&self, _conversation_id: &str, limit: usize) -> Result<Vec<HistoryMessage>> {
        tokio::time::sleep(self.delay).await;
        self.page(None, limit)
    }

    async fn fetch_before(
        &self,
        _conversation_id: &str,
        before: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>> {
        tokio::time::sleep(self.delay).await;
        let end = self.messages.lock().iter().position(|m| m.id == before);
        self.page(Some(end.unwrap_or(0)), limit)
    }
}

/// Records everything sent back to conversations
#[derive(Default)]
pub struct FakeNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
    pub titles: Mutex<Vec<(String, String)>>,
}

impl FakeNotifier {
    pub fn sent_to(&self, conversation_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| id == conversation_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl OutboundNotifier for FakeNotifier {
    async fn send(&self, conversation_id: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .push((conversation_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn set_title(&self, conversation_id: &str, title: &str) -> Result<()> {
        self.titles
            .lock()
            .push((conversation_id.to_string(), title.to_string()));
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config {
        bot_user_id: BOT_ID.to_string(),
        bot_name: BOT_NAME.to_string(),
        models: vec!["m1".to_string(), "m2".to_string()],
        default_model: "m1".to_string(),
        titles_enabled: false,
        ..Config::default()
    }
}

pub struct Harness {
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub provider: Arc<FakeProvider>,
    pub history: Arc<FakeHistory>,
    pub notifier: Arc<FakeNotifier>,
}

pub fn harness(config: Config, provider: FakeProvider, history: FakeHistory) -> Harness {
    let provider = Arc::new(provider);
    let history = Arc::new(history);
    let notifier = Arc::new(FakeNotifier::default());

    let orchestrator = ConversationOrchestrator::new(
        config,
        provider.clone(),
        history.clone(),
        notifier.clone(),
    )
    .expect("valid test config");

    Harness {
        orchestrator: Arc::new(orchestrator),
        provider,
        history,
        notifier,
    }
}

pub fn history_message(id: usize, author_id: &str, content: &str) -> HistoryMessage {
    HistoryMessage {
        id: id.to_string(),
        author_id: author_id.to_string(),
        author_name: format!("{} name", author_id),
        content: content.to_string(),
        ..Default::default()
    }
}

/// A bot-anchored thread with `total` messages (anchor included)
pub fn bot_thread(total: usize, model: &str) -> Vec<HistoryMessage> {
    let mut anchor = history_message(0, BOT_ID, &AnchorParser::render("original prompt", model));
    anchor.interaction_user = Some("alice".to_string());

    let mut messages = vec![anchor];
    for i in 1..total {
        let author = if i % 2 == 1 { "user-1" } else { BOT_ID };
        messages.push(history_message(i, author, &format!("message {}", i)));
    }
    messages
}

/// Poll `check` until it holds or a second passes
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
