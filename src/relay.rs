//! Inbound Event Relay
//!
//! Reads newline-delimited JSON events from the gateway process (stdio) and
//! hands each one to the orchestrator in its own task.
//!
//! ```text
//! {"type":"new","conversation_id":"1","prompt":"Hi","user_name":"alice"}
//! {"type":"message","conversation_id":"1","message_id":"9","content":"More","user_name":"alice"}
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::orchestrator::{ConversationOrchestrator, FollowUp, NewConversation, Outcome};

/// Event emitted by the chat gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    New(NewConversation),
    Message(FollowUp),
}

impl InboundEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::New(request) => &request.conversation_id,
            Self::Message(message) => &message.conversation_id,
        }
    }
}

/// Dispatches inbound events with a per-request deadline
pub struct Relay {
    orchestrator: Arc<ConversationOrchestrator>,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl Relay {
    pub fn new(orchestrator: Arc<ConversationOrchestrator>, request_timeout: Duration) -> Self {
        Self {
            orchestrator,
            request_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that cancels every in-flight request when fired
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Process events until EOF, then wait for in-flight requests to finish
    pub async fn run<R>(&self, reader: R) -> anyhow::Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut tasks = JoinSet::new();
        let mut dispatched = 0usize;

        info!("Relay ready, waiting for events...");

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event: InboundEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Skipping malformed event: {}", e);
                    continue;
                }
            };

            debug!(conversation_id = event.conversation_id(), "Dispatching event");
            tasks.spawn(handle_event(
                self.orchestrator.clone(),
                self.shutdown.child_token(),
                self.request_timeout,
                event,
            ));
            dispatched += 1;

            // Reap finished tasks so the set does not grow unbounded
            while let Some(result) = tasks.try_join_next() {
                log_join(result);
            }
        }

        info!("Input closed, draining {} in-flight requests", tasks.len());
        while let Some(result) = tasks.join_next().await {
            log_join(result);
        }

        Ok(dispatched)
    }
}

/// Handle one event under `scope`; the deadline cancels cooperatively
async fn handle_event(
    orchestrator: Arc<ConversationOrchestrator>,
    scope: CancellationToken,
    timeout: Duration,
    event: InboundEvent,
) -> Result<Outcome> {
    let conversation_id = event.conversation_id().to_string();

    let work = async {
        match event {
            InboundEvent::New(request) => orchestrator.start_conversation(&scope, request).await,
            InboundEvent::Message(message) => orchestrator.handle_message(&scope, message).await,
        }
    };
    tokio::pin!(work);

    let timed = tokio::time::timeout(timeout, &mut work).await;
    let result = match timed {
        Ok(result) => result,
        Err(_) => {
            // Let the request observe cancellation and unwind through the coordinator
            warn!(conversation_id = %conversation_id, "Request deadline exceeded");
            scope.cancel();
            work.await
        }
    };

    match &result {
        Ok(outcome) => debug!(conversation_id = %conversation_id, ?outcome, "Request finished"),
        Err(e) => error!(conversation_id = %conversation_id, error = %e, "Request failed"),
    }

    result
}

fn log_join(result: std::result::Result<Result<Outcome>, tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("Request task aborted: {}", e);
    }
}
