//! Conversation Coordinator
//!
//! Per-conversation single-flight execution:
//! - Keyed mutual exclusion (no two requests for a conversation overlap)
//! - Cancel-predecessor semantics (a newer message supersedes, never queues
//!   behind, the in-flight completion)
//! - Cleanup of the lock and cancellation registration on every exit path
//!
//! Distinct conversations never contend: both registries are sharded maps
//! with per-key fetch-and-replace / create-if-absent operations.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cancellation handle of an in-flight request
#[derive(Debug, Clone)]
struct PendingRequest {
    generation: u64,
    token: CancellationToken,
}

/// Keyed lock manager with single-flight cancellation
#[derive(Debug, Default)]
pub struct ConcurrencyCoordinator {
    locks: DashMap<String, Arc<Mutex<()>>>,
    pending: DashMap<String, PendingRequest>,
    generation: AtomicU64,
}

impl ConcurrencyCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `body` for `conversation_id` as the only request in flight.
    ///
    /// Any predecessor is signalled to cancel immediately; `body` starts once
    /// the predecessor has unwound and released the conversation lock. The
    /// token handed to `body` is a child of `parent` and fires when the parent
    /// does or when a newer request for the same conversation arrives.
    pub async fn run<F, Fut, T>(&self, conversation_id: &str, parent: &CancellationToken, body: F) -> T
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let token = parent.child_token();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        // Swap in our handle and cancel whoever held the slot, whether it is
        // running or still waiting for the lock
        let previous = self.pending.insert(
            conversation_id.to_string(),
            PendingRequest {
                generation,
                token: token.clone(),
            },
        );
        let registration = Registration {
            coordinator: self,
            conversation_id,
            generation,
            token: token.clone(),
        };
        if let Some(previous) = previous {
            info!(conversation_id, "Superseding in-flight request");
            previous.token.cancel();
        }

        let lock = self
            .locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        debug!(conversation_id, generation, "Conversation lock acquired");

        let _flight = Flight {
            registration,
            guard: Some(guard),
        };

        body(token).await
    }

    /// Number of conversations with a registered in-flight request
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Whether `conversation_id` has a registered in-flight request
    pub fn is_in_flight(&self, conversation_id: &str) -> bool {
        self.pending.contains_key(conversation_id)
    }

    /// Number of conversation locks currently held or awaited
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    /// Drop the lock of a conversation nobody holds or waits on.
    ///
    /// Clones of the lock are only taken under the map's shard lock, so a
    /// strong count of one means no task can still reach it.
    fn prune_lock(&self, conversation_id: &str) {
        self.locks
            .remove_if(conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Pending-slot registration; unregisters even when dropped while waiting for the lock
struct Registration<'a> {
    coordinator: &'a ConcurrencyCoordinator,
    conversation_id: &'a str,
    generation: u64,
    token: CancellationToken,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.token.cancel();

        // A newer request may already own the slot
        let generation = self.generation;
        self.coordinator
            .pending
            .remove_if(self.conversation_id, |_, pending| pending.generation == generation);
    }
}

/// A request holding the conversation lock; releases everything on drop, including unwinds
struct Flight<'a> {
    registration: Registration<'a>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let conversation_id = self.registration.conversation_id;

        drop(self.guard.take());
        self.registration.coordinator.prune_lock(conversation_id);

        debug!(
            conversation_id,
            generation = self.registration.generation,
            "Conversation lock released"
        );
    }
}
