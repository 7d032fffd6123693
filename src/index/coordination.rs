//! Mutation coordination for the index engine
//!
//! Three pieces cooperate here:
//! - [`ShardedLocks`] serialise mutations of the same document id while
//!   leaving different ids independent.
//! - [`RefreshBarrier`] hands out numbered [`MutationTicket`]s and lets
//!   `refresh` wait for every ticket issued before it, without blocking
//!   tickets issued after it.
//! - [`Lifecycle`] records the transient state of documents being mutated.
//!
//! Tickets and lifecycle guards release on drop, so a cancelled mutation
//! never leaves a document stuck in `indexing` or `removing`.

use ahash::{AHashMap, RandomState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::BuildHasher;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, Notify};

/// Per-document index lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    Absent,
    Indexing,
    Visible,
    Updating,
    Removing,
}

/// Fixed pool of async mutexes selected by id hash
pub struct ShardedLocks {
    shards: Vec<AsyncMutex<()>>,
    hasher: RandomState,
}

impl ShardedLocks {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| AsyncMutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard_of(&self, id: &str) -> usize {
        (self.hasher.hash_one(id) % self.shards.len() as u64) as usize
    }

    /// Wait for exclusive access to `id`'s shard
    pub async fn lock(&self, id: &str) -> AsyncMutexGuard<'_, ()> {
        self.shards[self.shard_of(id)].lock().await
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    next_ticket: u64,
    in_flight: BTreeSet<u64>,
}

/// Near-real-time refresh barrier
#[derive(Debug, Default)]
pub struct RefreshBarrier {
    state: Mutex<BarrierState>,
    completed: Notify,
}

impl RefreshBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mutation; it is pending until the ticket drops
    pub fn enter(self: &Arc<Self>) -> MutationTicket {
        let mut state = self.lock_state();
        let sequence = state.next_ticket;
        state.next_ticket += 1;
        state.in_flight.insert(sequence);

        MutationTicket {
            sequence,
            barrier: Arc::clone(self),
        }
    }

    /// Wait until every mutation registered before this call has finished
    pub async fn wait(&self) {
        let target = self.lock_state().next_ticket;

        loop {
            // Registered before the check so a completion in between is not lost
            let notified = self.completed.notified();
            if self.is_settled(target) {
                return;
            }
            notified.await;
        }
    }

    /// Number of mutations currently in flight
    pub fn pending(&self) -> usize {
        self.lock_state().in_flight.len()
    }

    fn is_settled(&self, target: u64) -> bool {
        match self.lock_state().in_flight.first() {
            Some(&oldest) => oldest >= target,
            None => true,
        }
    }

    fn complete(&self, sequence: u64) {
        self.lock_state().in_flight.remove(&sequence);
        self.completed.notify_waiters();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BarrierState> {
        // The guarded section never panics; recover the data if it ever did
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Pending mutation registration; completes on drop
#[derive(Debug)]
pub struct MutationTicket {
    sequence: u64,
    barrier: Arc<RefreshBarrier>,
}

impl MutationTicket {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for MutationTicket {
    fn drop(&mut self) {
        self.barrier.complete(self.sequence);
    }
}

/// Transient states of documents with a mutation in progress
#[derive(Debug, Default)]
pub struct Lifecycle {
    transient: Mutex<AHashMap<String, DocumentState>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as being mutated until the guard drops
    pub fn begin(self: &Arc<Self>, id: &str, state: DocumentState) -> LifecycleGuard {
        self.lock_states().insert(id.to_string(), state);
        LifecycleGuard {
            id: id.to_string(),
            lifecycle: Arc::clone(self),
        }
    }

    /// Transient state of `id`, if a mutation is in progress
    pub fn transient(&self, id: &str) -> Option<DocumentState> {
        self.lock_states().get(id).copied()
    }

    fn finish(&self, id: &str) {
        self.lock_states().remove(id);
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, AHashMap<String, DocumentState>> {
        self.transient
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears a transient lifecycle state on drop
#[derive(Debug)]
pub struct LifecycleGuard {
    id: String,
    lifecycle: Arc<Lifecycle>,
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        self.lifecycle.finish(&self.id);
    }
}
