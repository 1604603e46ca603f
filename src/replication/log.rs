//! Replicated Log
//!
//! The local copy of the operation history. Entries arrive as PENDING from
//! APPEND_PENDING messages (in any order) and move to COMMITTED exactly once,
//! at which point the registered effect runs.
//!
//! ## Concurrency
//! All index-map mutations happen under a single lock, so an append and a
//! racing commit for the same index cannot lose each other. Effects run
//! after the lock is released: the thread that performed the
//! PENDING -> COMMITTED transition is the only one that applies it.

use super::registry::EffectRegistry;
use super::types::*;
use crate::error::{ClusterError, ClusterResult};

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct LogState {
    entries: BTreeMap<LogIndex, LogEntry>,
    /// COMMITs that arrived before their APPEND_PENDING.
    commit_intents: BTreeSet<LogIndex>,
}

pub struct ReplicatedLog {
    state: Mutex<LogState>,
    effects: Arc<EffectRegistry>,
    last_committed: AtomicU64,
    highest_index: AtomicU64,
}

impl ReplicatedLog {
    pub fn new(effects: Arc<EffectRegistry>) -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            effects,
            last_committed: AtomicU64::new(0),
            highest_index: AtomicU64::new(0),
        }
    }

    pub fn effects(&self) -> &Arc<EffectRegistry> {
        &self.effects
    }

    /// Stores `operation` as PENDING at `index`.
    ///
    /// Re-appending the identical operation is a no-op so retried
    /// APPEND_PENDING messages can be acknowledged again. If a COMMIT for
    /// `index` arrived earlier, the entry is committed right away.
    pub fn append_pending(&self, index: LogIndex, operation: Operation) -> ClusterResult<AppendOutcome> {
        if index == 0 {
            return Err(ClusterError::UnknownIndex { index });
        }

        let committed = {
            let mut state = self.state.lock();

            if let Some(existing) = state.entries.get(&index) {
                if existing.operation == operation {
                    return Ok(AppendOutcome::Duplicate);
                }
                tracing::warn!(
                    "Index {} already holds '{}', rejecting '{}'",
                    index,
                    existing.operation.kind,
                    operation.kind
                );
                return Err(ClusterError::DuplicateIndex { index });
            }

            let mut entry = LogEntry::pending(index, operation);
            let deferred = state.commit_intents.remove(&index);
            if deferred {
                entry.state = EntryState::Committed;
            }
            state.entries.insert(index, entry.clone());
            self.highest_index.fetch_max(index, Ordering::SeqCst);

            deferred.then_some(entry)
        };

        match committed {
            Some(entry) => {
                tracing::debug!("Index {} committed on arrival (commit intent)", index);
                self.apply(&entry);
                Ok(AppendOutcome::CommittedFromIntent)
            }
            None => {
                tracing::debug!("Stored index {} as pending", index);
                Ok(AppendOutcome::Stored)
            }
        }
    }

    /// Commits the PENDING entry at `index` and applies its effect before
    /// returning. Committing an already COMMITTED index does nothing.
    pub fn commit(&self, index: LogIndex) -> ClusterResult<CommitOutcome> {
        self.commit_inner(index, false)
    }

    /// Like [`commit`](Self::commit), but a missing entry is remembered as a
    /// commit intent instead of being rejected. Used for COMMIT messages,
    /// which may overtake their APPEND_PENDING on the wire.
    pub fn commit_or_defer(&self, index: LogIndex) -> ClusterResult<CommitOutcome> {
        self.commit_inner(index, true)
    }

    fn commit_inner(&self, index: LogIndex, defer_missing: bool) -> ClusterResult<CommitOutcome> {
        let entry = {
            let mut guard = self.state.lock();
            let LogState {
                entries,
                commit_intents,
            } = &mut *guard;

            match entries.get_mut(&index) {
                Some(entry) if entry.is_committed() => return Ok(CommitOutcome::AlreadyCommitted),
                Some(entry) => {
                    entry.state = EntryState::Committed;
                    entry.clone()
                }
                None if defer_missing && index > 0 => {
                    commit_intents.insert(index);
                    tracing::debug!("Commit for unknown index {} deferred", index);
                    return Ok(CommitOutcome::Deferred);
                }
                None => return Err(ClusterError::UnknownIndex { index }),
            }
        };

        self.apply(&entry);
        Ok(CommitOutcome::Applied)
    }

    fn apply(&self, entry: &LogEntry) {
        if let Err(e) = self.effects.apply(entry) {
            tracing::error!(
                "Effect '{}' failed at index {}: {}",
                entry.operation.kind,
                entry.index,
                e
            );
        }
        self.last_committed.fetch_max(entry.index, Ordering::SeqCst);
        tracing::info!("Committed index {} ('{}')", entry.index, entry.operation.kind);
    }

    /// Highest COMMITTED index, `0` if none.
    pub fn last_committed_index(&self) -> LogIndex {
        self.last_committed.load(Ordering::SeqCst)
    }

    /// Highest index ever stored, pending or committed.
    pub fn highest_index(&self) -> LogIndex {
        self.highest_index.load(Ordering::SeqCst)
    }

    pub fn entry(&self, index: LogIndex) -> Option<LogEntry> {
        self.state.lock().entries.get(&index).cloned()
    }

    pub fn is_committed(&self, index: LogIndex) -> bool {
        self.state
            .lock()
            .entries
            .get(&index)
            .map(|entry| entry.is_committed())
            .unwrap_or(false)
    }

    /// Indices stored but not yet committed, ascending.
    pub fn pending_indices(&self) -> Vec<LogIndex> {
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| !entry.is_committed())
            .map(|entry| entry.index)
            .collect()
    }

    /// Indices with a COMMIT waiting for its entry, ascending.
    pub fn deferred_commits(&self) -> Vec<LogIndex> {
        self.state.lock().commit_intents.iter().copied().collect()
    }

    /// Committed entries in index order.
    pub fn committed_entries(&self) -> Vec<LogEntry> {
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| entry.is_committed())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
