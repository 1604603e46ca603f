use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Position of an entry in the replicated log. Index 0 is never assigned;
/// it stands for "nothing committed yet".
pub type LogIndex = u64;

/// An operation to be replicated.
///
/// `kind` names the effect registered in the [`super::registry::EffectRegistry`];
/// `payload` is opaque to the cluster core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: String,
    pub payload: Vec<u8>,
}

impl Operation {
    pub fn new(kind: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// Builds an operation whose payload is `value` encoded as JSON.
    pub fn json<T: Serialize>(kind: impl Into<String>, value: &T) -> serde_json::Result<Self> {
        Ok(Self {
            kind: kind.into(),
            payload: serde_json::to_vec(value)?,
        })
    }

    /// Decodes a JSON payload built with [`Operation::json`].
    pub fn decode_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    /// Proposed, waiting for the originator's COMMIT.
    Pending,
    /// Final; the effect has been applied on this node.
    Committed,
}

/// A single entry in the local copy of the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: LogIndex,
    pub operation: Operation,
    pub state: EntryState,
}

impl LogEntry {
    pub fn pending(index: LogIndex, operation: Operation) -> Self {
        Self {
            index,
            operation,
            state: EntryState::Pending,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state == EntryState::Committed
    }
}

/// What a commit request did to the local log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The entry moved to COMMITTED and its effect ran.
    Applied,
    /// The entry was already COMMITTED; nothing ran.
    AlreadyCommitted,
    /// No entry yet; the commit is remembered and applied on append.
    Deferred,
}

/// What an append request did to the local log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored as PENDING.
    Stored,
    /// The same operation was already stored at this index.
    Duplicate,
    /// Stored and immediately committed because a COMMIT arrived first.
    CommittedFromIntent,
}
