use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifies one process instance. Supplied by the embedder or minted
/// with [`generate_server_id`].
pub type ServerId = String;

/// A logical document. Absent in durable storage means the empty object.
pub type Document = Value;

/// A partial delta over a document. The empty object `{}` is the
/// delete-this-field sentinel (see [`crate::diff`]).
pub type Diff = Value;

/// Mint a fresh process identity (v4 UUID).
pub fn generate_server_id() -> ServerId {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Per-key ownership descriptor, persisted in the ephemeral lease store.
///
/// `owner` is the process currently responsible for flushing the key's
/// commits; `last_ack` is the last time it proved liveness; `last_save`
/// is the last time it successfully flushed to durable storage. Never
/// explicitly deleted - the store's own TTL garbage-collects idle records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaseRecord {
    pub owner: ServerId,
    pub last_ack: i64,
    pub last_save: i64,
}

impl LeaseRecord {
    pub fn new(owner: ServerId, last_ack: i64, last_save: i64) -> Self {
        Self {
            owner,
            last_ack,
            last_save,
        }
    }

    /// Whether the owner has missed acknowledgments long enough for the
    /// lease to be stealable.
    pub fn is_expired(&self, now: i64, lock_death_ms: i64) -> bool {
        now.saturating_sub(self.last_ack) >= lock_death_ms
    }
}

/// A pending diff appended to a key's commit queue, immutable once queued.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Commit {
    pub author: ServerId,
    pub time: i64,
    pub diff: Diff,
}

impl std::fmt::Debug for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commit")
            .field("author", &self.author)
            .field("time", &self.time)
            .field("diff", &self.diff.to_string())
            .finish()
    }
}

impl Commit {
    pub fn new(author: ServerId, time: i64, diff: Diff) -> Self {
        Self { author, time, diff }
    }
}
