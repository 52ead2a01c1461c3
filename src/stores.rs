use std::future::Future;
use std::time::Duration;

use anyhow::Result;

use crate::types::{Commit, Document, LeaseRecord};

/// Outcome of a conditional lease update.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseUpdate {
    /// Persist this record (refreshing its TTL).
    Write(LeaseRecord),
    /// Remove the record.
    Clear,
    /// Leave whatever is stored untouched.
    Keep,
}

/// Slow, rate-limited durable store holding one canonical document per key.
///
/// `atomic_update` applies `update` as a read-modify-write with the store's
/// own conflict retry, so `update` must be a pure function of the current
/// value - it may be invoked more than once per call.
pub trait DocumentStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Document>>> + Send;

    fn atomic_update<F>(&self, key: &str, update: F) -> impl Future<Output = Result<Document>> + Send
    where
        F: Fn(Option<Document>) -> Document + Send + Sync;
}

/// Low-latency ephemeral keyed store holding lease records.
///
/// `atomic_update` runs `update` against the current record under the
/// store's per-key atomicity; [`LeaseUpdate::Keep`] makes the call a no-op.
/// Returns the record as stored after the call. Like the document store,
/// `update` may be re-invoked on conflict.
pub trait LeaseStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<LeaseRecord>>> + Send;

    fn atomic_update<F>(
        &self,
        key: &str,
        update: F,
        ttl: Duration,
    ) -> impl Future<Output = Result<Option<LeaseRecord>>> + Send
    where
        F: Fn(Option<LeaseRecord>) -> LeaseUpdate + Send + Sync;
}

/// Ephemeral bounded FIFO of pending commits, one queue per key.
///
/// Capacity enforcement is the implementation's: once full, the oldest
/// entries are dropped to admit new ones. `peek` never removes entries, so
/// concurrent readers observe the same pending commits.
pub trait CommitQueue: Send + Sync + 'static {
    fn append(
        &self,
        key: &str,
        commit: Commit,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Up to `max` entries, oldest first.
    fn peek(&self, key: &str, max: usize) -> impl Future<Output = Result<Vec<Commit>>> + Send;
}
