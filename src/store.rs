use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::diff::{DiffEngine, MapDiff};
use crate::lease::OwnershipManager;
use crate::log::CommitLog;
use crate::stores::{CommitQueue, DocumentStore, LeaseStore};
use crate::sync::Synchronizer;
use crate::types::{Commit, Diff, Document, ServerId};

/// Shared state behind the facade and the synchronizer task.
pub(crate) struct Core<D, L, Q, E> {
    pub(crate) documents: D,
    pub(crate) ownership: OwnershipManager<L>,
    pub(crate) log: CommitLog<Q>,
    pub(crate) engine: E,
    pub(crate) config: Config,
}

impl<D, L, Q, E> Core<D, L, Q, E>
where
    D: DocumentStore,
    L: LeaseStore,
    Q: CommitQueue,
    E: DiffEngine,
{
    /// Fold pending commits over a canonical snapshot, oldest first.
    /// Absent snapshot means the empty document.
    pub(crate) fn fold(&self, canonical: Option<Document>, commits: &[Commit]) -> Document {
        let mut merged = canonical.unwrap_or_else(|| Value::Object(Map::new()));
        for commit in commits {
            merged = self.engine.integrate(&merged, &commit.diff);
        }
        merged
    }

    /// Latest-value reconstruction with optionally pinned inputs.
    ///
    /// Deterministic given identical canonical state and commit set, but not
    /// stable across calls in time - new commits may land between calls.
    /// Callers needing a fixed view pin both inputs.
    pub(crate) async fn latest(
        &self,
        key: &str,
        canonical: Option<Document>,
        commits: Option<Vec<Commit>>,
    ) -> Result<Document> {
        let commits = match commits {
            Some(commits) => commits,
            None => self.log.pending(key).await?,
        };
        let canonical = match canonical {
            Some(doc) => Some(doc),
            None => self
                .documents
                .get(key)
                .await
                .context("canonical document read failed")?,
        };
        Ok(self.fold(canonical, &commits))
    }
}

/// Public entry point: one logical JSON document per key, collaboratively
/// maintained by many independent processes.
///
/// Reads reconstruct the latest value from the durable snapshot plus the
/// pending commit queue; writes append diffs to the queue and nudge lease
/// acquisition; a background synchronizer task (one per store instance,
/// bound to its lifetime) flushes owned keys into durable storage.
///
/// Construction spawns the background task, so it must happen inside a
/// tokio runtime.
pub struct DocStore<D, L, Q, E = MapDiff> {
    core: Arc<Core<D, L, Q, E>>,
    shutdown: watch::Sender<bool>,
}

impl<D, L, Q> DocStore<D, L, Q, MapDiff>
where
    D: DocumentStore,
    L: LeaseStore,
    Q: CommitQueue,
{
    pub fn new(server_id: ServerId, documents: D, leases: L, queue: Q, config: Config) -> Self {
        Self::with_engine(server_id, documents, leases, queue, config, MapDiff)
    }
}

impl<D, L, Q, E> DocStore<D, L, Q, E>
where
    D: DocumentStore,
    L: LeaseStore,
    Q: CommitQueue,
    E: DiffEngine,
{
    /// Build a store with a custom differentiate/integrate pair.
    pub fn with_engine(
        server_id: ServerId,
        documents: D,
        leases: L,
        queue: Q,
        config: Config,
        engine: E,
    ) -> Self {
        let core = Arc::new(Core {
            documents,
            ownership: OwnershipManager::new(server_id.clone(), leases, config.clone()),
            log: CommitLog::new(server_id.clone(), queue, config.clone()),
            engine,
            config,
        });

        let (shutdown, signal) = watch::channel(false);
        let synchronizer = Synchronizer::new(core.clone());
        tokio::spawn(synchronizer.run(signal));
        info!(%server_id, "document store started");

        Self { core, shutdown }
    }

    pub fn server_id(&self) -> &ServerId {
        self.core.ownership.server_id()
    }

    /// Keys this process currently believes it holds the flush lease for.
    pub fn owned_keys(&self) -> Vec<String> {
        self.core.ownership.owned_keys()
    }

    /// The authoritative current value: durable snapshot plus pending
    /// commits, folded oldest first. Absent everywhere means `{}`.
    pub async fn get_latest(&self, key: &str) -> Result<Document> {
        self.core.latest(key, None, None).await
    }

    /// [`Self::get_latest`] with pinned inputs, for callers that need a
    /// stable view across their own computation.
    pub async fn get_latest_with(
        &self,
        key: &str,
        canonical: Option<Document>,
        commits: Option<Vec<Commit>>,
    ) -> Result<Document> {
        self.core.latest(key, canonical, commits).await
    }

    /// Append a precomputed diff to the key's commit queue.
    ///
    /// Resolves once the append is durable in the ephemeral queue. Lease
    /// acquisition is attempted afterwards as a best effort, so the first
    /// writer after an ownership vacancy becomes the new flusher; its
    /// failure never fails the commit.
    pub async fn commit_diff(&self, key: &str, diff: Diff) -> Result<()> {
        self.core.log.append(key, diff).await?;
        if let Err(e) = self.core.ownership.try_acquire_or_steal(key).await {
            warn!(key, "lease acquisition after commit failed: {e:#}");
        }
        Ok(())
    }

    /// Commit a full replacement value by diffing it against the current
    /// latest value.
    ///
    /// The read, the diff, and the append are not atomic: two concurrent
    /// calls against the same key can each diff against a now-stale
    /// snapshot and silently drop the other's change. Prefer
    /// [`Self::commit_diff`] with precomputed deltas when that matters.
    pub async fn commit(&self, key: &str, value: Document) -> Result<()> {
        let latest = self.get_latest(key).await?;
        let diff = self.core.engine.differentiate(&latest, &value);
        debug!(key, "computed commit diff");
        self.commit_diff(key, diff).await
    }

    /// Stop the background synchronizer. Idempotent; also runs on drop.
    ///
    /// Owned leases are not revoked - they stop being acknowledged and
    /// expire naturally after the lock-death threshold, at which point any
    /// other process steals them on its next commit.
    pub fn destroy(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run one synchronizer pass inline, for deterministic tests.
    #[cfg(test)]
    pub(crate) async fn sync_tick(&self) {
        Synchronizer::new(self.core.clone()).tick().await;
    }
}

impl<D, L, Q, E> Drop for DocStore<D, L, Q, E> {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
