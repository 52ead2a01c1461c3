use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

use crate::diff::DiffEngine;
use crate::store::Core;
use crate::stores::{CommitQueue, DocumentStore, LeaseStore};
use crate::types::now_ms;

/// Background reconciler: on a fixed tick, flushes owned keys' pending
/// commits into durable storage and advances their leases' `last_save`.
///
/// Failures are deferred, not retried inline - a struggling external store
/// sees at most one flush attempt per key per tick. Unflushed commits stay
/// in the queue for the next attempt, bounded only by queue capacity and
/// entry TTL.
pub(crate) struct Synchronizer<D, L, Q, E> {
    core: Arc<Core<D, L, Q, E>>,
}

impl<D, L, Q, E> Synchronizer<D, L, Q, E>
where
    D: DocumentStore,
    L: LeaseStore,
    Q: CommitQueue,
    E: DiffEngine,
{
    pub(crate) fn new(core: Arc<Core<D, L, Q, E>>) -> Self {
        Self { core }
    }

    /// Tick until the shutdown signal fires. In-flight store operations on
    /// the current tick are not aborted.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.core.config.check_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("synchronizer stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over the locally owned keys: acknowledge liveness, then
    /// flush whichever keys are due.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn tick(&self) {
        for key in self.core.ownership.owned_keys() {
            if let Err(e) = self.check_key(&key).await {
                warn!(key, "flush deferred to next tick: {e:#}");
            }
        }
    }

    async fn check_key(&self, key: &str) -> Result<()> {
        let lease = self
            .core
            .ownership
            .acknowledge(key)
            .await
            .context("acknowledge failed")?;

        // acknowledge() prunes the owned-set when the lease was stolen
        let Some(lease) = lease else {
            return Ok(());
        };
        if !self.core.ownership.is_owned(key) {
            return Ok(());
        }

        let now = now_ms();
        if now.saturating_sub(lease.last_save) < self.core.config.update_interval_ms() {
            trace!(key, "not due for flush");
            return Ok(());
        }

        self.flush_key(key).await
    }

    /// Fold pending commits into the canonical document, then record the
    /// flush time in the lease.
    ///
    /// Two separate atomic operations: a crash between them leaves
    /// `last_save` stale, causing a redundant re-flush later - harmless,
    /// since folding the same commits again converges to the same value.
    async fn flush_key(&self, key: &str) -> Result<()> {
        let commits = self.core.log.pending(key).await?;
        let flushed_at = now_ms();

        if commits.is_empty() {
            // Nothing pending: skip the durable round trip but still advance
            // last_save so idle keys are not re-checked every tick.
            self.core.ownership.mark_saved(key, flushed_at).await?;
            return Ok(());
        }

        let merged = self
            .core
            .documents
            .atomic_update(key, |canonical| self.core.fold(canonical, &commits))
            .await
            .context("canonical document update failed")?;

        self.core.ownership.mark_saved(key, flushed_at).await?;
        debug!(
            key,
            commits = commits.len(),
            fields = merged.as_object().map_or(0, |m| m.len()),
            "flushed commits to durable storage"
        );
        Ok(())
    }
}
