use anyhow::{Context, Result};
use tracing::trace;

use crate::config::Config;
use crate::stores::CommitQueue;
use crate::types::{now_ms, Commit, Diff, ServerId};

/// Per-key bounded FIFO of pending diffs, layered over a [`CommitQueue`].
///
/// Appends are durable in the ephemeral queue once `append` resolves;
/// consumption is logical only (a flush folds peeked entries into the
/// canonical document and lets capacity/TTL age them out). A full queue
/// evicts its oldest entries, trading history completeness for
/// availability.
pub struct CommitLog<Q> {
    server_id: ServerId,
    queue: Q,
    config: Config,
}

impl<Q: CommitQueue> CommitLog<Q> {
    pub fn new(server_id: ServerId, queue: Q, config: Config) -> Self {
        Self {
            server_id,
            queue,
            config,
        }
    }

    /// Enqueue a diff authored by this process. Returns the appended commit.
    pub async fn append(&self, key: &str, diff: Diff) -> Result<Commit> {
        let commit = Commit::new(self.server_id.clone(), now_ms(), diff);
        self.queue
            .append(key, commit.clone(), self.config.commit_ttl)
            .await
            .context("commit append failed")?;
        trace!(key, time = commit.time, "appended commit");
        Ok(commit)
    }

    /// Pending commits, oldest first, up to the configured queue capacity.
    /// Non-destructive, so concurrent readers see the same entries.
    pub async fn pending(&self, key: &str) -> Result<Vec<Commit>> {
        self.queue
            .peek(key, self.config.max_queue_length)
            .await
            .context("commit peek failed")
    }
}
