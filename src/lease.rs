use std::collections::HashSet;
use std::sync::RwLock;

use anyhow::{Context, Result};
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::stores::{LeaseStore, LeaseUpdate};
use crate::types::{now_ms, LeaseRecord, ServerId};

/// Acquires, refreshes, and steals per-key leases.
///
/// The lease record in the ephemeral store is the sole source of ownership
/// truth; the local owned-set is a cache of "keys we believe we own" used to
/// drive the synchronizer, corrected on every acknowledgment.
///
/// This is a best-effort spin-lock, not strict mutual exclusion: two
/// processes can both believe they own a key for a short window right after
/// an expiry, since no fencing token guards flushes. Duplicate flushes
/// converge because folding the same commit log is idempotent.
pub struct OwnershipManager<L> {
    server_id: ServerId,
    leases: L,
    config: Config,
    owned: RwLock<HashSet<String>>,
}

impl<L: LeaseStore> OwnershipManager<L> {
    pub fn new(server_id: ServerId, leases: L, config: Config) -> Self {
        Self {
            server_id,
            leases,
            config,
            owned: RwLock::new(HashSet::new()),
        }
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Keys this process currently believes it owns.
    pub fn owned_keys(&self) -> Vec<String> {
        self.owned
            .read()
            .expect("owned-set lock")
            .iter()
            .cloned()
            .collect()
    }

    pub fn is_owned(&self, key: &str) -> bool {
        self.owned.read().expect("owned-set lock").contains(key)
    }

    fn set_owned(&self, key: &str, owned: bool) {
        let mut set = self.owned.write().expect("owned-set lock");
        if owned {
            set.insert(key.to_string());
        } else {
            set.remove(key);
        }
    }

    /// Drop a key from the local owned-set without touching the lease store.
    pub(crate) fn forget(&self, key: &str) {
        self.set_owned(key, false);
    }

    /// One atomic conditional update against the key's lease record:
    /// - absent: create it owned by self (`last_save = 0`, so the key is
    ///   immediately due for a flush);
    /// - foreign owner still acknowledging: leave untouched;
    /// - foreign owner past the lock-death threshold: steal, preserving
    ///   `last_save`;
    /// - self: leave untouched (acknowledgment is a separate path).
    ///
    /// Returns whether this process owns the key afterwards.
    pub async fn try_acquire_or_steal(&self, key: &str) -> Result<bool> {
        let now = now_ms();
        let lock_death_ms = self.config.lock_death_ms();
        let server_id = self.server_id.clone();

        let after = self
            .leases
            .atomic_update(
                key,
                move |record| match record {
                    None => {
                        LeaseUpdate::Write(LeaseRecord::new(server_id.clone(), now, 0))
                    }
                    Some(record) if record.owner == server_id => LeaseUpdate::Keep,
                    Some(record) if record.is_expired(now, lock_death_ms) => {
                        LeaseUpdate::Write(LeaseRecord::new(
                            server_id.clone(),
                            now,
                            record.last_save,
                        ))
                    }
                    Some(_) => LeaseUpdate::Keep,
                },
                self.config.lease_ttl,
            )
            .await
            .context("lease acquire/steal update failed")?;

        let owned = after.as_ref().is_some_and(|record| record.owner == self.server_id);
        self.set_owned(key, owned);
        if owned {
            debug!(key, "holding flush lease");
        } else {
            trace!(key, "lease held by live foreign owner");
        }
        Ok(owned)
    }

    /// Refresh liveness for a key we believe we own.
    ///
    /// If the record's owner is no longer this process (stolen, or expired
    /// out of the store), the key is dropped from the local owned-set. If we
    /// still own it and an acknowledgment interval has elapsed, `last_ack`
    /// is refreshed. Returns the record as stored after the call.
    pub async fn acknowledge(&self, key: &str) -> Result<Option<LeaseRecord>> {
        let now = now_ms();
        let ack_interval_ms = self.config.ack_interval_ms();
        let server_id = self.server_id.clone();

        let after = self
            .leases
            .atomic_update(
                key,
                move |record| match record {
                    Some(record)
                        if record.owner == server_id
                            && now.saturating_sub(record.last_ack) >= ack_interval_ms =>
                    {
                        LeaseUpdate::Write(LeaseRecord::new(
                            server_id.clone(),
                            now,
                            record.last_save,
                        ))
                    }
                    _ => LeaseUpdate::Keep,
                },
                self.config.lease_ttl,
            )
            .await
            .context("lease acknowledge update failed")?;

        let still_owner = after.as_ref().is_some_and(|record| record.owner == self.server_id);
        if !still_owner && self.is_owned(key) {
            info!(key, "lease lost to another process");
            self.forget(key);
        }
        Ok(after)
    }

    /// Record a successful flush in the lease record. No-op if ownership was
    /// lost in the meantime (the new owner's `last_save` is theirs to keep).
    pub async fn mark_saved(&self, key: &str, saved_at: i64) -> Result<()> {
        let server_id = self.server_id.clone();
        self.leases
            .atomic_update(
                key,
                move |record| match record {
                    Some(record) if record.owner == server_id => {
                        LeaseUpdate::Write(LeaseRecord::new(
                            server_id.clone(),
                            record.last_ack,
                            saved_at,
                        ))
                    }
                    _ => LeaseUpdate::Keep,
                },
                self.config.lease_ttl,
            )
            .await
            .context("lease last_save update failed")?;
        Ok(())
    }
}
