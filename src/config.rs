use std::time::Duration;

/// Process-wide tuning constants, fixed at store construction.
///
/// The relationships that matter:
/// - `ack_interval` must be well below `lock_death_threshold`, or a live
///   owner's lease will look stealable between acknowledgments.
/// - `check_interval` bounds how stale `last_ack` can get on top of
///   `ack_interval` (acks are only attempted on synchronizer ticks).
/// - `commit_ttl` and `max_queue_length` together bound how long a key can
///   go unflushed before pending commits start to age or evict out.
#[derive(Debug, Clone)]
pub struct Config {
    /// Missed-acknowledgment duration after which a lease is stealable.
    pub lock_death_threshold: Duration,
    /// Minimum gap between `last_ack` refreshes by the current owner.
    pub ack_interval: Duration,
    /// Minimum gap between flushes of one key to durable storage.
    pub update_interval: Duration,
    /// Synchronizer tick period.
    pub check_interval: Duration,
    /// Commit queue capacity per key; oldest entries are evicted beyond it.
    pub max_queue_length: usize,
    /// Idle expiration for lease records in the ephemeral store.
    pub lease_ttl: Duration,
    /// Entry TTL for queued commits.
    pub commit_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_death_threshold: Duration::from_secs(120),
            ack_interval: Duration::from_secs(30),
            update_interval: Duration::from_secs(60),
            check_interval: Duration::from_secs(10),
            max_queue_length: 100,
            lease_ttl: Duration::from_secs(15 * 24 * 60 * 60),
            commit_ttl: Duration::from_secs(15 * 60),
        }
    }
}

impl Config {
    pub fn lock_death_ms(&self) -> i64 {
        self.lock_death_threshold.as_millis() as i64
    }

    pub fn ack_interval_ms(&self) -> i64 {
        self.ack_interval.as_millis() as i64
    }

    pub fn update_interval_ms(&self) -> i64 {
        self.update_interval.as_millis() as i64
    }

    pub fn commit_ttl_ms(&self) -> i64 {
        self.commit_ttl.as_millis() as i64
    }
}
