//! In-memory reference stores.
//!
//! Process-local stand-ins for the external durable store, lease store, and
//! commit queue. Handles are cheap clones sharing state behind a single
//! `RwLock`, so one instance can back several `DocStore`s in tests to
//! simulate independent server processes against shared infrastructure.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;

use crate::stores::{CommitQueue, DocumentStore, LeaseStore, LeaseUpdate};
use crate::types::{now_ms, Commit, Document, LeaseRecord};

/// In-memory [`DocumentStore`].
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    docs: Arc<RwLock<HashMap<String, Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct snapshot of what is durably stored, bypassing any pending
    /// commits. Test hook.
    pub fn stored(&self, key: &str) -> Option<Document> {
        self.docs.read().expect("document store lock").get(key).cloned()
    }
}

impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, key: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().expect("document store lock").get(key).cloned())
    }

    async fn atomic_update<F>(&self, key: &str, update: F) -> Result<Document>
    where
        F: Fn(Option<Document>) -> Document + Send + Sync,
    {
        let mut docs = self.docs.write().expect("document store lock");
        let updated = update(docs.get(key).cloned());
        docs.insert(key.to_string(), updated.clone());
        Ok(updated)
    }
}

/// In-memory [`LeaseStore`] with lazy TTL expiry on read.
#[derive(Clone, Default)]
pub struct MemoryLeaseStore {
    // record + expiry deadline in epoch millis
    leases: Arc<RwLock<HashMap<String, (LeaseRecord, i64)>>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored record if its TTL has not lapsed. Test hook.
    pub fn live(&self, key: &str) -> Option<LeaseRecord> {
        self.live_record(key)
    }

    fn live_record(&self, key: &str) -> Option<LeaseRecord> {
        let leases = self.leases.read().expect("lease store lock");
        let (record, expires_at) = leases.get(key)?;
        if now_ms() >= *expires_at {
            return None;
        }
        Some(record.clone())
    }
}

impl LeaseStore for MemoryLeaseStore {
    async fn get(&self, key: &str) -> Result<Option<LeaseRecord>> {
        Ok(self.live_record(key))
    }

    async fn atomic_update<F>(
        &self,
        key: &str,
        update: F,
        ttl: Duration,
    ) -> Result<Option<LeaseRecord>>
    where
        F: Fn(Option<LeaseRecord>) -> LeaseUpdate + Send + Sync,
    {
        let mut leases = self.leases.write().expect("lease store lock");
        let now = now_ms();
        let current = leases
            .get(key)
            .filter(|(_, expires_at)| now < *expires_at)
            .map(|(record, _)| record.clone());

        match update(current.clone()) {
            LeaseUpdate::Write(record) => {
                let expires_at = now.saturating_add(ttl.as_millis() as i64);
                leases.insert(key.to_string(), (record.clone(), expires_at));
                Ok(Some(record))
            }
            LeaseUpdate::Clear => {
                leases.remove(key);
                Ok(None)
            }
            LeaseUpdate::Keep => Ok(current),
        }
    }
}

/// In-memory [`CommitQueue`] with drop-oldest eviction and per-entry TTL.
#[derive(Clone)]
pub struct MemoryCommitQueue {
    queues: Arc<RwLock<HashMap<String, VecDeque<(Commit, i64)>>>>,
    max_len: usize,
}

impl MemoryCommitQueue {
    pub fn new(max_len: usize) -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            max_len,
        }
    }

    /// Number of retained (possibly expired) entries for a key. Test hook.
    pub fn len(&self, key: &str) -> usize {
        self.queues
            .read()
            .expect("commit queue lock")
            .get(key)
            .map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }
}

impl CommitQueue for MemoryCommitQueue {
    async fn append(&self, key: &str, commit: Commit, ttl: Duration) -> Result<()> {
        let mut queues = self.queues.write().expect("commit queue lock");
        let queue = queues.entry(key.to_string()).or_default();
        let expires_at = now_ms().saturating_add(ttl.as_millis() as i64);
        queue.push_back((commit, expires_at));
        while queue.len() > self.max_len {
            queue.pop_front();
        }
        Ok(())
    }

    async fn peek(&self, key: &str, max: usize) -> Result<Vec<Commit>> {
        let queues = self.queues.read().expect("commit queue lock");
        let now = now_ms();
        let Some(queue) = queues.get(key) else {
            return Ok(Vec::new());
        };
        Ok(queue
            .iter()
            .filter(|(_, expires_at)| now < *expires_at)
            .take(max)
            .map(|(commit, _)| commit.clone())
            .collect())
    }
}
