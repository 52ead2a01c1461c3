//! deltadoc - collaborative per-key documents over a slow durable store
//!
//! deltadoc is a Rust library that lets many independent server processes
//! maintain one logical JSON document per key, backed by a slow, rate-limited
//! durable store, without losing concurrent updates and without every write
//! hitting the durable store. It focuses on low operational cost over strong
//! consistency.
//!
//! # How it works
//!
//! - **Diffs, not overwrites**: updates are partial deltas queued in a fast
//!   ephemeral commit queue (one bounded FIFO per key) and folded
//!   deterministically into the canonical document.
//! - **Lease-elected flusher**: a soft, TTL-based lease elects one process
//!   per key to periodically flush queued commits durably. A silent owner's
//!   lease is stolen by the next writer.
//! - **Reconstruction reads**: the latest value is the durable snapshot plus
//!   pending commits, so readers never wait for a flush.
//!
//! # Quick start
//!
//! ```rust
//! use deltadoc::{
//!     generate_server_id, Config, DocStore, MemoryCommitQueue, MemoryDocumentStore,
//!     MemoryLeaseStore,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config::default();
//! let store = DocStore::new(
//!     generate_server_id(),
//!     MemoryDocumentStore::new(),
//!     MemoryLeaseStore::new(),
//!     MemoryCommitQueue::new(config.max_queue_length),
//!     config,
//! );
//!
//! store.commit("room:1", json!({"coins": 10})).await?;
//! assert_eq!(store.get_latest("room:1").await?, json!({"coins": 10}));
//! store.destroy();
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The core is store-agnostic: [`DocumentStore`], [`LeaseStore`], and
//! [`CommitQueue`] are trait seams the embedder implements against real
//! infrastructure; in-memory reference implementations back the tests.
//! Merge semantics are pluggable through [`DiffEngine`].
//!
//! The types you'll work with:
//! - [`DocStore`] - the facade: `get_latest`, `commit`, `commit_diff`
//! - [`Config`] - process-wide timing and capacity constants
//! - [`diff::differentiate`] / [`diff::integrate`] - the default merge pair
//! - [`LeaseRecord`] / [`Commit`] - the persisted record shapes
//!
//! # Non-goals
//!
//! deltadoc intentionally does NOT provide:
//! - Linearizable consensus or fencing tokens (the mutual-exclusion window
//!   after a lease expiry is soft and racy; duplicate flushes converge)
//! - Multi-key transactions
//! - CRDT semantics (the default engine is last-writer-wins per field)
//! - Complete history (a full commit queue evicts its oldest entries)
//! - Concrete durable/ephemeral store clients

pub mod config;
pub mod diff;
pub mod lease;
pub mod log;
pub mod memory;
pub mod store;
pub mod stores;
mod sync;
pub mod types;

pub use config::Config;
pub use diff::{differentiate, integrate, DiffEngine, MapDiff};
pub use memory::{MemoryCommitQueue, MemoryDocumentStore, MemoryLeaseStore};
pub use store::DocStore;
pub use stores::{CommitQueue, DocumentStore, LeaseStore, LeaseUpdate};
pub use types::{generate_server_id, Commit, Diff, Document, LeaseRecord, ServerId};

#[cfg(test)]
mod tests;
