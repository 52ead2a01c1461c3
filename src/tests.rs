use crate::config::Config;
use crate::diff::{differentiate, integrate, DiffEngine};
use crate::lease::OwnershipManager;
use crate::memory::{MemoryCommitQueue, MemoryDocumentStore, MemoryLeaseStore};
use crate::store::DocStore;
use crate::stores::DocumentStore;
use crate::types::{now_ms, Commit, Diff, Document};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;

/// Short intervals for lease timing tests, long check interval so the
/// background loop stays out of the way when ticks are driven manually.
fn test_config() -> Config {
    Config {
        lock_death_threshold: Duration::from_millis(100),
        ack_interval: Duration::from_millis(0),
        update_interval: Duration::from_millis(0),
        check_interval: Duration::from_secs(60),
        max_queue_length: 100,
        lease_ttl: Duration::from_secs(60),
        commit_ttl: Duration::from_secs(60),
    }
}

struct Infra {
    docs: MemoryDocumentStore,
    leases: MemoryLeaseStore,
    queue: MemoryCommitQueue,
}

impl Infra {
    fn new(config: &Config) -> Self {
        Self {
            docs: MemoryDocumentStore::new(),
            leases: MemoryLeaseStore::new(),
            queue: MemoryCommitQueue::new(config.max_queue_length),
        }
    }

    /// A store handle for one simulated server process sharing this
    /// infrastructure.
    fn store(
        &self,
        server_id: &str,
        config: Config,
    ) -> DocStore<MemoryDocumentStore, MemoryLeaseStore, MemoryCommitQueue> {
        DocStore::new(
            server_id.to_string(),
            self.docs.clone(),
            self.leases.clone(),
            self.queue.clone(),
            config,
        )
    }
}

fn commit_at(time: i64, diff: Value) -> Commit {
    Commit::new("author".to_string(), time, diff)
}

#[test]
fn test_differentiate_round_trip() {
    let a = json!({
        "name": "alice",
        "coins": 10,
        "inventory": {"sword": 1, "shield": 2},
        "tags": ["a", "b"],
    });
    let b = json!({
        "name": "alice",
        "coins": 15,
        "inventory": {"sword": 1, "potion": 3},
        "title": "knight",
    });

    let diff = differentiate(&a, &b);
    assert_eq!(integrate(&a, &diff), b);

    // Unchanged fields are omitted from the diff entirely
    let diff_map = diff.as_object().unwrap();
    assert!(!diff_map.contains_key("name"));
}

#[test]
fn test_differentiate_emits_delete_sentinel() {
    let a = json!({"keep": 1, "drop": 2});
    let b = json!({"keep": 1});

    let diff = differentiate(&a, &b);
    assert_eq!(diff, json!({"drop": {}}));
    assert_eq!(integrate(&a, &diff), b);
}

#[test]
fn test_integrate_does_not_mutate_input() {
    let base = json!({"a": 1, "nested": {"x": 1}});
    let snapshot = base.clone();

    let merged = integrate(&base, &json!({"a": 2, "nested": {"y": 2}}));
    assert_eq!(base, snapshot);
    assert_eq!(merged, json!({"a": 2, "nested": {"x": 1, "y": 2}}));
}

#[test]
fn test_arrays_replaced_atomically() {
    // Arrays are never diffed positionally - the new array wins wholesale
    let a = json!({"items": [1, 2, 3]});
    let b = json!({"items": [3, 1]});

    let diff = differentiate(&a, &b);
    assert_eq!(diff, json!({"items": [3, 1]}));
    assert_eq!(integrate(&a, &diff), b);
}

#[test]
fn test_fold_is_idempotent() {
    let diffs = vec![
        json!({"a": 1, "nested": {"x": 1}}),
        json!({"b": 2}),
        json!({"a": {}}),
    ];

    let fold = |start: &Document| {
        diffs
            .iter()
            .fold(start.clone(), |acc, diff| integrate(&acc, diff))
    };

    let once = fold(&json!({"a": 0}));
    let twice = fold(&once);
    assert_eq!(once, twice);
    assert_eq!(once, json!({"b": 2, "nested": {"x": 1}}));
}

#[tokio::test]
async fn test_get_latest_folds_in_fifo_order() {
    let config = test_config();
    let infra = Infra::new(&config);
    let store = infra.store("srv-1", config);

    store.commit_diff("doc", json!({"a": 1})).await.unwrap();
    store.commit_diff("doc", json!({"a": 2})).await.unwrap();

    assert_eq!(store.get_latest("doc").await.unwrap(), json!({"a": 2}));
    store.destroy();
}

#[tokio::test]
async fn test_get_latest_with_pinned_inputs() {
    let config = test_config();
    let infra = Infra::new(&config);
    let store = infra.store("srv-1", config);

    store.commit_diff("doc", json!({"a": 1})).await.unwrap();

    // Pinned canonical + commits give a stable view regardless of what has
    // been appended since
    let pinned = store
        .get_latest_with(
            "doc",
            Some(json!({"base": true})),
            Some(vec![commit_at(now_ms(), json!({"b": 2}))]),
        )
        .await
        .unwrap();
    assert_eq!(pinned, json!({"base": true, "b": 2}));
    store.destroy();
}

#[tokio::test]
async fn test_bounded_queue_evicts_oldest() {
    let config = Config {
        max_queue_length: 3,
        ..test_config()
    };
    let infra = Infra::new(&config);
    let store = infra.store("srv-1", config);

    // Five commits to distinct fields; capacity 3 keeps only the newest
    // three, so the reconstructed value diverges from full history. That
    // divergence is the documented drop-oldest trade-off.
    for (i, field) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        let mut diff = serde_json::Map::new();
        diff.insert(field.to_string(), json!(i));
        store.commit_diff("doc", Value::Object(diff)).await.unwrap();
    }

    assert_eq!(infra.queue.len("doc"), 3);
    let latest = store.get_latest("doc").await.unwrap();
    assert_eq!(latest, json!({"c": 2, "d": 3, "e": 4}));
    store.destroy();
}

#[tokio::test]
async fn test_commit_ttl_expires_entries() {
    let config = Config {
        commit_ttl: Duration::from_millis(20),
        ..test_config()
    };
    let infra = Infra::new(&config);
    let store = infra.store("srv-1", config);

    store.commit_diff("doc", json!({"a": 1})).await.unwrap();
    sleep(Duration::from_millis(40)).await;

    // Expired entries are invisible to reconstruction
    assert_eq!(store.get_latest("doc").await.unwrap(), json!({}));
    store.destroy();
}

#[tokio::test]
async fn test_acquire_creates_lease() {
    let config = test_config();
    let infra = Infra::new(&config);
    let manager = OwnershipManager::new("srv-1".to_string(), infra.leases.clone(), config);

    assert!(manager.try_acquire_or_steal("doc").await.unwrap());
    assert!(manager.is_owned("doc"));

    let record = infra.leases.live("doc").unwrap();
    assert_eq!(record.owner, "srv-1");
    assert_eq!(record.last_save, 0);
}

#[tokio::test]
async fn test_live_lease_is_respected() {
    let config = test_config();
    let infra = Infra::new(&config);
    let owner = OwnershipManager::new("srv-1".to_string(), infra.leases.clone(), config.clone());
    let rival = OwnershipManager::new("srv-2".to_string(), infra.leases.clone(), config);

    assert!(owner.try_acquire_or_steal("doc").await.unwrap());
    assert!(!rival.try_acquire_or_steal("doc").await.unwrap());
    assert!(!rival.is_owned("doc"));
    assert_eq!(infra.leases.live("doc").unwrap().owner, "srv-1");
}

#[tokio::test]
async fn test_acknowledged_lease_cannot_be_stolen() {
    let config = test_config();
    let infra = Infra::new(&config);
    let owner = OwnershipManager::new("srv-1".to_string(), infra.leases.clone(), config.clone());
    let rival = OwnershipManager::new("srv-2".to_string(), infra.leases.clone(), config);

    assert!(owner.try_acquire_or_steal("doc").await.unwrap());

    // Keep acknowledging well inside the 100ms lock-death threshold while
    // the rival keeps probing; ownership must never move.
    for _ in 0..5 {
        sleep(Duration::from_millis(30)).await;
        owner.acknowledge("doc").await.unwrap();
        assert!(!rival.try_acquire_or_steal("doc").await.unwrap());
    }
    assert_eq!(infra.leases.live("doc").unwrap().owner, "srv-1");
}

#[tokio::test]
async fn test_expired_lease_is_stolen() {
    let config = test_config();
    let infra = Infra::new(&config);
    let owner = OwnershipManager::new("srv-1".to_string(), infra.leases.clone(), config.clone());
    let rival = OwnershipManager::new("srv-2".to_string(), infra.leases.clone(), config.clone());
    let third = OwnershipManager::new("srv-3".to_string(), infra.leases.clone(), config);

    assert!(owner.try_acquire_or_steal("doc").await.unwrap());

    // Owner goes silent past the threshold
    sleep(Duration::from_millis(120)).await;

    assert!(rival.try_acquire_or_steal("doc").await.unwrap());
    assert_eq!(infra.leases.live("doc").unwrap().owner, "srv-2");

    // The freshly stolen lease is live again, so a third process is refused
    assert!(!third.try_acquire_or_steal("doc").await.unwrap());

    // The old owner's stale local belief is corrected on acknowledgment
    assert!(owner.is_owned("doc"));
    owner.acknowledge("doc").await.unwrap();
    assert!(!owner.is_owned("doc"));
    assert!(rival.is_owned("doc"));
}

#[tokio::test]
async fn test_steal_preserves_last_save() {
    let config = test_config();
    let infra = Infra::new(&config);
    let owner = OwnershipManager::new("srv-1".to_string(), infra.leases.clone(), config.clone());
    let rival = OwnershipManager::new("srv-2".to_string(), infra.leases.clone(), config);

    assert!(owner.try_acquire_or_steal("doc").await.unwrap());
    let saved_at = now_ms();
    owner.mark_saved("doc", saved_at).await.unwrap();

    sleep(Duration::from_millis(120)).await;
    assert!(rival.try_acquire_or_steal("doc").await.unwrap());

    let record = infra.leases.live("doc").unwrap();
    assert_eq!(record.owner, "srv-2");
    assert_eq!(record.last_save, saved_at);
}

#[tokio::test]
async fn test_commit_acquires_flush_lease() {
    let config = test_config();
    let infra = Infra::new(&config);
    let store = infra.store("srv-1", config);

    assert!(store.owned_keys().is_empty());
    store.commit_diff("doc", json!({"a": 1})).await.unwrap();
    assert_eq!(store.owned_keys(), vec!["doc".to_string()]);
    assert_eq!(infra.leases.live("doc").unwrap().owner, "srv-1");
    store.destroy();
}

#[tokio::test]
async fn test_flush_end_to_end() {
    let config = test_config();
    let infra = Infra::new(&config);
    let store = infra.store("srv-1", config);

    store.commit("doc", json!({"coins": 10})).await.unwrap();
    store.commit("doc", json!({"coins": 15})).await.unwrap();

    // Visible before any flush, durable store still empty
    assert_eq!(store.get_latest("doc").await.unwrap(), json!({"coins": 15}));
    assert!(infra.docs.stored("doc").is_none());

    let before_flush = now_ms();
    store.sync_tick().await;

    assert_eq!(infra.docs.stored("doc").unwrap(), json!({"coins": 15}));
    let record = infra.leases.live("doc").unwrap();
    assert_eq!(record.owner, "srv-1");
    assert!(record.last_save >= before_flush);

    // Re-flushing the same commits converges to the same canonical value
    store.sync_tick().await;
    assert_eq!(infra.docs.stored("doc").unwrap(), json!({"coins": 15}));
    store.destroy();
}

#[tokio::test]
async fn test_flush_respects_update_interval() {
    let config = Config {
        update_interval: Duration::from_secs(60),
        ..test_config()
    };
    let infra = Infra::new(&config);
    let store = infra.store("srv-1", config);

    store.commit_diff("doc", json!({"a": 1})).await.unwrap();
    store.sync_tick().await;
    // First flush: last_save was 0, so the key was immediately due
    assert_eq!(infra.docs.stored("doc").unwrap(), json!({"a": 1}));

    store.commit_diff("doc", json!({"a": 2})).await.unwrap();
    store.sync_tick().await;
    // Second flush suppressed until update_interval elapses
    assert_eq!(infra.docs.stored("doc").unwrap(), json!({"a": 1}));
    store.destroy();
}

#[tokio::test]
async fn test_idle_key_skips_durable_write() {
    let config = Config {
        commit_ttl: Duration::from_millis(10),
        ..test_config()
    };
    let infra = Infra::new(&config);
    let store = infra.store("srv-1", config);

    store.commit_diff("doc", json!({"a": 1})).await.unwrap();
    // Let the only pending commit age out, leaving an owned but idle key
    sleep(Duration::from_millis(30)).await;

    let before_tick = now_ms();
    store.sync_tick().await;

    // last_save advances without a durable write
    assert!(infra.docs.stored("doc").is_none());
    assert!(infra.leases.live("doc").unwrap().last_save >= before_tick);
    store.destroy();
}

#[tokio::test]
async fn test_stolen_key_is_not_flushed_by_old_owner() {
    let config = test_config();
    let infra = Infra::new(&config);
    let old = infra.store("srv-1", config.clone());

    old.commit_diff("doc", json!({"from": "srv-1"})).await.unwrap();
    sleep(Duration::from_millis(120)).await;

    // srv-2 steals the lease after srv-1 goes silent
    let thief = OwnershipManager::new("srv-2".to_string(), infra.leases.clone(), config);
    assert!(thief.try_acquire_or_steal("doc").await.unwrap());

    // srv-1's next pass notices the theft, drops the key, and does not flush
    old.sync_tick().await;
    assert!(infra.docs.stored("doc").is_none());
    assert!(old.owned_keys().is_empty());
    old.destroy();
}

#[tokio::test]
async fn test_two_processes_converge() {
    let config = test_config();
    let infra = Infra::new(&config);
    let srv1 = infra.store("srv-1", config.clone());
    let srv2 = infra.store("srv-2", config);

    srv1.commit_diff("doc", json!({"a": 1})).await.unwrap();
    srv2.commit_diff("doc", json!({"b": 2})).await.unwrap();

    // Both read the same reconstruction from the shared queue
    let expected = json!({"a": 1, "b": 2});
    assert_eq!(srv1.get_latest("doc").await.unwrap(), expected);
    assert_eq!(srv2.get_latest("doc").await.unwrap(), expected);

    // Only srv-1 holds the lease; srv-2's tick must not flush
    srv2.sync_tick().await;
    assert!(infra.docs.stored("doc").is_none());

    srv1.sync_tick().await;
    assert_eq!(infra.docs.stored("doc").unwrap(), expected);

    srv1.destroy();
    srv2.destroy();
}

#[tokio::test]
async fn test_background_loop_flushes_and_stops() {
    let config = Config {
        check_interval: Duration::from_millis(20),
        ..test_config()
    };
    let infra = Infra::new(&config);
    let store = infra.store("srv-1", config);

    store.commit("doc", json!({"coins": 10})).await.unwrap();

    // The spawned synchronizer should flush without any manual ticking
    let mut flushed = false;
    for _ in 0..50 {
        sleep(Duration::from_millis(20)).await;
        if infra.docs.stored("doc").is_some() {
            flushed = true;
            break;
        }
    }
    assert!(flushed, "background synchronizer never flushed");
    assert_eq!(infra.docs.stored("doc").unwrap(), json!({"coins": 10}));

    // After destroy, new commits stay pending
    store.destroy();
    sleep(Duration::from_millis(60)).await;
    store.commit("doc", json!({"coins": 99})).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(infra.docs.stored("doc").unwrap(), json!({"coins": 10}));
}

/// Domain-specific engine: numeric fields accumulate instead of overwrite.
struct CounterDiff;

impl DiffEngine for CounterDiff {
    fn differentiate(&self, previous: &Document, current: &Document) -> Diff {
        match (previous, current) {
            (Value::Number(prev), Value::Number(curr)) => {
                json!(curr.as_i64().unwrap_or(0) - prev.as_i64().unwrap_or(0))
            }
            _ => differentiate(previous, current),
        }
    }

    fn integrate(&self, current: &Document, diff: &Diff) -> Document {
        let (Value::Object(curr), Value::Object(diff_map)) = (current, diff) else {
            return integrate(current, diff);
        };
        let mut merged = curr.clone();
        for (field, delta) in diff_map {
            let next = match (merged.get(field), delta) {
                (Some(Value::Number(have)), Value::Number(add)) => {
                    json!(have.as_i64().unwrap_or(0) + add.as_i64().unwrap_or(0))
                }
                _ => delta.clone(),
            };
            merged.insert(field.clone(), next);
        }
        Value::Object(merged)
    }
}

#[tokio::test]
async fn test_custom_engine_accumulates_counters() {
    let config = test_config();
    let infra = Infra::new(&config);
    let store = DocStore::with_engine(
        "srv-1".to_string(),
        infra.docs.clone(),
        infra.leases.clone(),
        infra.queue.clone(),
        config,
        CounterDiff,
    );

    infra
        .docs
        .atomic_update("doc", |_| json!({"coins": 1}))
        .await
        .unwrap();

    store.commit_diff("doc", json!({"coins": 5})).await.unwrap();
    store.commit_diff("doc", json!({"coins": 7})).await.unwrap();

    assert_eq!(store.get_latest("doc").await.unwrap(), json!({"coins": 13}));

    store.sync_tick().await;
    assert_eq!(infra.docs.stored("doc").unwrap(), json!({"coins": 13}));
    store.destroy();
}
