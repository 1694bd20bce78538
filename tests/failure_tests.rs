/// Store failure tests
///
/// Scan aborts, skipped items, rejected writes, timeouts and cancellation
/// Run with: cargo test --test failure_tests

use async_trait::async_trait;
use samstore::core::ItemResult;
use samstore::storage::ScanPage;
use samstore::{
    CleanupEngine, IndexKind, InMemoryStore, RebuildMode, RepairOptions, Result, SampleRecord,
    SampleStore, Scope, StoreError, cancel_pair, check_index, populate_index, rebuild_index,
};
use std::collections::HashMap;
use std::time::Duration;

const MASTER: &str = "samsto:samples";

async fn seed_sound_samples(store: &InMemoryStore, names: &[&str]) -> Vec<String> {
    let mut keys = Vec::new();
    for name in names {
        let (subject, aspect) = name.split_once('|').unwrap();
        store.put_subject(subject).await;
        store.put_aspect(aspect).await;
        keys.push(
            store
                .put_registered_sample(name, &SampleRecord::new(name, "1", "2"))
                .await,
        );
    }
    keys
}

fn has_writes(store: &InMemoryStore) -> bool {
    store.journal().iter().any(|line| !line.starts_with("SCAN "))
}

#[tokio::test]
async fn test_scan_failure_aborts_cleanup_without_writes() {
    let store = InMemoryStore::new();
    seed_sound_samples(&store, &["a|x", "b|x", "c|x"]).await;
    // Orphans that a completed run would delete.
    store.put_sample("d|x", &SampleRecord::new("d|x", "1", "2")).await;
    store.put_member(MASTER, "samsto:sample:gone|x").await;
    store.fail_scan_after(1);

    let result = CleanupEngine::new(&store)
        .options(RepairOptions::new().scan_count(2))
        .run()
        .await;

    assert!(matches!(result, Err(StoreError::Scan(_))));
    assert!(!has_writes(&store));
    assert!(store.contains_key("samsto:sample:d|x").await);
    assert_eq!(store.members(MASTER).await.len(), 4);
}

#[tokio::test]
async fn test_scan_failure_aborts_check() {
    let store = InMemoryStore::new();
    seed_sound_samples(&store, &["a|x", "b|x"]).await;
    store.fail_scan_after(0);

    let result = check_index(
        &store,
        IndexKind::SubjectAspect,
        &Scope::all(),
        &RepairOptions::default(),
    )
    .await;

    assert!(matches!(result, Err(StoreError::Scan(_))));
}

#[tokio::test]
async fn test_failed_delete_stops_rebuild_before_populate() {
    let store = InMemoryStore::new();
    seed_sound_samples(&store, &["a|x"]).await;
    store.put_member("samsto:subaspmap:a", "stale").await;
    store.fail_writes(true);

    let result = rebuild_index(
        &store,
        IndexKind::SubjectAspect,
        &Scope::all(),
        RebuildMode::Full,
        &RepairOptions::default(),
    )
    .await;

    assert!(matches!(result, Err(StoreError::Command { op: "del", .. })));
    assert!(!store.journal().iter().any(|line| line.starts_with("SADD ")));
    assert_eq!(store.members("samsto:subaspmap:a").await, vec!["stale"]);
}

#[tokio::test]
async fn test_failed_populate_surfaces() {
    let store = InMemoryStore::new();
    seed_sound_samples(&store, &["a|x"]).await;
    store.fail_writes(true);

    let result = populate_index(
        &store,
        IndexKind::SubjectAspect,
        &Scope::all(),
        &RepairOptions::default(),
    )
    .await;

    assert!(matches!(result, Err(StoreError::Command { op: "sadd", .. })));
}

#[tokio::test]
async fn test_unreadable_sample_is_skipped_not_deleted() {
    let store = InMemoryStore::new();
    let keys = seed_sound_samples(&store, &["u|v", "w|v"]).await;
    store.put_sample("orphan|v", &SampleRecord::new("orphan|v", "1", "2")).await;
    store.put_subject("orphan").await;
    store.fail_reads_of(&keys[0]);

    let report = CleanupEngine::new(&store).run().await.unwrap();

    assert!(!report.skipped.is_empty());
    assert!(report.skipped.iter().all(|skipped| skipped.key == keys[0]));
    assert_eq!(report.deleted_keys(), vec!["samsto:sample:orphan|v"]);
    assert!(report.master_removals.is_empty());
    assert!(store.contains_key(&keys[0]).await);
    assert_eq!(store.members(MASTER).await, keys);
}

#[tokio::test]
async fn test_unreadable_reference_is_skipped_not_deleted() {
    let store = InMemoryStore::new();
    let keys = seed_sound_samples(&store, &["u|v"]).await;
    store.fail_reads_of("samsto:subject:u");

    let report = CleanupEngine::new(&store).run().await.unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].key, keys[0]);
    assert!(report.is_clean());
    assert!(store.contains_key(&keys[0]).await);
}

#[tokio::test]
async fn test_check_excludes_unanswered_samples() {
    let store = InMemoryStore::new();
    seed_sound_samples(&store, &["a|x", "b|x"]).await;
    store.put_member("samsto:subaspmap:b", "x").await;
    store.fail_reads_of("samsto:subaspmap:a");

    let report = check_index(
        &store,
        IndexKind::SubjectAspect,
        &Scope::all(),
        &RepairOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.errors, 1);
    assert_eq!(report.total, 1);
    assert_eq!(report.found_in_map, 1);
    assert!(report.is_consistent());
}

#[tokio::test]
async fn test_commit_failure_surfaces_and_preview_still_works() {
    let store = InMemoryStore::new();
    seed_sound_samples(&store, &["a|x"]).await;
    store.put_member(MASTER, "samsto:sample:gone|x").await;
    store.put_sample("stray|x", &SampleRecord::new("stray|x", "1", "2")).await;
    store.fail_writes(true);

    let preview = CleanupEngine::new(&store).preview().await.unwrap();
    assert_eq!(preview.deleted_keys(), vec!["samsto:sample:stray|x"]);
    assert_eq!(preview.removed_keys(), vec!["samsto:sample:gone|x"]);

    let result = CleanupEngine::new(&store).run().await;
    assert!(matches!(result, Err(StoreError::Command { op: "del", .. })));
    assert!(store.contains_key("samsto:sample:stray|x").await);
    assert_eq!(store.members(MASTER).await.len(), 2);
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let store = InMemoryStore::new();
    seed_sound_samples(&store, &["a|x"]).await;
    store.set_latency(Some(Duration::from_millis(500)));

    let options = RepairOptions::new().command_timeout(Some(Duration::from_millis(10)));
    let err = check_index(&store, IndexKind::SubjectAspect, &Scope::all(), &options)
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(err, StoreError::Timeout { op: "scan", .. }));
}

#[tokio::test]
async fn test_cancelled_cleanup_writes_nothing() {
    let store = InMemoryStore::new();
    seed_sound_samples(&store, &["a|x"]).await;
    store.put_member(MASTER, "samsto:sample:gone|x").await;
    store.put_sample("stray|x", &SampleRecord::new("stray|x", "1", "2")).await;

    let (handle, signal) = cancel_pair();
    handle.cancel();

    let result = CleanupEngine::new(&store)
        .options(RepairOptions::new().cancel_on(signal))
        .run()
        .await;

    assert_eq!(result.unwrap_err(), StoreError::Cancelled);
    assert!(!has_writes(&store));
    assert!(store.contains_key("samsto:sample:stray|x").await);
}

#[tokio::test]
async fn test_cancelled_check_stops_scanning() {
    let store = InMemoryStore::new();
    seed_sound_samples(&store, &["a|x", "b|x"]).await;

    let (handle, signal) = cancel_pair();
    handle.cancel();

    let result = check_index(
        &store,
        IndexKind::SubjectAspect,
        &Scope::all(),
        &RepairOptions::new().cancel_on(signal),
    )
    .await;

    assert_eq!(result.unwrap_err(), StoreError::Cancelled);
    assert!(store.journal().is_empty());
}

/// Answers existence checks with one reply too few.
struct ShortExistsStore(InMemoryStore);

#[async_trait]
impl SampleStore for ShortExistsStore {
    async fn scan_page(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        self.0.scan_page(cursor, pattern, count).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.0.set_members(key).await
    }

    async fn set_members_many(&self, keys: &[String]) -> Result<Vec<ItemResult<Vec<String>>>> {
        self.0.set_members_many(keys).await
    }

    async fn exists_many(&self, keys: &[String]) -> Result<Vec<ItemResult<bool>>> {
        let mut replies = self.0.exists_many(keys).await?;
        replies.pop();
        Ok(replies)
    }

    async fn hash_get_all_many(
        &self,
        keys: &[String],
    ) -> Result<Vec<ItemResult<HashMap<String, String>>>> {
        self.0.hash_get_all_many(keys).await
    }

    async fn is_member_many(&self, checks: &[(String, String)]) -> Result<Vec<ItemResult<bool>>> {
        self.0.is_member_many(checks).await
    }

    async fn add_members(&self, adds: &[(String, String)]) -> Result<Vec<ItemResult<bool>>> {
        self.0.add_members(adds).await
    }

    async fn remove_members(&self, removes: &[(String, String)]) -> Result<usize> {
        self.0.remove_members(removes).await
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<usize> {
        self.0.delete_keys(keys).await
    }
}

#[tokio::test]
async fn test_short_exists_reply_is_a_protocol_error() {
    let inner = InMemoryStore::new();
    // Not registered, so the master member check sends no exists batch.
    inner.put_subject("u").await;
    inner.put_aspect("v").await;
    inner.put_sample("u|v", &SampleRecord::new("u|v", "1", "2")).await;
    let store = ShortExistsStore(inner);

    let result = CleanupEngine::new(&store).preview().await;

    assert!(matches!(result, Err(StoreError::Protocol(_))));
    assert!(store.0.contains_key("samsto:sample:u|v").await);
}
