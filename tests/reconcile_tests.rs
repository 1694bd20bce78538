/// Reconciliation tests
///
/// Check-then-rebuild passes, the overlap guard and the background worker
/// Run with: cargo test --test reconcile_tests

use samstore::repair::ReconcileState;
use samstore::{
    IndexKind, InMemoryStore, ReconcileOutcome, ReconcileWorker, Reconciler, RepairOptions,
    SampleRecord, Scope, StoreError,
};
use std::sync::Arc;
use std::time::Duration;

async fn seed_samples(store: &InMemoryStore, names: &[&str]) {
    for name in names {
        store
            .put_registered_sample(name, &SampleRecord::new(name, "1", "2"))
            .await;
    }
}

#[tokio::test]
async fn test_drift_triggers_rebuild_then_settles() {
    let store = Arc::new(InMemoryStore::new());
    seed_samples(&store, &["a|x", "a|y", "b|x"]).await;
    store.put_member("samsto:subaspmap:a", "stale").await;

    let reconciler = Reconciler::new(store.clone());
    assert_eq!(reconciler.state(), ReconcileState::Idle);

    let first = reconciler.reconcile_once().await.unwrap();
    match &first {
        ReconcileOutcome::Rebuilt { check, rebuild } => {
            assert_eq!(check.total, 3);
            assert_eq!(check.found_in_map, 0);
            assert_eq!(rebuild.deleted, 1);
            assert_eq!(rebuild.added, 3);
        }
        other => panic!("expected a rebuild, got {:?}", other),
    }
    assert_eq!(store.members("samsto:subaspmap:a").await, vec!["x", "y"]);

    let second = reconciler.reconcile_once().await.unwrap();
    match second {
        ReconcileOutcome::Consistent { check } => {
            assert_eq!(check.total, 3);
            assert_eq!(check.found_in_map, 3);
        }
        other => panic!("expected a consistent index, got {:?}", other),
    }
    assert_eq!(reconciler.passes(), 2);
    assert_eq!(reconciler.state(), ReconcileState::Idle);
}

#[tokio::test]
async fn test_consistent_index_is_not_rewritten() {
    let store = Arc::new(InMemoryStore::new());
    seed_samples(&store, &["a|x"]).await;
    store.put_member("samsto:subaspmap:a", "x").await;
    store.clear_journal();

    let outcome = Reconciler::new(store.clone())
        .reconcile_once()
        .await
        .unwrap();

    assert!(!outcome.rebuilt());
    assert!(store.journal().iter().all(|line| line.starts_with("SCAN ")));
}

#[tokio::test]
async fn test_overlapping_pass_is_skipped() {
    let store = Arc::new(InMemoryStore::new());
    seed_samples(&store, &["a|x", "b|x"]).await;
    store.set_latency(Some(Duration::from_millis(20)));

    let reconciler = Arc::new(Reconciler::new(store.clone()));
    let (first, second) = tokio::join!(reconciler.reconcile_once(), reconciler.reconcile_once());

    let outcomes = [first.unwrap(), second.unwrap()];
    let skipped = outcomes
        .iter()
        .filter(|outcome| **outcome == ReconcileOutcome::Skipped)
        .count();
    assert_eq!(skipped, 1);
    assert_eq!(reconciler.passes(), 1);
    assert_eq!(reconciler.state(), ReconcileState::Idle);
}

#[tokio::test]
async fn test_failed_pass_releases_guard() {
    let store = Arc::new(InMemoryStore::new());
    seed_samples(&store, &["a|x"]).await;
    store.fail_scan_after(0);

    let reconciler = Reconciler::new(store.clone());
    let err = reconciler.reconcile_once().await.unwrap_err();
    assert!(matches!(err, StoreError::Scan(_)));
    assert_eq!(reconciler.state(), ReconcileState::Idle);

    store.clear_faults();
    let outcome = reconciler.reconcile_once().await.unwrap();
    assert!(outcome.rebuilt());
}

#[tokio::test]
async fn test_scoped_reconcile_leaves_other_subjects_alone() {
    let store = Arc::new(InMemoryStore::new());
    seed_samples(&store, &["canada|temp", "mexico|temp"]).await;
    store.put_member("samsto:subaspmap:mexico", "old").await;
    store.clear_journal();

    let outcome = Reconciler::new(store.clone())
        .scope(Scope::new("canada"))
        .reconcile_once()
        .await
        .unwrap();

    assert!(outcome.rebuilt());
    assert_eq!(store.members("samsto:subaspmap:canada").await, vec!["temp"]);
    assert_eq!(store.members("samsto:subaspmap:mexico").await, vec!["old"]);
    for line in store.journal() {
        assert!(!line.contains("mexico"), "unexpected store access: {}", line);
        if let Some(pattern) = line.strip_prefix("SCAN ") {
            assert!(pattern.ends_with(":canada*"), "unscoped scan: {}", pattern);
        }
    }
}

#[tokio::test]
async fn test_reconcile_aspect_index() {
    let store = Arc::new(InMemoryStore::new());
    seed_samples(&store, &["a|x", "b|x"]).await;

    let reconciler = Reconciler::new(store.clone()).index(IndexKind::AspectSubject);
    assert!(reconciler.reconcile_once().await.unwrap().rebuilt());
    assert_eq!(store.members("samsto:aspsubmap:x").await, vec!["a", "b"]);
}

#[tokio::test]
async fn test_malformed_sample_key_does_not_keep_rebuilding() {
    let store = Arc::new(InMemoryStore::new());
    seed_samples(&store, &["a|x", "noseparator"]).await;

    let reconciler = Reconciler::new(store.clone());
    let first = reconciler.reconcile_once().await.unwrap();
    assert!(first.rebuilt());

    store.clear_journal();
    for _ in 0..2 {
        match reconciler.reconcile_once().await.unwrap() {
            ReconcileOutcome::Consistent { check } => {
                assert_eq!(check.total, 1);
                assert_eq!(check.found_in_map, 1);
                assert_eq!(check.unparseable, 1);
            }
            other => panic!("expected a consistent index, got {:?}", other),
        }
    }
    assert!(store.journal().iter().all(|line| line.starts_with("SCAN ")));
    assert_eq!(store.members("samsto:subaspmap:a").await, vec!["x"]);
}

#[tokio::test]
async fn test_worker_runs_immediately_and_stops() {
    let store = Arc::new(InMemoryStore::new());
    seed_samples(&store, &["a|x"]).await;

    let reconciler = Arc::new(
        Reconciler::new(store.clone()).options(RepairOptions::new().scan_count(10)),
    );
    // Long interval: only the immediate first pass can run in this test.
    let worker = ReconcileWorker::spawn(reconciler.clone(), Duration::from_secs(3600));

    for _ in 0..200 {
        if reconciler.passes() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    worker.stop().await.unwrap();

    assert_eq!(reconciler.passes(), 1);
    assert_eq!(store.members("samsto:subaspmap:a").await, vec!["x"]);
}

#[tokio::test]
async fn test_worker_repeats_on_interval() {
    let store = Arc::new(InMemoryStore::new());
    seed_samples(&store, &["a|x"]).await;

    let reconciler = Arc::new(Reconciler::new(store.clone()));
    let worker = ReconcileWorker::spawn(reconciler.clone(), Duration::from_millis(10));

    for _ in 0..400 {
        if reconciler.passes() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    worker.stop().await.unwrap();

    assert!(reconciler.passes() >= 3);
}
