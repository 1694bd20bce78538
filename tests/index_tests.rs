/// Index check and rebuild tests
///
/// Subject-keyed and aspect-keyed index maintenance against the in-memory store
/// Run with: cargo test --test index_tests

use samstore::{
    IndexKind, InMemoryStore, RebuildMode, RepairOptions, SampleRecord, Scope, check_index,
    delete_index, populate_aspect_map_from_subject_map, populate_index, rebuild_index,
};

async fn seed_samples(store: &InMemoryStore, names: &[&str]) {
    for name in names {
        store
            .put_registered_sample(name, &SampleRecord::new(name, "1", "2"))
            .await;
    }
}

#[tokio::test]
async fn test_check_before_and_after_populate() {
    let store = InMemoryStore::new();
    seed_samples(&store, &["u|v"]).await;
    let options = RepairOptions::default();

    let before = check_index(&store, IndexKind::SubjectAspect, &Scope::all(), &options)
        .await
        .unwrap();
    assert_eq!(before.total, 1);
    assert_eq!(before.found_in_map, 0);
    assert_eq!(before.drift(), 1);
    assert_eq!(before.missing, vec!["samsto:sample:u|v"]);

    let added = populate_index(&store, IndexKind::SubjectAspect, &Scope::all(), &options)
        .await
        .unwrap();
    assert_eq!(added, 1);

    let after = check_index(&store, IndexKind::SubjectAspect, &Scope::all(), &options)
        .await
        .unwrap();
    assert_eq!(after.total, 1);
    assert_eq!(after.found_in_map, 1);
    assert!(after.is_consistent());
    assert!(after.missing.is_empty());
}

#[tokio::test]
async fn test_check_is_read_only() {
    let store = InMemoryStore::new();
    seed_samples(&store, &["a|x", "a|y", "b|x"]).await;
    store.put_member("samsto:subaspmap:a", "x").await;
    store.clear_journal();

    let report = check_index(
        &store,
        IndexKind::SubjectAspect,
        &Scope::all(),
        &RepairOptions::new().scan_count(1),
    )
    .await
    .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.found_in_map, 1);
    assert!(report.found_in_map <= report.total);
    assert!(store.journal().iter().all(|line| line.starts_with("SCAN ")));
}

#[tokio::test]
async fn test_check_leaves_unparseable_keys_out_of_total() {
    let store = InMemoryStore::new();
    seed_samples(&store, &["noseparator", "two|bars|here", "a|x"]).await;
    store.put_member("samsto:subaspmap:a", "x").await;

    let report = check_index(
        &store,
        IndexKind::SubjectAspect,
        &Scope::all(),
        &RepairOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.total, 1);
    assert_eq!(report.found_in_map, 1);
    assert_eq!(report.unparseable, 2);
    assert!(report.missing.is_empty());
    assert!(report.is_consistent());
}

#[tokio::test]
async fn test_check_aspect_index() {
    let store = InMemoryStore::new();
    seed_samples(&store, &["a|x", "b|x"]).await;
    store.put_member("samsto:aspsubmap:x", "a").await;

    let report = check_index(
        &store,
        IndexKind::AspectSubject,
        &Scope::all(),
        &RepairOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.found_in_map, 1);
    assert_eq!(report.missing, vec!["samsto:sample:b|x"]);
}

#[tokio::test]
async fn test_rebuild_round_trip() {
    let store = InMemoryStore::new();
    seed_samples(&store, &["a|x", "a|y", "b|x"]).await;
    store.put_member("samsto:subaspmap:a", "stale").await;
    store.put_member("samsto:subaspmap:gone", "x").await;

    let report = rebuild_index(
        &store,
        IndexKind::SubjectAspect,
        &Scope::all(),
        RebuildMode::Full,
        &RepairOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.deleted, 2);
    assert_eq!(report.added, 3);
    assert_eq!(report.mode, RebuildMode::Full);
    assert_eq!(store.members("samsto:subaspmap:a").await, vec!["x", "y"]);
    assert_eq!(store.members("samsto:subaspmap:b").await, vec!["x"]);
    assert!(!store.contains_key("samsto:subaspmap:gone").await);
}

#[tokio::test]
async fn test_additive_rebuild_keeps_stale_members() {
    let store = InMemoryStore::new();
    seed_samples(&store, &["a|x", "a|y"]).await;
    store.put_member("samsto:subaspmap:a", "stale").await;

    let report = rebuild_index(
        &store,
        IndexKind::SubjectAspect,
        &Scope::all(),
        RebuildMode::Additive,
        &RepairOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.deleted, 0);
    assert_eq!(report.added, 2);
    assert_eq!(
        store.members("samsto:subaspmap:a").await,
        vec!["stale", "x", "y"]
    );
}

#[tokio::test]
async fn test_populate_twice_adds_no_duplicates() {
    let store = InMemoryStore::new();
    seed_samples(&store, &["a|x", "a|y", "b|x"]).await;
    let options = RepairOptions::new().scan_count(2);

    populate_index(&store, IndexKind::SubjectAspect, &Scope::all(), &options)
        .await
        .unwrap();
    populate_index(&store, IndexKind::SubjectAspect, &Scope::all(), &options)
        .await
        .unwrap();

    assert_eq!(store.members("samsto:subaspmap:a").await, vec!["x", "y"]);
    assert_eq!(store.members("samsto:subaspmap:b").await, vec!["x"]);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let store = InMemoryStore::new();
    store.put_member("samsto:subaspmap:a", "x").await;
    let options = RepairOptions::default();

    let first = delete_index(&store, IndexKind::SubjectAspect, &Scope::all(), &options)
        .await
        .unwrap();
    let second = delete_index(&store, IndexKind::SubjectAspect, &Scope::all(), &options)
        .await
        .unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 0);
}

#[tokio::test]
async fn test_aspect_index_round_trip() {
    let store = InMemoryStore::new();
    seed_samples(&store, &["a|x", "a|y", "b|x"]).await;

    rebuild_index(
        &store,
        IndexKind::AspectSubject,
        &Scope::all(),
        RebuildMode::Full,
        &RepairOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(store.members("samsto:aspsubmap:x").await, vec!["a", "b"]);
    assert_eq!(store.members("samsto:aspsubmap:y").await, vec!["a"]);
}

#[tokio::test]
async fn test_scoped_aspect_delete_keeps_other_subjects() {
    let store = InMemoryStore::new();
    store.put_member("samsto:aspsubmap:temp", "canada").await;
    store.put_member("samsto:aspsubmap:temp", "mexico").await;
    store.put_member("samsto:aspsubmap:rain", "canada").await;

    let removed = delete_index(
        &store,
        IndexKind::AspectSubject,
        &Scope::new("canada"),
        &RepairOptions::new().scan_count(1),
    )
    .await
    .unwrap();

    assert_eq!(removed, 2);
    assert_eq!(store.members("samsto:aspsubmap:temp").await, vec!["mexico"]);
    assert!(!store.contains_key("samsto:aspsubmap:rain").await);
}

#[tokio::test]
async fn test_scoped_rebuild_touches_only_its_subtree() {
    let store = InMemoryStore::new();
    seed_samples(&store, &["canada|temp", "canada|rain", "mexico|temp"]).await;
    store.put_member("samsto:subaspmap:canada", "stale").await;
    store.put_member("samsto:subaspmap:mexico", "old").await;
    store.clear_journal();

    let scope = Scope::new("canada");
    let report = rebuild_index(
        &store,
        IndexKind::SubjectAspect,
        &scope,
        RebuildMode::Full,
        &RepairOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(report.added, 2);
    assert_eq!(
        store.members("samsto:subaspmap:canada").await,
        vec!["rain", "temp"]
    );
    assert_eq!(store.members("samsto:subaspmap:mexico").await, vec!["old"]);

    let journal = store.journal();
    assert!(journal.contains(&"SCAN samsto:subaspmap:canada*".to_string()));
    assert!(journal.contains(&"SCAN samsto:sample:canada*".to_string()));
    assert!(journal.iter().all(|line| !line.contains("mexico")));
}

#[tokio::test]
async fn test_aspect_map_from_subject_map() {
    let store = InMemoryStore::new();
    store.put_subject("canada").await;
    store.put_subject("mexico").await;
    store.put_member("samsto:subaspmap:canada", "temp").await;
    store.put_member("samsto:subaspmap:canada", "rain").await;
    store.put_member("samsto:subaspmap:mexico", "temp").await;

    let added = populate_aspect_map_from_subject_map(&store, &Scope::all(), &RepairOptions::default())
        .await
        .unwrap();

    assert_eq!(added, 3);
    assert_eq!(
        store.members("samsto:aspsubmap:temp").await,
        vec!["canada", "mexico"]
    );
    assert_eq!(store.members("samsto:aspsubmap:rain").await, vec!["canada"]);
}

#[tokio::test]
async fn test_scoped_aspect_map_from_subject_map() {
    let store = InMemoryStore::new();
    store.put_subject("canada").await;
    store.put_subject("mexico").await;
    store.put_member("samsto:subaspmap:canada", "temp").await;
    store.put_member("samsto:subaspmap:mexico", "temp").await;

    let added = populate_aspect_map_from_subject_map(
        &store,
        &Scope::new("mexico"),
        &RepairOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(added, 1);
    assert_eq!(store.members("samsto:aspsubmap:temp").await, vec!["mexico"]);
}
