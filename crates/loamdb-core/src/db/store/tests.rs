use crate::{
    config::LockWaitPolicy,
    db::store::{MemoryStore, Row, Store},
    value::Value,
};

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[test]
fn inserts_are_invisible_to_other_transactions_until_commit() {
    let store = MemoryStore::new();
    let t1 = store.begin();
    let t2 = store.begin();

    let ids = store
        .insert(t1, "sale_order", vec![row(&[("name", Value::from("a"))])])
        .expect("insert");
    assert_eq!(ids, vec![1], "sequences start at one and are monotone");

    assert_eq!(store.scan_ids(t1, "sale_order"), vec![1]);
    assert!(
        store.scan_ids(t2, "sale_order").is_empty(),
        "uncommitted rows must not leak across transactions"
    );

    store.commit(t1).expect("commit");
    assert_eq!(store.scan_ids(t2, "sale_order"), vec![1]);
}

#[test]
fn rollback_discards_the_overlay() {
    let store = MemoryStore::new();
    let t1 = store.begin();
    store
        .insert(t1, "sale_order", vec![row(&[("name", Value::from("a"))])])
        .expect("insert");
    store.rollback(t1);

    let t2 = store.begin();
    assert!(store.scan_ids(t2, "sale_order").is_empty());
}

#[test]
fn updates_overlay_committed_rows() {
    let store = MemoryStore::new();
    let t1 = store.begin();
    let ids = store
        .insert(t1, "sale_order", vec![row(&[("name", Value::from("a"))])])
        .expect("insert");
    store.commit(t1).expect("commit");

    let t2 = store.begin();
    store
        .update(t2, "sale_order", &ids, &row(&[("name", Value::from("b"))]))
        .expect("update");
    let fetched = store.fetch(t2, "sale_order", &ids).expect("fetch");
    assert_eq!(fetched[0].1.get("name"), Some(&Value::from("b")));

    // Another transaction still reads the committed value.
    let t3 = store.begin();
    let fetched = store.fetch(t3, "sale_order", &ids).expect("fetch");
    assert_eq!(fetched[0].1.get("name"), Some(&Value::from("a")));
}

#[test]
fn sequences_survive_rollback() {
    let store = MemoryStore::new();
    let t1 = store.begin();
    store
        .insert(t1, "sale_order", vec![Row::new()])
        .expect("insert");
    store.rollback(t1);

    let t2 = store.begin();
    let ids = store.insert(t2, "sale_order", vec![Row::new()]).expect("insert");
    assert_eq!(ids, vec![2], "ids are never reused, even after rollback");
}

#[test]
fn nowait_locks_conflict_across_transactions() {
    let store = MemoryStore::new();
    let t1 = store.begin();
    let ids = store.insert(t1, "sale_order", vec![Row::new()]).expect("insert");
    store.commit(t1).expect("commit");

    let t2 = store.begin();
    let t3 = store.begin();
    store
        .lock_rows(t2, "sale_order", &ids, LockWaitPolicy::Nowait)
        .expect("first lock wins");
    let err = store
        .lock_rows(t3, "sale_order", &ids, LockWaitPolicy::Nowait)
        .expect_err("second lock conflicts");
    assert!(err.is_retryable(), "lock conflicts are retryable");

    // Re-locking by the owner is fine; release on commit frees it.
    store
        .lock_rows(t2, "sale_order", &ids, LockWaitPolicy::Nowait)
        .expect("owner re-lock");
    store.commit(t2).expect("commit");
    store
        .lock_rows(t3, "sale_order", &ids, LockWaitPolicy::Nowait)
        .expect("lock after release");
}

#[test]
fn links_merge_overlay_and_committed_state() {
    let store = MemoryStore::new();
    let t1 = store.begin();
    store.link_add(t1, "order_tag_rel", 1, &[10, 11]);
    store.commit(t1).expect("commit");

    let t2 = store.begin();
    store.link_add(t2, "order_tag_rel", 1, &[12]);
    store.link_remove(t2, "order_tag_rel", 1, &[10]);
    assert_eq!(store.links_of(t2, "order_tag_rel", 1), vec![11, 12]);
    assert_eq!(store.links_referencing(t2, "order_tag_rel", 11), vec![1]);

    // Uncommitted link changes stay private.
    let t3 = store.begin();
    assert_eq!(store.links_of(t3, "order_tag_rel", 1), vec![10, 11]);
}

#[test]
fn translations_roundtrip_with_overlay() {
    let store = MemoryStore::new();
    let t1 = store.begin();
    store.set_translation(t1, "sale_order", "name", 1, "fr_FR", "Bureau");
    assert_eq!(
        store.translation(t1, "sale_order", "name", 1, "fr_FR"),
        Some("Bureau".to_string())
    );
    assert_eq!(store.translation(t1, "sale_order", "name", 1, "de_DE"), None);
    store.commit(t1).expect("commit");

    let t2 = store.begin();
    store.drop_translations(t2, "sale_order", &[1]);
    assert_eq!(store.translation(t2, "sale_order", "name", 1, "fr_FR"), None);
}
