//! Transactions, locking, and failure semantics: send-once with nowait
//! locks, rollback unwinding, missing records, and ondelete rules.

use loamdb_core::{
    db::{env::Env, recordset::RecordSet},
    domain,
    error::Error,
    value::Value,
    vals,
};
use loamdb_fixtures::database;

/// The "send document" operation: pin the row, then transition to `sent`
/// unless someone else already did. Idempotent by design, so a lock
/// conflict is log-and-skip; committing is the caller's business.
fn send_order(order: &RecordSet) -> Result<bool, Error> {
    if !order.try_lock_for_update()? {
        return Ok(false);
    }
    if order.get("state")? == Value::from("sent") {
        return Ok(false);
    }
    order.set("state", "sent")?;
    Ok(true)
}

#[test]
fn send_once_under_concurrent_workers() {
    let db = database();

    // Seed and commit so both workers see the order.
    let setup = db.env();
    let id = setup
        .model("sale.order")
        .expect("model handle")
        .create(vec![vals! { "name" => "SO001" }])
        .expect("create")
        .id()
        .expect("id");
    setup.commit().expect("commit");

    // Two workers, two open transactions, same record. The second driver
    // hits the held lock and skips while the first is still in flight.
    let env_a = db.env();
    let env_b = db.env();
    let order_a = env_a.records("sale.order", &[id]).expect("browse");
    let order_b = env_b.records("sale.order", &[id]).expect("browse");

    let sent_a = send_order(&order_a).expect("worker a");
    let sent_b = send_order(&order_b).expect("worker b skips on the held lock");
    assert!(sent_a, "the first worker sends");
    assert!(!sent_b, "the second worker logs and skips");
    env_a.commit().expect("worker a commits");

    // A later run finds the work already done.
    let env_c = db.env();
    let order_c = env_c.records("sale.order", &[id]).expect("browse");
    assert!(
        !send_order(&order_c).expect("worker c"),
        "the state guard makes re-runs no-ops"
    );
    assert_eq!(order_c.get("state").expect("state"), Value::from("sent"));

    let state_changes: Vec<_> = env_a
        .txn()
        .tracking_entries()
        .into_iter()
        .filter(|e| e.field == "state")
        .collect();
    assert_eq!(state_changes.len(), 1, "the transition happened exactly once");
}

#[test]
fn lock_conflicts_are_retryable_errors() {
    let db = database();
    let setup = db.env();
    let id = setup
        .model("sale.order")
        .expect("model handle")
        .create(vec![vals! { "name" => "SO001" }])
        .expect("create")
        .id()
        .expect("id");
    setup.commit().expect("commit");

    let env_a = db.env();
    let env_b = db.env();
    env_a
        .records("sale.order", &[id])
        .expect("browse")
        .lock_for_update()
        .expect("first lock");
    let err = env_b
        .records("sale.order", &[id])
        .expect("browse")
        .lock_for_update()
        .expect_err("second lock conflicts");
    assert!(err.is_retryable());
    assert!(
        matches!(&err, Error::Concurrency { entity, .. } if entity == "sale.order"),
        "{err}"
    );
}

#[test]
fn rollback_unwinds_cache_and_queues() {
    let db = database();
    let env = db.env();
    let orders = env.model("sale.order").expect("model handle");
    loamdb_fixtures::seed_order(&orders, "SO001", &[10.0]).expect("seed");
    env.rollback();

    let fresh = db.env();
    let count = fresh
        .model("sale.order")
        .expect("model handle")
        .search_count(&domain![])
        .expect("count");
    assert_eq!(count, 0, "no partial effect persists after rollback");
}

#[test]
fn reading_a_deleted_record_is_a_missing_error() {
    let db = database();
    let env = db.env();
    let orders = env.model("sale.order").expect("model handle");
    let id = orders
        .create(vec![vals! { "name" => "SO001" }])
        .expect("create")
        .id()
        .expect("id");
    env.commit().expect("commit");

    let env2 = db.env();
    env2.records("sale.order", &[id])
        .expect("browse")
        .unlink()
        .expect("unlink");
    env2.commit().expect("commit");

    let env3 = db.env();
    let gone = env3.records("sale.order", &[id]).expect("browse");
    let err = gone.get("name").expect_err("record is gone");
    assert!(
        matches!(err, Error::Missing { id: missing, .. } if missing == id),
        "{err}"
    );
}

#[test]
fn restrict_blocks_unlink_and_leaves_data_unchanged() {
    let env = database().env();
    let users = env.model("res.users").expect("model handle");
    let user = users
        .create(vec![vals! { "login" => "bob", "name" => "Bob" }])
        .expect("user");
    let partner = user.rel("partner_id").expect("parent");

    let err = partner.unlink().expect_err("restrict reference");
    assert!(matches!(err, Error::Validation { .. }), "{err}");
    assert_eq!(
        partner.exists().expect("exists").len(),
        1,
        "the restricted target is untouched"
    );
    assert_eq!(user.get("login").expect("login"), Value::from("bob"));
}

#[test]
fn cascade_unlink_removes_dependents() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    let order = loamdb_fixtures::seed_order(&orders, "SO001", &[10.0, 7.0]).expect("seed");
    env.flush().expect("flush");

    order.unlink().expect("unlink order");
    env.flush().expect("flush");

    let lines = env.model("sale.order.line").expect("model handle");
    assert_eq!(
        lines.search_count(&domain![]).expect("count"),
        0,
        "lines cascade with their order"
    );
}

#[test]
fn ondelete_hooks_refuse_business_violations() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    let order = orders
        .create(vec![vals! { "name" => "SO001", "state" => "done" }])
        .expect("create");
    let err = order.unlink().expect_err("done orders are protected");
    assert!(matches!(err, Error::User { .. }), "{err}");
    assert_eq!(order.exists().expect("exists").len(), 1);
}

#[test]
fn after_commit_hooks_run_only_on_commit() {
    use std::{cell::Cell, rc::Rc};
    let db = database();
    let env: Env = db.env();
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    env.txn().after_commit(move || flag.set(true));

    env.model("sale.order")
        .expect("model handle")
        .create(vec![vals! { "name" => "SO001" }])
        .expect("create");
    assert!(!ran.get(), "hooks wait for the commit");
    env.commit().expect("commit");
    assert!(ran.get(), "hooks run after a successful commit");
}
