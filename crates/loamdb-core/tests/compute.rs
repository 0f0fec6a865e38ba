//! Dependency-driven recomputation: stored computes, virtual computes,
//! inverses, convergence on cyclic graphs, and the compute contract.

use loamdb_core::{
    config::DbConfig,
    db::recordset::RecordSet,
    error::Error,
    registry::RegistryBuilder,
    schema::{EntityDef, FieldDef},
    value::Value,
    vals,
};
use loamdb_fixtures::{database, database_with, seed_order};

#[test]
fn order_total_follows_its_lines() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    let order = seed_order(&orders, "SO001", &[10.0, 7.0]).expect("seeded order");
    env.flush().expect("flush");
    assert_eq!(order.get("amount_total").expect("total"), Value::Float(17.0));

    let line = order.rel("line_ids").expect("lines").first();
    line.set("price_unit", 20.0).expect("edit line");
    env.flush().expect("flush");
    assert_eq!(
        order.get("amount_total").expect("total"),
        Value::Float(27.0),
        "editing a line propagates through the dependency graph"
    );
}

#[test]
fn stored_computes_are_never_observed_stale() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    let order = seed_order(&orders, "SO001", &[3.0]).expect("seeded order");

    // No explicit flush: the read itself must recompute first.
    assert_eq!(order.get("amount_total").expect("total"), Value::Float(3.0));

    let line = order.rel("line_ids").expect("lines").first();
    line.set("qty", 4.0).expect("edit qty");
    assert_eq!(
        order.get("amount_total").expect("total"),
        Value::Float(12.0),
        "reading a stale stored compute recomputes it"
    );
}

#[test]
fn relinking_a_line_moves_the_amount() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    let first = seed_order(&orders, "SO001", &[10.0]).expect("first order");
    let second = seed_order(&orders, "SO002", &[5.0]).expect("second order");
    env.flush().expect("flush");

    let moved = first.rel("line_ids").expect("lines").first();
    moved
        .set("order_id", second.id().expect("id"))
        .expect("relink line");
    env.flush().expect("flush");

    assert_eq!(first.get("amount_total").expect("total"), Value::Float(0.0));
    assert_eq!(
        second.get("amount_total").expect("total"),
        Value::Float(15.0),
        "both the old and the new parent recompute"
    );
}

#[test]
fn deleting_a_line_recomputes_the_parent() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    let order = seed_order(&orders, "SO001", &[10.0, 7.0]).expect("seeded order");
    env.flush().expect("flush");

    order
        .rel("line_ids")
        .expect("lines")
        .first()
        .unlink()
        .expect("delete line");
    env.flush().expect("flush");

    assert_eq!(order.get("amount_total").expect("total"), Value::Float(7.0));
}

#[test]
fn virtual_computes_calculate_on_read_and_invalidate() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    let order = orders
        .create(vec![vals! { "name" => "SO001" }])
        .expect("create");

    assert_eq!(order.get("urgent").expect("urgent"), Value::Bool(false));
    order.set("priority_level", 5i64).expect("raise priority");
    assert_eq!(
        order.get("urgent").expect("urgent"),
        Value::Bool(true),
        "changing the dependency invalidates the cached compute"
    );
}

#[test]
fn inverse_hooks_make_computes_writable() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    let order = orders
        .create(vec![vals! { "name" => "SO001" }])
        .expect("create");

    order.set("urgent", true).expect("write through inverse");
    assert_eq!(
        order.get("priority_level").expect("priority"),
        Value::Int(2),
        "the inverse propagated onto the stored field"
    );
}

#[test]
fn compute_that_skips_records_is_a_programming_error() {
    let registry = RegistryBuilder::new()
        .entity(
            EntityDef::new("bad.model")
                .field(FieldDef::float("base"))
                .field(FieldDef::float("out").compute("broken", &["base"]).stored())
                .compute_fn("broken", broken_compute),
        )
        .build()
        .expect("registry builds");
    let env = loamdb_core::db::database::Database::new(registry, DbConfig::default()).env();

    let handle = env.model("bad.model").expect("model handle");
    handle
        .create(vec![vals! { "base" => 1.0 }, vals! { "base" => 2.0 }])
        .expect("create");
    let err = env.flush().expect_err("compute left a hole");
    assert!(matches!(err, Error::Programming { .. }), "{err}");
}

fn broken_compute(recs: &RecordSet) -> Result<(), Error> {
    // Contract breach: only the first record of the batch gets a value.
    if let Some(first) = recs.iter().next() {
        first.set("out", 1.0)?;
    }
    Ok(())
}

#[test]
fn cyclic_dependencies_converge() {
    // a depends on seed and peer.b; b depends on peer.a. With two records
    // pointing at each other the recomputation must still settle.
    let registry = RegistryBuilder::new()
        .entity(
            EntityDef::new("cyc.model")
                .field(FieldDef::many2one("peer_id", "cyc.model"))
                .field(FieldDef::float("seed"))
                .field(FieldDef::float("a").compute("ca", &["seed", "peer_id.b"]).stored())
                .field(FieldDef::float("b").compute("cb", &["peer_id.a"]).stored())
                .compute_fn("ca", |recs| {
                    for one in recs.iter() {
                        let seed = one.get("seed")?.as_f64().unwrap_or(0.0);
                        let peer_b = one.rel("peer_id")?.get("b").ok().and_then(|v| v.as_f64());
                        one.set("a", seed + peer_b.unwrap_or(0.0) * 0.0)?;
                    }
                    Ok(())
                })
                .compute_fn("cb", |recs| {
                    for one in recs.iter() {
                        let peer_a = one.rel("peer_id")?.get("a").ok().and_then(|v| v.as_f64());
                        one.set("b", peer_a.unwrap_or(0.0) / 2.0)?;
                    }
                    Ok(())
                }),
        )
        .build()
        .expect("cycles are permitted in the graph");
    let env = loamdb_core::db::database::Database::new(registry, DbConfig::default()).env();

    let handle = env.model("cyc.model").expect("model handle");
    let pair = handle
        .create(vec![vals! { "seed" => 8.0 }, vals! { "seed" => 6.0 }])
        .expect("create");
    let ids = pair.ids();
    let left = handle.browse(&ids[..1]);
    let right = handle.browse(&ids[1..]);
    left.set("peer_id", ids[1]).expect("link left to right");
    right.set("peer_id", ids[0]).expect("link right to left");

    env.flush().expect("recomputation terminates despite the cycle");
    assert_eq!(left.get("a").expect("a"), Value::Float(8.0));
    assert_eq!(right.get("b").expect("b"), Value::Float(4.0));
}

#[test]
fn recompute_on_commit_disabled_leaves_stored_values_stale() {
    let db = database_with(DbConfig {
        recompute_on_commit: false,
        ..DbConfig::default()
    });
    let env = db.env();
    let orders = env.model("sale.order").expect("model handle");
    let order = seed_order(&orders, "SO001", &[10.0]).expect("seeded order");
    let id = order.id().expect("id");
    env.commit().expect("commit without recompute");

    // A fresh transaction sees the stale stored value...
    let env2 = db.env();
    let reloaded = env2.records("sale.order", &[id]).expect("browse");
    assert_eq!(
        reloaded.get("amount_total").expect("total"),
        Value::Null,
        "the stored compute was never flushed"
    );

    // ...until a change marks it again and flush recomputes.
    let line = reloaded.rel("line_ids").expect("lines").first();
    line.set("qty", 2.0).expect("edit");
    env2.flush().expect("flush");
    assert_eq!(
        reloaded.get("amount_total").expect("total"),
        Value::Float(20.0)
    );
}
