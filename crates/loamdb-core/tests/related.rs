//! Related aliases and delegated inheritance: path reads, write-through,
//! and parent synchronization at create.

use loamdb_core::{error::Error, value::Value, vals};
use loamdb_fixtures::database;

#[test]
fn related_fields_follow_their_path() {
    let env = database().env();
    let partners = env.model("res.partner").expect("model handle");
    let partner = partners
        .create(vec![vals! { "name" => "Azure Interior" }])
        .expect("partner");
    let orders = env.model("sale.order").expect("model handle");
    let order = orders
        .create(vec![vals! { "name" => "SO001", "partner_id" => partner.id().expect("id") }])
        .expect("order");

    assert_eq!(
        order.get("partner_name").expect("alias"),
        Value::from("Azure Interior")
    );
}

#[test]
fn related_write_through_reaches_the_endpoint() {
    let env = database().env();
    let partners = env.model("res.partner").expect("model handle");
    let partner = partners
        .create(vec![vals! { "name" => "Old Name" }])
        .expect("partner");
    let orders = env.model("sale.order").expect("model handle");
    let order = orders
        .create(vec![vals! { "name" => "SO001", "partner_id" => partner.id().expect("id") }])
        .expect("order");

    order.set("partner_name", "X").expect("write through");
    env.flush().expect("flush");

    assert_eq!(
        order.rel("partner_id").expect("partner").get("name").expect("name"),
        Value::from("X"),
        "the write landed on the endpoint"
    );
    assert_eq!(
        order.get("partner_name").expect("alias"),
        Value::from("X"),
        "reading the alias agrees with the endpoint"
    );
}

#[test]
fn related_changes_invalidate_the_alias() {
    let env = database().env();
    let partners = env.model("res.partner").expect("model handle");
    let partner = partners
        .create(vec![vals! { "name" => "Before" }])
        .expect("partner");
    let orders = env.model("sale.order").expect("model handle");
    let order = orders
        .create(vec![vals! { "name" => "SO001", "partner_id" => partner.id().expect("id") }])
        .expect("order");

    assert_eq!(order.get("partner_name").expect("alias"), Value::from("Before"));
    partner.set("name", "After").expect("endpoint write");
    assert_eq!(
        order.get("partner_name").expect("alias"),
        Value::from("After"),
        "changing the endpoint invalidates the cached alias"
    );
}

#[test]
fn write_through_an_empty_relation_is_refused() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    let order = orders
        .create(vec![vals! { "name" => "SO001" }])
        .expect("order without partner");
    let err = order
        .set("partner_name", "X")
        .expect_err("no partner to write through");
    assert!(matches!(err, Error::Validation { .. }), "{err}");
}

#[test]
fn delegated_fields_read_and_write_transparently() {
    let env = database().env();
    let users = env.model("res.users").expect("model handle");
    let user = users
        .create(vec![vals! { "login" => "bob", "name" => "Bob" }])
        .expect("the delegated parent is created on the fly");

    assert_eq!(user.get("name").expect("delegated read"), Value::from("Bob"));
    assert_eq!(user.get("login").expect("own field"), Value::from("bob"));

    // The parent record really exists and carries the value.
    let partner = user.rel("partner_id").expect("parent");
    assert_eq!(partner.len(), 1);
    assert_eq!(partner.get("name").expect("name"), Value::from("Bob"));

    // Writing the delegated field writes through to the parent.
    user.set("name", "Robert").expect("delegated write");
    assert_eq!(partner.get("name").expect("name"), Value::from("Robert"));
}

#[test]
fn delegation_respects_an_explicit_reference() {
    let env = database().env();
    let partners = env.model("res.partner").expect("model handle");
    let partner = partners
        .create(vec![vals! { "name" => "Existing" }])
        .expect("partner");
    let users = env.model("res.users").expect("model handle");
    let user = users
        .create(vec![
            vals! { "login" => "eve", "partner_id" => partner.id().expect("id") },
        ])
        .expect("user");

    assert_eq!(
        user.get("name").expect("delegated read"),
        Value::from("Existing"),
        "no parent is created when the reference is supplied"
    );
    assert_eq!(
        partners.search_count(&loamdb_core::domain![]).expect("count"),
        1
    );
}
