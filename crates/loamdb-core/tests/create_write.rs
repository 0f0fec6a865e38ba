//! Create and write pipeline: defaults, normalization, idempotent writes,
//! tracking, translations, and the onchange protocol.

use loamdb_core::{
    db::env::Env,
    error::Error,
    value::{RelCommand, Value},
    vals,
};
use loamdb_fixtures::{database, seed_order, take_total_compute_calls};

fn env() -> Env {
    database().env()
}

#[test]
fn create_merges_defaults() {
    let env = env();
    let orders = env.model("sale.order").expect("model handle");
    let order = orders
        .create(vec![vals! { "name" => "SO001" }])
        .expect("create");

    assert_eq!(order.get("state").expect("state"), Value::from("draft"));
    assert_eq!(order.get("priority_level").expect("priority"), Value::Int(0));
    assert_eq!(order.get("name").expect("name"), Value::from("SO001"));
}

#[test]
fn batch_create_assigns_monotone_ids() {
    let env = env();
    let orders = env.model("sale.order").expect("model handle");
    let created = orders
        .create(vec![
            vals! { "name" => "SO001" },
            vals! { "name" => "SO002" },
            vals! { "name" => "SO003" },
        ])
        .expect("batch create");

    let ids = created.ids();
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids ascend: {ids:?}");
    assert!(ids.iter().all(|&id| id > 0), "ids are positive");
}

#[test]
fn required_fields_are_enforced_at_create() {
    let env = env();
    let lines = env.model("sale.order.line").expect("model handle");
    let err = lines
        .create(vec![vals! { "price_unit" => 5.0 }])
        .expect_err("order_id is required");
    assert!(matches!(err, Error::Validation { .. }), "{err}");
}

#[test]
fn unknown_selection_keys_are_rejected() {
    let env = env();
    let orders = env.model("sale.order").expect("model handle");
    let err = orders
        .create(vec![vals! { "name" => "SO001", "state" => "bogus" }])
        .expect_err("unknown selection key");
    assert!(err.to_string().contains("not a valid selection key"), "{err}");
}

#[test]
fn char_size_is_enforced_on_write() {
    let env = env();
    let currencies = env.model("res.currency").expect("model handle");
    let err = currencies
        .create(vec![vals! { "name" => "TOOLONG" }])
        .expect_err("size 3 exceeded");
    assert!(err.to_string().contains("maximum length"), "{err}");
}

#[test]
fn writing_an_equal_value_does_not_recompute_dependents() {
    let env = env();
    let orders = env.model("sale.order").expect("model handle");
    let order = seed_order(&orders, "SO001", &[10.0, 7.0]).expect("seeded order");
    env.flush().expect("flush");
    take_total_compute_calls();

    let line = order.rel("line_ids").expect("lines").first();
    line.set("price_unit", 10.0).expect("identical write");
    env.flush().expect("flush");

    assert_eq!(
        take_total_compute_calls(),
        0,
        "an unchanged write must not trigger the dependent compute"
    );
}

#[test]
fn tracked_fields_log_old_and_new_display_values() {
    let env = env();
    let orders = env.model("sale.order").expect("model handle");
    let order = orders
        .create(vec![vals! { "name" => "SO001" }])
        .expect("create");
    env.flush().expect("flush");

    order.set("state", "sent").expect("state change");
    env.flush().expect("flush");

    let entries = env.txn().tracking_entries();
    let state_change = entries
        .iter()
        .find(|e| e.field == "state")
        .expect("state change tracked");
    assert_eq!(state_change.old, "draft");
    assert_eq!(state_change.new, "sent");
    assert_eq!(state_change.model, "sale.order");
}

#[test]
fn html_fields_are_sanitized_on_write() {
    let env = env();
    let orders = env.model("sale.order").expect("model handle");
    let order = orders
        .create(vec![
            vals! { "name" => "SO001", "note" => "<p>ok</p><script>evil()</script>" },
        ])
        .expect("create");
    assert_eq!(order.get("note").expect("note"), Value::from("<p>ok</p>"));
}

#[test]
fn x2many_writes_accept_command_lists() {
    let env = env();
    let orders = env.model("sale.order").expect("model handle");
    let order = seed_order(&orders, "SO001", &[10.0]).expect("seeded order");
    env.flush().expect("flush");

    order
        .set(
            "line_ids",
            Value::Commands(vec![RelCommand::Create(
                vals! { "price_unit" => 5.0, "qty" => 2.0 },
            )]),
        )
        .expect("append a line");
    env.flush().expect("flush");

    assert_eq!(order.rel("line_ids").expect("lines").len(), 2);
    assert_eq!(
        order.get("amount_total").expect("total"),
        Value::Float(20.0),
        "10 + 2*5"
    );
}

#[test]
fn many2many_links_and_clears() {
    let env = env();
    let tags = env.model("project.tag").expect("model handle");
    let tag = tags.create(vec![vals! { "name" => "rush" }]).expect("tag");
    let orders = env.model("sale.order").expect("model handle");
    let order = orders
        .create(vec![vals! { "name" => "SO001" }])
        .expect("create");

    order
        .set("tag_ids", Value::Commands(vec![RelCommand::Link(tag.id().expect("id"))]))
        .expect("link tag");
    assert_eq!(order.rel("tag_ids").expect("tags").len(), 1);

    order
        .set("tag_ids", Value::Commands(vec![RelCommand::Clear]))
        .expect("clear tags");
    assert_eq!(order.rel("tag_ids").expect("tags").len(), 0);
}

#[test]
fn unique_constraints_reject_duplicates_at_flush() {
    let env = env();
    let orders = env.model("sale.order").expect("model handle");
    orders
        .create(vec![vals! { "name" => "SO001" }])
        .expect("first");
    orders
        .create(vec![vals! { "name" => "SO001" }])
        .expect("second create is fine until flush");
    let err = env.flush().expect_err("duplicate name");
    assert!(err.to_string().contains("name_uniq"), "{err}");
}

#[test]
fn default_get_exposes_merged_defaults() {
    let env = env();
    let orders = env.model("sale.order").expect("model handle");
    let defaults = orders
        .default_get(&["name", "state", "reference"])
        .expect("defaults");
    assert_eq!(defaults.get("name"), Some(&Value::from("New")));
    assert_eq!(defaults.get("state"), Some(&Value::from("draft")));
    assert_eq!(defaults.get("reference"), None, "no default declared");
}

#[test]
fn onchange_returns_the_tentative_diff() {
    let env = env();
    let orders = env.model("sale.order").expect("model handle");
    let diff = orders
        .onchange(vals! { "name" => "SO001", "state" => "sent" }, &["state"])
        .expect("onchange");
    assert_eq!(
        diff.get("reference"),
        Some(&Value::from("REF-sent")),
        "the hook proposes a reference"
    );
    assert_eq!(diff.get("name"), None, "untouched fields stay out of the diff");

    // Nothing was persisted.
    let count = orders.search_count(&loamdb_core::domain![]).expect("count");
    assert_eq!(count, 0);
}

#[test]
fn translations_write_per_language_and_fall_back() {
    let env = env();
    let partners = env.model("res.partner").expect("model handle");
    let partner = partners
        .create(vec![vals! { "name" => "Desk" }])
        .expect("create");
    env.flush().expect("flush");

    let env_fr = env.with_lang("fr_FR");
    let partner_fr = partner.with_env(env_fr.clone());
    partner_fr.set("name", "Bureau").expect("translated write");

    assert_eq!(partner_fr.get("name").expect("fr"), Value::from("Bureau"));
    assert_eq!(
        partner.get("name").expect("source"),
        Value::from("Desk"),
        "the source column is untouched"
    );

    // Untranslated language falls back to the source.
    let partner_de = partner.with_env(env.with_lang("de_DE"));
    assert_eq!(partner_de.get("name").expect("fallback"), Value::from("Desk"));
}

#[test]
fn computed_fields_reject_plain_writes() {
    let env = env();
    let orders = env.model("sale.order").expect("model handle");
    let order = seed_order(&orders, "SO001", &[10.0]).expect("seeded order");
    env.flush().expect("flush");

    let err = order
        .set("amount_total", 99.0)
        .expect_err("stored computes without inverse are read-only");
    assert!(err.to_string().contains("cannot be written"), "{err}");
}
