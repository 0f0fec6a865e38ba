//! Demo business schema for the loamdb test suites: partners, users,
//! currencies, tags, and sale orders with computed totals. Exercises every
//! field kind, delegation, selection expansion, tracking, and access
//! rules.

use loamdb_core::{
    config::DbConfig,
    db::{access::Perms, database::Database, query::Domain, recordset::RecordSet},
    error::Error,
    registry::{Registry, RegistryBuilder},
    schema::{EntityDef, FieldDef, OnDelete},
    value::{Value, command::Vals},
};
use std::cell::Cell;

thread_local! {
    /// Times the order-total compute ran, for idempotence assertions.
    static TOTAL_COMPUTE_CALLS: Cell<u64> = const { Cell::new(0) };
}

/// Reset and return the order-total compute invocation counter.
pub fn take_total_compute_calls() -> u64 {
    TOTAL_COMPUTE_CALLS.with(|c| c.replace(0))
}

/// A non-superuser account with the sales group.
pub const SALES_USER: i64 = 2;
/// A non-superuser account with no groups at all.
pub const OUTSIDER_USER: i64 = 3;

pub fn registry() -> Registry {
    RegistryBuilder::new()
        .entity(currency())
        .entity(partner())
        .entity(users())
        .entity(tag())
        .entity(order())
        .entity(order_line())
        .acl("sale.order", "sales", Perms::all())
        .record_rule(
            "sale.order",
            &["sales"],
            Perms::read_only(),
            Domain::leaf("state", "!=", "done"),
        )
        .user_group(SALES_USER, "sales")
        .build()
        .expect("fixture schema must build")
}

pub fn database() -> Database {
    Database::new(registry(), DbConfig::default())
}

pub fn database_with(config: DbConfig) -> Database {
    Database::new(registry(), config)
}

fn currency() -> EntityDef {
    EntityDef::new("res.currency")
        .field(FieldDef::char("name").size(3).required().unique())
        .field(FieldDef::float("rate").default_value(1.0))
}

fn partner() -> EntityDef {
    EntityDef::new("res.partner")
        .order("name")
        .field(FieldDef::char("name").required().index().translate())
        .field(FieldDef::char("city"))
        .field(FieldDef::char("email"))
        .field(FieldDef::many2one("parent_id", "res.partner"))
}

fn users() -> EntityDef {
    EntityDef::new("res.users")
        .inherits("res.partner", "partner_id")
        .field(
            FieldDef::many2one("partner_id", "res.partner")
                .required()
                .ondelete(OnDelete::Restrict),
        )
        .field(FieldDef::char("login").required().unique())
}

fn tag() -> EntityDef {
    EntityDef::new("project.tag").field(FieldDef::char("name").required().unique())
}

fn order() -> EntityDef {
    EntityDef::new("sale.order")
        .order("date_order desc, id")
        .unique("name_uniq", &["name"])
        .field(FieldDef::char("name").required().tracked().default_value("New"))
        .field(FieldDef::char("reference"))
        .field(FieldDef::many2one("partner_id", "res.partner"))
        .field(FieldDef::char("partner_name").related("partner_id.name"))
        .field(FieldDef::many2one("currency_id", "res.currency"))
        .field(FieldDef::datetime("date_order").index())
        .field(
            FieldDef::selection(
                "state",
                [("draft", "Draft"), ("sent", "Sent"), ("done", "Done")],
            )
            .default_value("draft")
            .tracked()
            .expand_with(std::rc::Rc::new(|_| {
                vec![
                    ("draft".to_string(), "Draft".to_string()),
                    ("sent".to_string(), "Sent".to_string()),
                    ("done".to_string(), "Done".to_string()),
                ]
            })),
        )
        .field(FieldDef::html("note"))
        .field(FieldDef::integer("priority_level").default_value(0))
        .field(
            FieldDef::boolean("urgent")
                .compute("compute_urgent", &["priority_level"])
                .inverse("inverse_urgent"),
        )
        .field(
            FieldDef::monetary("amount_total", "currency_id")
                .compute("compute_amount_total", &["line_ids.price_subtotal"])
                .stored(),
        )
        .field(FieldDef::one2many("line_ids", "sale.order.line", "order_id"))
        .field(FieldDef::many2many("tag_ids", "project.tag", "sale_order_tag_rel"))
        .field(FieldDef::float("margin").groups(&["manager"]))
        .compute_fn("compute_amount_total", compute_amount_total)
        .compute_fn("compute_urgent", compute_urgent)
        .inverse_fn("inverse_urgent", inverse_urgent)
        .constrains(&["amount_total"], check_total_positive)
        .onchange(&["state"], onchange_state)
        .ondelete(forbid_deleting_done)
}

fn order_line() -> EntityDef {
    EntityDef::new("sale.order.line")
        .field(
            FieldDef::many2one("order_id", "sale.order")
                .required()
                .ondelete(OnDelete::Cascade)
                .index(),
        )
        .field(FieldDef::char("product"))
        .field(FieldDef::float("qty").default_value(1.0))
        .field(FieldDef::float("price_unit"))
        .field(
            FieldDef::float("price_subtotal")
                .compute("compute_price_subtotal", &["qty", "price_unit"])
                .stored(),
        )
        .compute_fn("compute_price_subtotal", compute_price_subtotal)
}

fn compute_price_subtotal(recs: &RecordSet) -> Result<(), Error> {
    for one in recs.iter() {
        let qty = one.get("qty")?.as_f64().unwrap_or(0.0);
        let price = one.get("price_unit")?.as_f64().unwrap_or(0.0);
        one.set("price_subtotal", qty * price)?;
    }
    Ok(())
}

fn compute_amount_total(recs: &RecordSet) -> Result<(), Error> {
    TOTAL_COMPUTE_CALLS.with(|c| c.set(c.get() + 1));
    for one in recs.iter() {
        let subtotals = one.mapped("line_ids.price_subtotal")?.values();
        let total: f64 = subtotals.iter().filter_map(Value::as_f64).sum();
        one.set("amount_total", total)?;
    }
    Ok(())
}

fn compute_urgent(recs: &RecordSet) -> Result<(), Error> {
    for one in recs.iter() {
        let level = one.get("priority_level")?.as_i64().unwrap_or(0);
        one.set("urgent", level >= 2)?;
    }
    Ok(())
}

fn inverse_urgent(recs: &RecordSet) -> Result<(), Error> {
    for one in recs.iter() {
        let urgent = one.get("urgent")?.as_bool().unwrap_or(false);
        one.set("priority_level", if urgent { 2i64 } else { 0i64 })?;
    }
    Ok(())
}

fn check_total_positive(recs: &RecordSet) -> Result<(), Error> {
    for one in recs.iter() {
        if one.get("amount_total")?.as_f64().unwrap_or(0.0) < 0.0 {
            return Err(Error::validation("order total must not be negative"));
        }
    }
    Ok(())
}

fn onchange_state(recs: &RecordSet) -> Result<(), Error> {
    for one in recs.iter() {
        let state = one.get("state")?;
        let reference = format!("REF-{}", state.as_str().unwrap_or("draft"));
        one.set("reference", reference)?;
    }
    Ok(())
}

fn forbid_deleting_done(recs: &RecordSet) -> Result<(), Error> {
    for one in recs.iter() {
        if one.get("state")?.as_str() == Some("done") {
            return Err(Error::user("done orders cannot be deleted"));
        }
    }
    Ok(())
}

/// Create an order with one line per unit price.
pub fn seed_order(
    handle: &RecordSet,
    name: &str,
    prices: &[f64],
) -> Result<RecordSet, Error> {
    let mut vals = Vals::new();
    vals.insert("name".to_string(), Value::from(name));
    let lines: Vec<loamdb_core::value::RelCommand> = prices
        .iter()
        .map(|&price| {
            let mut line = Vals::new();
            line.insert("price_unit".to_string(), Value::Float(price));
            loamdb_core::value::RelCommand::Create(line)
        })
        .collect();
    vals.insert("line_ids".to_string(), Value::Commands(lines));
    handle.create(vec![vals])
}
