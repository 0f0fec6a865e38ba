use crate::{
    config::Granularity,
    db::{
        query::{Domain, OrderTerm},
        sql::{ddl, group_sql, health, select_sql},
    },
    registry::{Registry, RegistryBuilder},
    schema::{EntityDef, FieldDef},
};
use std::collections::BTreeMap;

fn registry() -> Registry {
    RegistryBuilder::new()
        .entity(
            EntityDef::new("res.partner")
                .field(FieldDef::char("name").required().index())
                .field(FieldDef::char("city")),
        )
        .entity(
            EntityDef::new("sale.order")
                .field(FieldDef::char("name").required())
                .field(FieldDef::many2one("partner_id", "res.partner"))
                .field(FieldDef::datetime("date_order"))
                .field(FieldDef::float("amount"))
                .field(FieldDef::one2many("line_ids", "sale.order.line", "order_id"))
                .field(FieldDef::many2many("tag_ids", "project.tag", "order_tag_rel")),
        )
        .entity(
            EntityDef::new("sale.order.line")
                .field(FieldDef::many2one("order_id", "sale.order").required())
                .field(FieldDef::float("price_subtotal")),
        )
        .entity(EntityDef::new("project.tag").field(FieldDef::char("name").required()))
        .build()
        .expect("registry builds")
}

#[test]
fn plain_leaf_renders_with_parameters() {
    let registry = registry();
    let model = registry.get("sale.order").expect("model");
    let expr = Domain::leaf("name", "=", "S0042").parse().expect("domain");
    let sql = select_sql(&registry, &model, &expr, &[], None, 0, false).expect("render");
    assert_eq!(
        sql.text,
        r#"SELECT t0."id" FROM "sale_order" t0 WHERE t0."name" = $1"#
    );
    assert_eq!(sql.params, vec!["S0042".to_string()]);
}

#[test]
fn falsy_equality_lowers_to_is_null() {
    let registry = registry();
    let model = registry.get("sale.order").expect("model");
    let expr = Domain::leaf("partner_id", "=", false).parse().expect("domain");
    let sql = select_sql(&registry, &model, &expr, &[], None, 0, false).expect("render");
    assert!(sql.text.ends_with(r#"WHERE t0."partner_id" IS NULL"#), "{}", sql.text);
    assert!(sql.params.is_empty());
}

#[test]
fn dotted_path_becomes_exists_subquery() {
    let registry = registry();
    let model = registry.get("sale.order").expect("model");
    let expr = Domain::leaf("partner_id.name", "ilike", "smith")
        .parse()
        .expect("domain");
    let sql = select_sql(&registry, &model, &expr, &[], None, 0, false).expect("render");
    assert_eq!(
        sql.text,
        r#"SELECT t0."id" FROM "sale_order" t0 WHERE EXISTS (SELECT 1 FROM "res_partner" t1 WHERE t1."id" = t0."partner_id" AND t1."name" ILIKE $1)"#
    );
    assert_eq!(sql.params, vec!["%smith%".to_string()]);
}

#[test]
fn one2many_leaf_checks_membership_via_inverse() {
    let registry = registry();
    let model = registry.get("sale.order").expect("model");
    let expr = Domain::leaf("line_ids", "in", vec![7i64]).parse().expect("domain");
    let sql = select_sql(&registry, &model, &expr, &[], None, 0, false).expect("render");
    assert!(
        sql.text.contains(r#"EXISTS (SELECT 1 FROM "sale_order_line" t1 WHERE t1."order_id" = t0."id""#),
        "{}",
        sql.text
    );
}

#[test]
fn order_limit_offset_and_lock_render_in_order() {
    let registry = registry();
    let model = registry.get("sale.order").expect("model");
    let order = [
        OrderTerm {
            field: "date_order".to_string(),
            desc: true,
        },
        OrderTerm {
            field: "id".to_string(),
            desc: false,
        },
    ];
    let sql = select_sql(
        &registry,
        &model,
        &crate::db::query::DomainExpr::True,
        &order,
        Some(10),
        20,
        true,
    )
    .expect("render");
    assert_eq!(
        sql.text,
        r#"SELECT t0."id" FROM "sale_order" t0 ORDER BY t0."date_order" DESC, t0."id" LIMIT 10 OFFSET 20 FOR UPDATE NOWAIT"#
    );
}

#[test]
fn group_sql_truncates_dates_and_counts() {
    let registry = registry();
    let model = registry.get("sale.order").expect("model");
    let sql = group_sql(
        &registry,
        &model,
        &crate::db::query::DomainExpr::True,
        &["amount:sum"],
        &[("date_order", Some(Granularity::Month))],
        None,
        0,
    )
    .expect("render");
    assert_eq!(
        sql.text,
        r#"SELECT date_trunc('month', t0."date_order"), sum(t0."amount"), count(*) AS __count FROM "sale_order" t0 GROUP BY 1 ORDER BY 1"#
    );
}

#[test]
fn ddl_covers_tables_links_and_functional_indexes() {
    let registry = registry();
    let statements = ddl::schema_sql(&registry);
    let all = statements.join("\n");
    assert!(all.contains(r#"CREATE TABLE IF NOT EXISTS "sale_order""#));
    assert!(
        all.contains(r#""partner_id" bigint REFERENCES "res_partner" ("id") ON DELETE SET NULL"#),
        "{all}"
    );
    assert!(
        all.contains(r#"CREATE TABLE IF NOT EXISTS "order_tag_rel""#),
        "link tables are created for many2many fields"
    );
    assert!(
        all.contains(r#"ON "res_partner" (lower("name"))"#),
        "indexed char columns get functional lower() indexes: {all}"
    );
}

#[test]
fn health_reports_duplicate_and_unused_indexes() {
    let registry = RegistryBuilder::new()
        .entity(
            EntityDef::new("dup.model")
                .field(FieldDef::many2one("other_id", "dup.model").index())
                .field(FieldDef::char("plain").index()),
        )
        .build()
        .expect("registry builds");

    // other_id is indexed both as a declared index and as an FK column.
    let duplicates = health::duplicate_indexes(&registry);
    assert!(
        duplicates
            .iter()
            .any(|(a, b)| a.columns == ["other_id"] && b.columns == ["other_id"]),
        "declared + fk index on the same column is a duplicate"
    );

    let mut usage: BTreeMap<(String, String), u64> = BTreeMap::new();
    usage.insert(("dup.model".to_string(), "plain".to_string()), 3);
    let unused = health::unused_indexes(&registry, &usage);
    assert!(
        unused.iter().any(|i| i.columns == ["other_id"]),
        "never-searched indexes are reported"
    );
    assert!(
        !unused.iter().any(|i| i.columns == ["plain"] && !i.unique),
        "used indexes are not reported"
    );
}
