//! read_group: aggregates, date granularities, selection expansion, and
//! re-queryable group domains.

use loamdb_core::{domain, value::Value, vals};
use loamdb_fixtures::database;

#[test]
fn selection_expansion_orders_buckets_and_zeroes_gaps() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    orders
        .create(vec![
            vals! { "name" => "SO001", "state" => "draft", "priority_level" => 1 },
            vals! { "name" => "SO002", "state" => "done", "priority_level" => 2 },
            vals! { "name" => "SO003", "state" => Value::Null, "priority_level" => 3 },
        ])
        .expect("seed");

    let groups = orders
        .read_group(&domain![], &["priority_level:sum"], &["state"], None, 0)
        .expect("read_group");

    let keys: Vec<Value> = groups.iter().map(|g| g.key("state")).collect();
    assert_eq!(
        keys,
        vec![
            Value::from("draft"),
            Value::from("sent"),
            Value::from("done"),
            Value::Bool(false),
        ],
        "declared order, missing buckets zeroed, False last"
    );
    let sums: Vec<Value> = groups
        .iter()
        .map(|g| g.aggregate("priority_level:sum"))
        .collect();
    assert_eq!(
        sums,
        vec![Value::Int(1), Value::Int(0), Value::Int(2), Value::Int(3)]
    );
    let counts: Vec<usize> = groups.iter().map(|g| g.count).collect();
    assert_eq!(counts, vec![1, 0, 1, 1]);
}

#[test]
fn month_granularity_buckets_in_utc() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    orders
        .create(vec![
            vals! { "name" => "SO001", "date_order" => "2024-01-15 10:00:00" },
            vals! { "name" => "SO002", "date_order" => "2024-01-30 23:00:00" },
            vals! { "name" => "SO003", "date_order" => "2024-02-02 01:00:00" },
        ])
        .expect("seed");

    let groups = orders
        .read_group(&domain![], &[], &["date_order:month"], None, 0)
        .expect("read_group");

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].key("date_order:month"), Value::from("2024-01"));
    assert_eq!(groups[0].count, 2);
    assert_eq!(groups[1].key("date_order:month"), Value::from("2024-02"));
    assert_eq!(groups[1].count, 1);
}

#[test]
fn timezone_offset_shifts_bucket_boundaries() {
    let env = database()
        .env()
        .with_context("tz_offset_minutes", serde_json::json!(120));
    let orders = env.model("sale.order").expect("model handle");
    orders
        .create(vec![
            // 23:00 UTC on Jan 31st is already February at UTC+2.
            vals! { "name" => "SO001", "date_order" => "2024-01-31 23:00:00" },
        ])
        .expect("seed");

    let groups = orders
        .read_group(&domain![], &[], &["date_order:month"], None, 0)
        .expect("read_group");
    assert_eq!(groups[0].key("date_order:month"), Value::from("2024-02"));
}

#[test]
fn group_domains_requery_their_bucket() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    orders
        .create(vec![
            vals! { "name" => "SO001", "state" => "draft", "date_order" => "2024-01-15 10:00:00" },
            vals! { "name" => "SO002", "state" => "draft", "date_order" => "2024-02-20 10:00:00" },
            vals! { "name" => "SO003", "state" => "sent", "date_order" => "2024-01-25 10:00:00" },
        ])
        .expect("seed");

    let base = domain![("state", "=", "draft")];
    let groups = orders
        .read_group(&base, &[], &["date_order:month"], None, 0)
        .expect("read_group");

    let total: usize = groups.iter().map(|g| g.count).sum();
    assert_eq!(
        total,
        orders.search_count(&base).expect("count"),
        "bucket counts sum to the search count"
    );
    for group in &groups {
        assert_eq!(
            orders.search_count(&group.domain).expect("requery"),
            group.count,
            "__domain re-selects exactly the bucket"
        );
    }
}

#[test]
fn false_bucket_domain_requeries_empty_values() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    orders
        .create(vec![
            vals! { "name" => "SO001", "state" => "draft" },
            vals! { "name" => "SO002", "state" => Value::Null },
        ])
        .expect("seed");

    let groups = orders
        .read_group(&domain![], &[], &["state"], None, 0)
        .expect("read_group");
    let false_bucket = groups
        .iter()
        .find(|g| g.key("state") == Value::Bool(false))
        .expect("False bucket present");
    assert_eq!(false_bucket.count, 1);
    assert_eq!(
        orders
            .search_count(&false_bucket.domain)
            .expect("requery"),
        1
    );
}

#[test]
fn many2one_buckets_group_by_target_id() {
    let env = database().env();
    let partners = env.model("res.partner").expect("model handle");
    let azure = partners.create(vec![vals! { "name" => "Azure" }]).expect("p1");
    let deco = partners.create(vec![vals! { "name" => "Deco" }]).expect("p2");
    let orders = env.model("sale.order").expect("model handle");
    orders
        .create(vec![
            vals! { "name" => "SO001", "partner_id" => azure.id().expect("id") },
            vals! { "name" => "SO002", "partner_id" => azure.id().expect("id") },
            vals! { "name" => "SO003", "partner_id" => deco.id().expect("id") },
        ])
        .expect("seed");

    let groups = orders
        .read_group(&domain![], &[], &["partner_id"], None, 0)
        .expect("read_group");
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].key("partner_id"), Value::Id(azure.id().expect("id")));
    assert_eq!(groups[0].count, 2);
    assert_eq!(groups[1].count, 1);
}

#[test]
fn aggregate_validation_rejects_bad_specs() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");

    let err = orders
        .read_group(&domain![], &["name"], &["state"], None, 0)
        .expect_err("missing :op");
    assert!(err.to_string().contains("expected field:op"), "{err}");

    let err = orders
        .read_group(&domain![], &["name:sum"], &["state"], None, 0)
        .expect_err("sum of a char");
    assert!(err.to_string().contains("not compatible"), "{err}");

    let err = orders
        .read_group(&domain![], &[], &["name:month"], None, 0)
        .expect_err("granularity on a char");
    assert!(err.to_string().contains("granularity"), "{err}");

    let err = orders
        .read_group(&domain![], &[], &["line_ids"], None, 0)
        .expect_err("grouping by a collection");
    assert!(err.to_string().contains("collection"), "{err}");
}

#[test]
fn numeric_and_boolean_aggregates() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    orders
        .create(vec![
            vals! { "name" => "SO001", "state" => "draft", "priority_level" => 1 },
            vals! { "name" => "SO002", "state" => "draft", "priority_level" => 3 },
        ])
        .expect("seed");

    let groups = orders
        .read_group(
            &domain![],
            &[
                "priority_level:sum",
                "priority_level:avg",
                "priority_level:min",
                "priority_level:max",
                "priority_level:count_distinct",
                "name:array_agg",
            ],
            &["state"],
            None,
            0,
        )
        .expect("read_group");

    let draft = groups
        .iter()
        .find(|g| g.key("state") == Value::from("draft"))
        .expect("draft bucket");
    assert_eq!(draft.aggregate("priority_level:sum"), Value::Int(4));
    assert_eq!(draft.aggregate("priority_level:avg"), Value::Float(2.0));
    assert_eq!(draft.aggregate("priority_level:min"), Value::Int(1));
    assert_eq!(draft.aggregate("priority_level:max"), Value::Int(3));
    assert_eq!(draft.aggregate("priority_level:count_distinct"), Value::Int(2));
    assert_eq!(
        draft.aggregate("name:array_agg"),
        Value::List(vec![Value::from("SO001"), Value::from("SO002")])
    );
}

#[test]
fn group_limit_and_offset_page_buckets() {
    let env = database().env();
    let orders = env.model("sale.order").expect("model handle");
    orders
        .create(vec![
            vals! { "name" => "SO001", "state" => "draft" },
            vals! { "name" => "SO002", "state" => "sent" },
            vals! { "name" => "SO003", "state" => "done" },
        ])
        .expect("seed");

    let groups = orders
        .read_group(&domain![], &[], &["state"], Some(1), 1)
        .expect("read_group");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].key("state"), Value::from("sent"));
}
