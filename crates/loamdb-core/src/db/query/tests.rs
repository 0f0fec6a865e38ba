use crate::db::query::{
    Domain, DomainExpr, DomainItem, DomainOp, parse_order,
};
use crate::value::Value;

#[test]
fn empty_domain_parses_to_true() {
    assert_eq!(Domain::new().parse().expect("empty domain"), DomainExpr::True);
}

#[test]
fn implicit_and_conjoins_trailing_terms() {
    let d = Domain::from_items(vec![
        DomainItem::leaf("state", "=", "draft"),
        DomainItem::leaf("total", ">", 10.0),
    ]);
    match d.parse().expect("list form") {
        DomainExpr::And(terms) => assert_eq!(terms.len(), 2),
        other => panic!("expected implicit conjunction, got {other:?}"),
    }
}

#[test]
fn prefix_operators_consume_two_operands() {
    let d = Domain::from_items(vec![
        DomainItem::Or,
        DomainItem::leaf("a", "=", 1),
        DomainItem::Not,
        DomainItem::leaf("b", "=", 2),
    ]);
    match d.parse().expect("polish notation") {
        DomainExpr::Or(terms) => {
            assert_eq!(terms.len(), 2);
            assert!(matches!(terms[1], DomainExpr::Not(_)));
        }
        other => panic!("expected Or, got {other:?}"),
    }
}

#[test]
fn dangling_prefix_is_rejected() {
    let err = Domain::from_items(vec![DomainItem::And, DomainItem::leaf("a", "=", 1)])
        .parse()
        .expect_err("missing operand");
    assert!(err.to_string().contains("missing an operand"), "{err}");
}

#[test]
fn unknown_operator_is_rejected() {
    let err = Domain::leaf("a", "~=", 1).parse().expect_err("bad operator");
    assert!(err.to_string().contains("unknown domain operator"), "{err}");
}

#[test]
fn dotted_paths_split_into_segments() {
    match Domain::leaf("partner_id.country_id.code", "=", "FR")
        .parse()
        .expect("dotted leaf")
    {
        DomainExpr::Leaf(leaf) => {
            assert_eq!(leaf.path, ["partner_id", "country_id", "code"]);
            assert_eq!(leaf.op, DomainOp::Eq);
            assert_eq!(leaf.value, Value::from("FR"));
        }
        other => panic!("expected leaf, got {other:?}"),
    }
}

#[test]
fn and_concatenates_list_forms() {
    let combined = Domain::leaf("a", "=", 1).and(Domain::leaf("b", "=", 2));
    assert_eq!(combined.items().len(), 3);
    assert_eq!(combined.items()[0], DomainItem::And);
    // Identity on either side.
    assert_eq!(Domain::new().and(Domain::leaf("a", "=", 1)).items().len(), 1);
}

#[test]
fn order_spec_parses_directions() {
    let terms = parse_order("date_order desc, id").expect("order spec");
    assert_eq!(terms.len(), 2);
    assert!(terms[0].desc && terms[0].field == "date_order");
    assert!(!terms[1].desc && terms[1].field == "id");
}

#[test]
fn order_spec_rejects_junk() {
    assert!(parse_order("name sideways").is_err());
    assert!(parse_order("name; drop table").is_err());
    assert!(parse_order("name asc extra").is_err());
}
