use crate::value::{FieldKind, RelCommand, Value};
use chrono::NaiveDate;
use std::cmp::Ordering;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).expect("valid test date")
}

#[test]
fn null_sorts_first() {
    assert_eq!(Value::Null.compare(&Value::Int(0)), Some(Ordering::Less));
    assert_eq!(
        Value::Str("a".into()).compare(&Value::Null),
        Some(Ordering::Greater)
    );
    assert_eq!(Value::Null.compare(&Value::Null), Some(Ordering::Equal));
}

#[test]
fn numeric_comparison_crosses_int_and_float() {
    assert!(Value::Int(3).same(&Value::Float(3.0)));
    assert_eq!(
        Value::Float(2.5).compare(&Value::Int(3)),
        Some(Ordering::Less)
    );
}

#[test]
fn incomparable_shapes_return_none() {
    assert_eq!(Value::Str("a".into()).compare(&Value::Int(1)), None);
    assert_eq!(Value::Date(d(2024, 1, 1)).compare(&Value::Bool(true)), None);
}

#[test]
fn char_normalization_enforces_size() {
    let kind = FieldKind::Char { size: Some(3) };
    assert_eq!(
        kind.normalize(Value::from("abc")).expect("fits"),
        Value::from("abc")
    );
    let err = kind.normalize(Value::from("abcd")).expect_err("too long");
    assert!(err.contains("maximum length 3"), "got: {err}");
}

#[test]
fn float_normalization_applies_digits() {
    let kind = FieldKind::Float { digits: Some(2) };
    assert_eq!(
        kind.normalize(Value::Float(1.005 + 0.001)).expect("rounds"),
        Value::Float(1.01)
    );
    assert_eq!(
        kind.normalize(Value::Int(4)).expect("coerces int"),
        Value::Float(4.0)
    );
}

#[test]
fn date_normalization_parses_canonical_strings() {
    let kind = FieldKind::Date;
    assert_eq!(
        kind.normalize(Value::from("2024-02-29")).expect("leap day"),
        Value::Date(d(2024, 2, 29))
    );
    assert!(kind.normalize(Value::from("2023-02-29")).is_err());
}

#[test]
fn many2one_accepts_plain_ints() {
    let kind = FieldKind::Many2one {
        comodel: "res.partner".into(),
    };
    assert_eq!(
        kind.normalize(Value::Int(7)).expect("id"),
        Value::Id(7),
        "plain ints coerce to the id cache form"
    );
    assert!(kind.normalize(Value::from("x")).is_err());
}

#[test]
fn x2many_id_lists_deduplicate_preserving_order() {
    let kind = FieldKind::Many2many {
        comodel: "project.tag".into(),
        relation: "order_tag_rel".into(),
    };
    assert_eq!(
        kind.normalize(Value::IdList(vec![3, 1, 3, 2, 1]))
            .expect("list"),
        Value::IdList(vec![3, 1, 2])
    );
}

#[test]
fn null_is_preserved_by_every_kind() {
    for kind in [
        FieldKind::Boolean,
        FieldKind::Integer,
        FieldKind::Text,
        FieldKind::Datetime,
        FieldKind::Many2one {
            comodel: "res.partner".into(),
        },
    ] {
        assert_eq!(kind.normalize(Value::Null).expect("null passes"), Value::Null);
    }
}

#[test]
fn command_coercion_treats_id_lists_as_set() {
    assert_eq!(
        RelCommand::coerce(&Value::IdList(vec![1, 2])),
        Some(vec![RelCommand::Set(vec![1, 2])])
    );
    assert_eq!(
        RelCommand::coerce(&Value::Null),
        Some(vec![RelCommand::Clear])
    );
    assert_eq!(RelCommand::coerce(&Value::from("nope")), None);
}

#[test]
fn falsy_covers_empty_shapes() {
    assert!(Value::Null.is_falsy());
    assert!(Value::Bool(false).is_falsy());
    assert!(Value::Str(String::new()).is_falsy());
    assert!(Value::IdList(vec![]).is_falsy());
    assert!(!Value::Int(5).is_falsy());
}
