//! In-memory evaluation of the typed domain AST, shared by `search` and
//! `filtered_domain`. Dotted paths traverse relations through the field
//! engine, so translated projections and computed fields behave exactly as
//! they do on direct reads.

use crate::{
    db::{
        env::Env,
        query::domain::{DomainExpr, DomainLeaf, DomainOp},
        recordset::{RecordId, RecordSet},
    },
    error::Error,
    registry::Model,
    value::{FieldKind, Value},
};
use std::rc::Rc;

pub fn eval(env: &Env, model: &Rc<Model>, id: RecordId, expr: &DomainExpr) -> Result<bool, Error> {
    match expr {
        DomainExpr::True => Ok(true),
        DomainExpr::And(terms) => {
            for term in terms {
                if !eval(env, model, id, term)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        DomainExpr::Or(terms) => {
            for term in terms {
                if eval(env, model, id, term)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        DomainExpr::Not(term) => Ok(!eval(env, model, id, term)?),
        DomainExpr::Leaf(leaf) => eval_leaf(env, model, id, leaf),
    }
}

fn eval_leaf(env: &Env, model: &Rc<Model>, id: RecordId, leaf: &DomainLeaf) -> Result<bool, Error> {
    let mut rs = RecordSet::from_parts(env.clone(), model.clone(), vec![id]);

    // Walk all but the last segment; x2many hops give "any" semantics by
    // concatenation.
    let (last, hops) = leaf
        .path
        .split_last()
        .ok_or_else(|| Error::validation("empty field path in domain leaf"))?;
    for hop in hops {
        rs = rs.rel(hop)?;
        if rs.is_empty() {
            // Broken path: compare null once.
            return Ok(match_op(&Value::Null, leaf.op, &leaf.value, false));
        }
    }

    if last == "id" {
        let values: Vec<Value> = rs.record_ids().iter().filter_map(RecordId::real).map(Value::Id).collect();
        return Ok(values
            .iter()
            .any(|v| match_op(v, leaf.op, &leaf.value, false)));
    }

    let fdef = rs.model().field(last)?.clone();
    let x2many = fdef.kind.is_x2many();
    for one in rs.iter() {
        let value = one.get(last)?;
        if x2many {
            // Membership semantics on collections.
            let ids = value.id_list();
            let matched = match leaf.op {
                DomainOp::Eq | DomainOp::In => leaf
                    .value
                    .id_list()
                    .iter()
                    .any(|needle| ids.contains(needle)),
                DomainOp::Ne | DomainOp::NotIn => !leaf
                    .value
                    .id_list()
                    .iter()
                    .any(|needle| ids.contains(needle)),
                _ => false,
            };
            if matched {
                return Ok(true);
            }
        } else if match_op(&value, leaf.op, &leaf.value, matches!(fdef.kind, FieldKind::Many2one { .. })) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// One scalar comparison. `=` against a falsy right-hand side matches
/// records with no value, like SQL `IS NULL` lowering.
#[must_use]
pub fn match_op(value: &Value, op: DomainOp, rhs: &Value, is_m2o: bool) -> bool {
    match op {
        DomainOp::Eq => eq_match(value, rhs, is_m2o),
        DomainOp::Ne => !eq_match(value, rhs, is_m2o),
        DomainOp::Gt => value.compare(rhs) == Some(std::cmp::Ordering::Greater),
        DomainOp::Ge => matches!(
            value.compare(rhs),
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        ),
        DomainOp::Lt => value.compare(rhs) == Some(std::cmp::Ordering::Less),
        DomainOp::Le => matches!(
            value.compare(rhs),
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        ),
        DomainOp::In => rhs_elements(rhs).iter().any(|e| eq_match(value, e, is_m2o)),
        DomainOp::NotIn => !rhs_elements(rhs).iter().any(|e| eq_match(value, e, is_m2o)),
        DomainOp::Like => like_match(value, rhs, false, true),
        DomainOp::Ilike => like_match(value, rhs, true, true),
        DomainOp::EqLike => like_match(value, rhs, false, false),
        DomainOp::EqIlike => like_match(value, rhs, true, false),
        // Rewritten to `In` before evaluation.
        DomainOp::ChildOf | DomainOp::ParentOf => false,
    }
}

fn eq_match(value: &Value, rhs: &Value, is_m2o: bool) -> bool {
    if rhs.is_falsy() && value.is_falsy() {
        return true;
    }
    if is_m2o {
        return match (value.as_id(), rhs.as_id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
    }
    value.same(rhs)
}

fn rhs_elements(rhs: &Value) -> Vec<Value> {
    match rhs {
        Value::List(items) => items.clone(),
        Value::IdList(ids) => ids.iter().map(|&id| Value::Id(id)).collect(),
        other => vec![other.clone()],
    }
}

fn like_match(value: &Value, rhs: &Value, ci: bool, wrap: bool) -> bool {
    let (Some(text), Some(pattern)) = (value.as_str(), rhs.as_str()) else {
        return false;
    };
    let pattern = if wrap {
        format!("%{pattern}%")
    } else {
        pattern.to_string()
    };
    let (text, pattern) = if ci {
        (text.to_lowercase(), pattern.to_lowercase())
    } else {
        (text.to_string(), pattern)
    };
    sql_like(&text, &pattern)
}

/// SQL LIKE with `%` and `_` wildcards.
fn sql_like(text: &str, pattern: &str) -> bool {
    fn inner(t: &[char], p: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('%') => {
                (0..=t.len()).any(|skip| inner(&t[skip..], &p[1..]))
            }
            Some('_') => !t.is_empty() && inner(&t[1..], &p[1..]),
            Some(c) => t.first() == Some(c) && inner(&t[1..], &p[1..]),
        }
    }
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    inner(&t, &p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_cover_wildcards() {
        assert!(sql_like("confirmed", "conf%"));
        assert!(sql_like("confirmed", "%firm%"));
        assert!(sql_like("abc", "a_c"));
        assert!(!sql_like("abc", "a_d"));
        assert!(sql_like("", "%"));
    }

    #[test]
    fn eq_matches_null_against_false() {
        assert!(match_op(&Value::Null, DomainOp::Eq, &Value::Bool(false), false));
        assert!(!match_op(
            &Value::Str("x".into()),
            DomainOp::Eq,
            &Value::Bool(false),
            false
        ));
    }

    #[test]
    fn in_accepts_id_and_int_mixtures() {
        let rhs = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert!(match_op(&Value::Id(2), DomainOp::In, &rhs, true));
        assert!(!match_op(&Value::Id(3), DomainOp::In, &rhs, true));
    }
}
