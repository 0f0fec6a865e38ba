use crate::{
    config::Granularity,
    db::query::{DomainExpr, DomainLeaf, DomainOp, OrderTerm},
    error::Error,
    registry::{Model, Registry},
    value::{FieldKind, Value},
};
use std::fmt::Write as _;
use std::rc::Rc;

///
/// SqlStatement
///
/// Parameterized statement: `$1`-style placeholders with the bound values
/// in order.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SqlStatement {
    pub text: String,
    pub params: Vec<String>,
}

struct SqlBuilder<'a> {
    registry: &'a Registry,
    params: Vec<String>,
    alias_seq: usize,
}

impl SqlBuilder<'_> {
    fn bind(&mut self, model: &Model, field_name: &str, value: &Value) -> String {
        let param = model
            .field(field_name)
            .map(|f| f.kind.to_param(value))
            .unwrap_or_else(|_| value.clone());
        self.params.push(param.display());
        format!("${}", self.params.len())
    }

    fn next_alias(&mut self) -> String {
        self.alias_seq += 1;
        format!("t{}", self.alias_seq)
    }
}

/// Lower a search to `SELECT id FROM ...` with EXISTS joins for dotted
/// paths and an optional `FOR UPDATE NOWAIT` clause.
pub fn select_sql(
    registry: &Registry,
    model: &Rc<Model>,
    expr: &DomainExpr,
    order: &[OrderTerm],
    limit: Option<usize>,
    offset: usize,
    lock_nowait: bool,
) -> Result<SqlStatement, Error> {
    let mut builder = SqlBuilder {
        registry,
        params: Vec::new(),
        alias_seq: 0,
    };
    let alias = "t0";
    let predicate = lower_expr(&mut builder, model, alias, expr)?;

    let mut text = format!(r#"SELECT {alias}."id" FROM "{}" {alias}"#, model.table);
    if predicate != "TRUE" {
        write!(text, " WHERE {predicate}").ok();
    }
    if !order.is_empty() {
        let terms: Vec<String> = order
            .iter()
            .map(|t| {
                format!(
                    r#"{alias}."{}"{}"#,
                    t.field,
                    if t.desc { " DESC" } else { "" }
                )
            })
            .collect();
        write!(text, " ORDER BY {}", terms.join(", ")).ok();
    }
    if let Some(limit) = limit {
        write!(text, " LIMIT {limit}").ok();
    }
    if offset > 0 {
        write!(text, " OFFSET {offset}").ok();
    }
    if lock_nowait {
        text.push_str(" FOR UPDATE NOWAIT");
    }

    Ok(SqlStatement {
        text,
        params: builder.params,
    })
}

/// Lower a read_group to `SELECT <buckets>, <aggregates> ... GROUP BY`.
/// Date buckets truncate with `date_trunc` in SQL exactly as the engine
/// buckets in memory.
pub fn group_sql(
    registry: &Registry,
    model: &Rc<Model>,
    expr: &DomainExpr,
    aggregates: &[&str],
    groupby: &[(&str, Option<Granularity>)],
    limit: Option<usize>,
    offset: usize,
) -> Result<SqlStatement, Error> {
    let mut builder = SqlBuilder {
        registry,
        params: Vec::new(),
        alias_seq: 0,
    };
    let alias = "t0";

    let mut select_parts = Vec::new();
    for (field, granularity) in groupby {
        model.field(field)?;
        let part = match granularity {
            Some(g) => format!(r#"date_trunc('{g}', {alias}."{field}")"#),
            None => format!(r#"{alias}."{field}""#),
        };
        select_parts.push(part);
    }
    let group_positions: Vec<String> = (1..=select_parts.len()).map(|i| i.to_string()).collect();

    for spec in aggregates {
        let (field, op) = spec.split_once(':').ok_or_else(|| {
            Error::validation(format!("invalid aggregate spec '{spec}', expected field:op"))
        })?;
        model.field(field)?;
        let rendered = match op {
            "count" => format!(r#"count({alias}."{field}")"#),
            "count_distinct" => format!(r#"count(DISTINCT {alias}."{field}")"#),
            "array_agg" => format!(r#"array_agg({alias}."{field}")"#),
            "sum" | "avg" | "min" | "max" | "bool_and" | "bool_or" => {
                format!(r#"{op}({alias}."{field}")"#)
            }
            other => {
                return Err(Error::validation(format!("unknown aggregate '{other}'")));
            }
        };
        select_parts.push(rendered);
    }
    select_parts.push("count(*) AS __count".to_string());

    let predicate = lower_expr(&mut builder, model, alias, expr)?;
    let mut text = format!(
        r#"SELECT {} FROM "{}" {alias}"#,
        select_parts.join(", "),
        model.table
    );
    if predicate != "TRUE" {
        write!(text, " WHERE {predicate}").ok();
    }
    if !group_positions.is_empty() {
        write!(
            text,
            " GROUP BY {} ORDER BY {}",
            group_positions.join(", "),
            group_positions.join(", ")
        )
        .ok();
    }
    if let Some(limit) = limit {
        write!(text, " LIMIT {limit}").ok();
    }
    if offset > 0 {
        write!(text, " OFFSET {offset}").ok();
    }

    Ok(SqlStatement {
        text,
        params: builder.params,
    })
}

fn lower_expr(
    builder: &mut SqlBuilder<'_>,
    model: &Rc<Model>,
    alias: &str,
    expr: &DomainExpr,
) -> Result<String, Error> {
    Ok(match expr {
        DomainExpr::True => "TRUE".to_string(),
        DomainExpr::And(terms) => {
            let parts: Result<Vec<String>, Error> = terms
                .iter()
                .map(|t| lower_expr(builder, model, alias, t))
                .collect();
            format!("({})", parts?.join(" AND "))
        }
        DomainExpr::Or(terms) => {
            let parts: Result<Vec<String>, Error> = terms
                .iter()
                .map(|t| lower_expr(builder, model, alias, t))
                .collect();
            format!("({})", parts?.join(" OR "))
        }
        DomainExpr::Not(term) => format!("(NOT {})", lower_expr(builder, model, alias, term)?),
        DomainExpr::Leaf(leaf) => lower_leaf(builder, model, alias, leaf, &leaf.path)?,
    })
}

/// Dotted paths unroll into EXISTS subqueries, one hop at a time.
fn lower_leaf(
    builder: &mut SqlBuilder<'_>,
    model: &Rc<Model>,
    alias: &str,
    leaf: &DomainLeaf,
    path: &[String],
) -> Result<String, Error> {
    let (head, rest) = path
        .split_first()
        .ok_or_else(|| Error::validation("empty field path in domain leaf"))?;

    if rest.is_empty() {
        if head == "id" {
            return Ok(lower_compare(builder, model, alias, "id", leaf));
        }
        let field = model.field(head)?.clone();
        return match &field.kind {
            FieldKind::One2many { comodel, inverse } => {
                let co = builder.registry.get(comodel)?;
                let sub = builder.next_alias();
                let member = lower_compare(builder, &co, &sub, "id", leaf);
                Ok(format!(
                    r#"EXISTS (SELECT 1 FROM "{}" {sub} WHERE {sub}."{inverse}" = {alias}."id" AND {member})"#,
                    co.table
                ))
            }
            FieldKind::Many2many { comodel, relation } => {
                let co = builder.registry.get(comodel)?;
                let sub = builder.next_alias();
                let member = lower_compare(builder, &co, &sub, &format!("{}_id", co.table), leaf);
                Ok(format!(
                    r#"EXISTS (SELECT 1 FROM "{relation}" {sub} WHERE {sub}."{}_id" = {alias}."id" AND {member})"#,
                    model.table
                ))
            }
            _ => Ok(lower_compare(builder, model, alias, head, leaf)),
        };
    }

    // Single-valued hop: EXISTS against the comodel with the remaining
    // path.
    let field = model.field(head)?.clone();
    let comodel = field.kind.comodel().ok_or_else(|| {
        Error::validation(format!(
            "domain path '{}' traverses scalar field '{head}'",
            leaf.path.join(".")
        ))
    })?;
    let co = builder.registry.get(comodel)?;
    let sub = builder.next_alias();
    let inner = lower_leaf(builder, &co, &sub, leaf, rest)?;
    Ok(match &field.kind {
        FieldKind::Many2one { .. } => format!(
            r#"EXISTS (SELECT 1 FROM "{}" {sub} WHERE {sub}."id" = {alias}."{head}" AND {inner})"#,
            co.table
        ),
        FieldKind::One2many { inverse, .. } => format!(
            r#"EXISTS (SELECT 1 FROM "{}" {sub} WHERE {sub}."{inverse}" = {alias}."id" AND {inner})"#,
            co.table
        ),
        FieldKind::Many2many { relation, .. } => {
            let link = builder.next_alias();
            format!(
                r#"EXISTS (SELECT 1 FROM "{relation}" {link} JOIN "{}" {sub} ON {sub}."id" = {link}."{}_id" WHERE {link}."{}_id" = {alias}."id" AND {inner})"#,
                co.table, co.table, model.table
            )
        }
        _ => unreachable!("comodel() returned for a non-relational kind"),
    })
}

fn lower_compare(
    builder: &mut SqlBuilder<'_>,
    model: &Rc<Model>,
    alias: &str,
    column: &str,
    leaf: &DomainLeaf,
) -> String {
    let lhs = format!(r#"{alias}."{column}""#);
    match leaf.op {
        DomainOp::Eq if leaf.value.is_falsy() => format!("{lhs} IS NULL"),
        DomainOp::Ne if leaf.value.is_falsy() => format!("{lhs} IS NOT NULL"),
        DomainOp::In | DomainOp::NotIn | DomainOp::ChildOf | DomainOp::ParentOf => {
            let elements = match &leaf.value {
                Value::List(items) => items.clone(),
                Value::IdList(ids) => ids.iter().map(|&id| Value::Id(id)).collect(),
                other => vec![other.clone()],
            };
            let placeholders: Vec<String> = elements
                .iter()
                .map(|v| builder.bind(model, column, v))
                .collect();
            format!("{lhs} {} ({})", leaf.op.as_sql(), placeholders.join(", "))
        }
        DomainOp::Like | DomainOp::Ilike => {
            let pattern = Value::Str(format!("%{}%", leaf.value.display()));
            let placeholder = builder.bind(model, column, &pattern);
            format!("{lhs} {} {placeholder}", leaf.op.as_sql())
        }
        _ => {
            let placeholder = builder.bind(model, column, &leaf.value);
            format!("{lhs} {} {placeholder}", leaf.op.as_sql())
        }
    }
}
