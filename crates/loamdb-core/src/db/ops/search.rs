use crate::{
    db::{
        access::{self, AccessOp},
        env::Env,
        fields,
        query::{Domain, DomainExpr, DomainLeaf, DomainOp, OrderTerm, eval, parse_order},
        recordset::{RecordId, RecordSet},
    },
    error::Error,
    obs::sink::{self, ExecKind, MetricsEvent},
    registry::Model,
    value::{FieldKind, Value},
};
use std::{cmp::Ordering, collections::BTreeSet, rc::Rc};

/// Search the entity: parse the domain once, conjoin record rules, match
/// against storage, and return an ordered record-set.
pub fn search(
    handle: &RecordSet,
    domain: &Domain,
    offset: usize,
    limit: Option<usize>,
    order: Option<&str>,
) -> Result<RecordSet, Error> {
    let matched = matching_ids(handle, domain)?;
    let model = handle.model().clone();

    let mut terms = match order {
        Some(spec) => parse_order(spec)?,
        None => model.order.clone(),
    };
    for term in &terms {
        if term.field != "id" {
            model.field(&term.field)?;
        }
    }
    // Ids are the final tiebreaker, always.
    if !terms.iter().any(|t| t.field == "id") {
        terms.push(OrderTerm {
            field: "id".to_string(),
            desc: false,
        });
    }

    let unsorted = handle.browse(&matched);
    let sorted = sort_records(&unsorted, &terms)?;

    let ids: Vec<i64> = sorted
        .ids()
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect();
    Ok(handle.browse(&ids))
}

pub fn search_count(handle: &RecordSet, domain: &Domain) -> Result<usize, Error> {
    Ok(matching_ids(handle, domain)?.len())
}

/// Shared by `search` and `read_group`: rule-filtered matching ids in
/// storage order.
pub(crate) fn matching_ids(handle: &RecordSet, domain: &Domain) -> Result<Vec<i64>, Error> {
    let env = handle.env().clone();
    env.txn().ensure_open()?;
    let model = handle.model().clone();
    access::check_model_access(&env, &model.name, AccessOp::Read)?;
    sink::emit(MetricsEvent::ExecStart {
        kind: ExecKind::Search,
        entity: model.name.clone(),
    });

    let mut expr = domain.parse()?;
    validate_paths(&env, &model, &expr)?;

    // Record rules conjoin for everyone but the superuser.
    if !env.is_superuser() {
        for rule in env
            .registry()
            .access()
            .rule_domains(env.user(), &model.name, AccessOp::Read)
        {
            expr = expr.and_expr(rule.parse()?);
        }
    }

    // Search must observe current state.
    env.flush()?;

    let expr = rewrite_hierarchy(&env, &model, expr)?;

    let candidates = env.store().scan_ids(env.txn_id(), &model.table);
    let mut matched = Vec::new();
    for id in candidates {
        if eval::eval(&env, &model, RecordId::Real(id), &expr)? {
            matched.push(id);
        }
    }

    sink::emit(MetricsEvent::ExecFinish {
        kind: ExecKind::Search,
        entity: model.name.clone(),
        records: matched.len() as u64,
    });
    Ok(matched)
}

/// In-memory domain filter on an existing set; record rules do not apply.
pub fn filtered_domain(rs: &RecordSet, domain: &Domain) -> Result<RecordSet, Error> {
    let env = rs.env().clone();
    let model = rs.model().clone();
    let expr = domain.parse()?;
    validate_paths(&env, &model, &expr)?;
    let expr = rewrite_hierarchy(&env, &model, expr)?;

    let mut keep = Vec::new();
    for id in rs.record_ids() {
        if eval::eval(&env, &model, id, &expr)? {
            keep.push(id);
        }
    }
    Ok(rs.with_record_ids(keep))
}

/// Subset of records that still exist in storage; placeholders drop out.
pub fn exists(rs: &RecordSet) -> Result<RecordSet, Error> {
    let env = rs.env();
    let model = rs.model().clone();
    let alive: BTreeSet<i64> = env
        .store()
        .filter_existing(env.txn_id(), &model.table, &rs.ids())
        .into_iter()
        .collect();
    let keep: Vec<RecordId> = rs
        .record_ids()
        .into_iter()
        .filter(|id| id.real().is_some_and(|raw| alive.contains(&raw)))
        .collect();
    Ok(rs.with_record_ids(keep))
}

/// Order-stable multi-term sort reading through the field engine.
pub fn sort_records(rs: &RecordSet, terms: &[OrderTerm]) -> Result<RecordSet, Error> {
    if terms.is_empty() {
        return Ok(rs.clone());
    }
    let mut decorated: Vec<(usize, RecordId, Vec<Value>)> = Vec::with_capacity(rs.len());
    for (i, one) in rs.iter().enumerate() {
        let mut keys = Vec::with_capacity(terms.len());
        for term in terms {
            let key = if term.field == "id" {
                one.record_ids()
                    .first()
                    .and_then(RecordId::real)
                    .map_or(Value::Null, Value::Id)
            } else {
                one.get(&term.field)?
            };
            keys.push(key);
        }
        let id = one.record_ids()[0];
        decorated.push((i, id, keys));
    }

    decorated.sort_by(|a, b| {
        for (idx, term) in terms.iter().enumerate() {
            let ord = a.2[idx]
                .compare(&b.2[idx])
                .unwrap_or(Ordering::Equal);
            let ord = if term.desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.0.cmp(&b.0)
    });

    Ok(rs.with_record_ids(decorated.into_iter().map(|(_, id, _)| id).collect()))
}

/// Validate every leaf path against the registry and feed index usage
/// counters for the health tooling.
fn validate_paths(env: &Env, model: &Rc<Model>, expr: &DomainExpr) -> Result<(), Error> {
    match expr {
        DomainExpr::True => Ok(()),
        DomainExpr::And(terms) | DomainExpr::Or(terms) => {
            for term in terms {
                validate_paths(env, model, term)?;
            }
            Ok(())
        }
        DomainExpr::Not(term) => validate_paths(env, model, term),
        DomainExpr::Leaf(leaf) => {
            let mut cur = model.clone();
            for (i, segment) in leaf.path.iter().enumerate() {
                if segment == "id" {
                    continue;
                }
                let field = cur.field(segment)?.clone();
                if i == 0 && field.index {
                    env.database().note_index_use(&model.name, segment);
                }
                if i + 1 < leaf.path.len() {
                    let comodel = field.kind.comodel().ok_or_else(|| {
                        Error::validation(format!(
                            "domain path '{}' traverses scalar field '{segment}'",
                            leaf.path.join(".")
                        ))
                    })?;
                    cur = env.registry().get(comodel)?;
                }
            }
            Ok(())
        }
    }
}

/// Rewrite `child_of`/`parent_of` leaves into id-membership leaves by
/// walking the hierarchy field.
fn rewrite_hierarchy(
    env: &Env,
    model: &Rc<Model>,
    expr: DomainExpr,
) -> Result<DomainExpr, Error> {
    Ok(match expr {
        DomainExpr::And(terms) => DomainExpr::And(
            terms
                .into_iter()
                .map(|t| rewrite_hierarchy(env, model, t))
                .collect::<Result<_, _>>()?,
        ),
        DomainExpr::Or(terms) => DomainExpr::Or(
            terms
                .into_iter()
                .map(|t| rewrite_hierarchy(env, model, t))
                .collect::<Result<_, _>>()?,
        ),
        DomainExpr::Not(term) => DomainExpr::Not(Box::new(rewrite_hierarchy(env, model, *term)?)),
        DomainExpr::Leaf(leaf)
            if matches!(leaf.op, DomainOp::ChildOf | DomainOp::ParentOf) =>
        {
            // The hierarchy lives on the comodel for relational leaves, on
            // the entity itself for `id`.
            let mut cur = model.clone();
            for segment in &leaf.path {
                if segment == "id" {
                    continue;
                }
                let field = cur.field(segment)?.clone();
                if let Some(comodel) = field.kind.comodel() {
                    cur = env.registry().get(comodel)?;
                }
            }
            let base = leaf.value.id_list();
            let ids = match leaf.op {
                DomainOp::ChildOf => descendants(env, &cur, &base)?,
                _ => ancestors(env, &cur, &base)?,
            };
            DomainExpr::Leaf(DomainLeaf {
                path: leaf.path,
                op: DomainOp::In,
                value: Value::List(ids.into_iter().map(Value::Id).collect()),
            })
        }
        other => other,
    })
}

/// Base ids plus everything below them through the parent field.
fn descendants(env: &Env, model: &Rc<Model>, base: &[i64]) -> Result<Vec<i64>, Error> {
    let parent_field = model.field(&model.parent_field)?.clone();
    if !matches!(parent_field.kind, FieldKind::Many2one { .. }) {
        return Err(Error::validation(format!(
            "'{}' is not a hierarchy field on '{}'",
            model.parent_field, model.name
        )));
    }

    let mut seen: BTreeSet<i64> = base.iter().copied().collect();
    let mut frontier: Vec<i64> = base.to_vec();
    let candidates = env.store().scan_ids(env.txn_id(), &model.table);
    while !frontier.is_empty() {
        let targets: BTreeSet<i64> = frontier.drain(..).collect();
        let rs = env.records(&model.name, &candidates)?;
        for one in rs.iter() {
            let id = one.record_ids()[0].real().unwrap_or_default();
            if seen.contains(&id) {
                continue;
            }
            if let Some(parent) = fields::get(&one, &model.parent_field)?.as_id()
                && targets.contains(&parent)
            {
                seen.insert(id);
                frontier.push(id);
            }
        }
    }
    Ok(seen.into_iter().collect())
}

/// Base ids plus the parent chain above them.
fn ancestors(env: &Env, model: &Rc<Model>, base: &[i64]) -> Result<Vec<i64>, Error> {
    model.field(&model.parent_field)?;
    let mut seen: BTreeSet<i64> = BTreeSet::new();
    let mut cursor: Vec<i64> = base.to_vec();
    while let Some(id) = cursor.pop() {
        if !seen.insert(id) {
            continue;
        }
        let one = env.records(&model.name, &[id])?;
        if let Some(parent) = fields::get(&one, &model.parent_field)?.as_id() {
            cursor.push(parent);
        }
    }
    Ok(seen.into_iter().collect())
}
