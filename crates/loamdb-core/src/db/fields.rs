//! Field engine: read orchestration. Resolves related/delegate aliases,
//! batch-fetches stored columns through the prefetch hint, runs compute
//! batches, and applies the translation projection. Writes are the write
//! pipeline's concern (`ops::write`).

use crate::{
    db::{
        access,
        env::{Env, SOURCE_LANG},
        ops,
        recordset::{Mapped, RecordId, RecordSet},
    },
    error::Error,
    registry::{Field, Model},
    value::{FieldKind, Value},
};
use std::{collections::BTreeSet, rc::Rc};

/// Field value over the whole set: single value for one record, a list
/// aligned with iteration otherwise.
pub fn get(rs: &RecordSet, field: &str) -> Result<Value, Error> {
    if rs.is_empty() {
        return Ok(Value::Null);
    }
    let model = rs.model().clone();
    let fdef = model.field(field)?.clone();
    access::check_field_access(rs.env(), &model.name, &fdef)?;

    ensure_loaded(rs, &model, &fdef)?;

    let values: Result<Vec<Value>, Error> = rs
        .record_ids()
        .iter()
        .map(|&id| user_value(rs.env(), &model, &fdef, id))
        .collect();
    let mut values = values?;

    if rs.len() == 1 {
        Ok(values.pop().unwrap_or(Value::Null))
    } else {
        Ok(Value::List(values))
    }
}

/// Concatenated target record-set of a relational field, de-duplicated
/// preserving order.
pub fn rel(rs: &RecordSet, field: &str) -> Result<RecordSet, Error> {
    let model = rs.model().clone();
    let fdef = model.field(field)?.clone();
    let comodel = fdef.kind.comodel().ok_or_else(|| {
        Error::validation(format!(
            "field '{}' on '{}' is not relational",
            field, model.name
        ))
    })?;
    access::check_field_access(rs.env(), &model.name, &fdef)?;

    ensure_loaded(rs, &model, &fdef)?;

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for id in rs.record_ids() {
        let value = cached_or_null(rs.env(), &model, &fdef, id);
        for target in value.id_list() {
            if seen.insert(target) {
                out.push(target);
            }
        }
    }
    rs.env().records(comodel, &out)
}

/// Traverse a dotted path, concatenating results.
pub fn mapped(rs: &RecordSet, path: &str) -> Result<Mapped, Error> {
    let mut cur = rs.clone();
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let fdef = cur.model().field(segment)?.clone();
        if fdef.kind.is_relational() {
            cur = rel(&cur, segment)?;
        } else {
            if i + 1 != segments.len() {
                return Err(Error::validation(format!(
                    "mapped path '{path}' traverses scalar field '{segment}'"
                )));
            }
            let mut values = Vec::new();
            for one in cur.iter() {
                values.push(get(&one, segment)?);
            }
            return Ok(Mapped::Values(values));
        }
    }
    Ok(Mapped::Records(cur))
}

/// Make sure the cache holds a usable value of the field for every record
/// in the set.
pub(crate) fn ensure_loaded(
    rs: &RecordSet,
    model: &Rc<Model>,
    field: &Rc<Field>,
) -> Result<(), Error> {
    if let Some(path) = field.related_path().map(ToString::to_string) {
        return load_related(rs, model, field, &path);
    }
    if field.is_column() {
        if field.is_stored_compute() {
            // Stored computes must never be observed stale.
            ops::flush::recompute_pending_field(rs.env(), &model.name, &field.name, &rs.ids())?;
        }
        return load_columns(rs, model, field);
    }
    if field.is_computed() {
        return load_computed(rs, model, field);
    }
    match &field.kind {
        FieldKind::One2many { .. } | FieldKind::Many2many { .. } => load_x2many(rs, model, field),
        _ => load_columns(rs, model, field),
    }
}

/// Batched fetch of stored columns, widened by the prefetch hint.
fn load_columns(rs: &RecordSet, model: &Rc<Model>, field: &Rc<Field>) -> Result<(), Error> {
    let env = rs.env();
    let missing = env
        .cache()
        .borrow()
        .missing_ids(&model.name, &rs.record_ids(), &field.name);
    if missing.is_empty() {
        return Ok(());
    }

    // New records read as null until something writes them.
    let mut wanted: Vec<i64> = Vec::new();
    for id in &missing {
        match id {
            RecordId::New(_) => {
                env.cache()
                    .borrow_mut()
                    .set(&model.name, *id, &field.name, Value::Null);
            }
            RecordId::Real(raw) => wanted.push(*raw),
        }
    }
    if wanted.is_empty() {
        return Ok(());
    }

    // Widen with prefetch candidates still missing the field, up to the
    // configured batch size so SQL parameter counts stay bounded.
    let cap = env.config().prefetch_batch_size.max(wanted.len());
    let mut batch: Vec<i64> = wanted.clone();
    for id in env.prefetch_ids(&model.name) {
        if batch.len() >= cap {
            break;
        }
        if !batch.contains(&id)
            && env
                .cache()
                .borrow()
                .get(&model.name, RecordId::Real(id), &field.name)
                .is_none()
        {
            batch.push(id);
        }
    }

    let rows = env
        .store()
        .fetch(env.txn_id(), &model.table, &batch)?;
    let mut fetched: BTreeSet<i64> = BTreeSet::new();
    {
        let mut cache = env.cache().borrow_mut();
        for (id, row) in rows {
            fetched.insert(id);
            for column in model.columns() {
                let value = row.get(&column.name).cloned().unwrap_or(Value::Null);
                cache.set(&model.name, RecordId::Real(id), &column.name, value);
            }
        }
    }

    for id in wanted {
        if !fetched.contains(&id) {
            return Err(Error::missing(&model.name, id));
        }
    }
    Ok(())
}

/// Run the compute hook over a batch covering the whole request.
fn load_computed(rs: &RecordSet, model: &Rc<Model>, field: &Rc<Field>) -> Result<(), Error> {
    let env = rs.env();
    let missing = env
        .cache()
        .borrow()
        .missing_ids(&model.name, &rs.record_ids(), &field.name);
    if missing.is_empty() {
        return Ok(());
    }
    run_compute(env, model, field, &missing)
}

/// Invoke the compute hook on a record-set; the hook is contractually
/// required to set the value for every record it receives.
pub(crate) fn run_compute(
    env: &Env,
    model: &Rc<Model>,
    field: &Rc<Field>,
    ids: &[RecordId],
) -> Result<(), Error> {
    let hook_name = field
        .compute_hook()
        .ok_or_else(|| Error::programming(format!("field '{}' has no compute", field.name)))?;
    let hook = model.compute_fn(hook_name)?.clone();

    let batch = RecordSet::from_parts(env.clone(), model.clone(), ids.to_vec());
    env.begin_compute(&model.name, &field.name);
    let outcome = hook(&batch);
    env.end_compute(&model.name, &field.name);
    outcome?;

    let cache = env.cache().borrow();
    for id in ids {
        if cache.get_value(&model.name, *id, &field.name).is_none() {
            return Err(Error::programming(format!(
                "compute '{hook_name}' on '{}' left no value for {}.{} of record {id}",
                model.name, model.name, field.name
            )));
        }
    }
    Ok(())
}

/// Resolve a related alias record by record: follow the hops, read the
/// endpoint, cache the projection.
fn load_related(
    rs: &RecordSet,
    model: &Rc<Model>,
    field: &Rc<Field>,
    path: &str,
) -> Result<(), Error> {
    let env = rs.env();
    let missing = env
        .cache()
        .borrow()
        .missing_ids(&model.name, &rs.record_ids(), &field.name);
    if missing.is_empty() {
        return Ok(());
    }

    let segments: Vec<&str> = path.split('.').collect();
    let (last, hops) = segments
        .split_last()
        .ok_or_else(|| Error::internal(format!("empty related path on {}", field.name)))?;

    for id in missing {
        let mut cur = RecordSet::from_parts(env.clone(), model.clone(), vec![id]);
        for hop in hops {
            cur = rel(&cur, hop)?;
            if cur.is_empty() {
                break;
            }
        }
        // A broken hop projects to null, like an outer join would.
        let value = get(&cur.first(), last)?;
        env.cache()
            .borrow_mut()
            .set(&model.name, id, &field.name, value);
    }
    Ok(())
}

/// One2many collections derive from the inverse many2one; many2many from
/// the link table.
fn load_x2many(rs: &RecordSet, model: &Rc<Model>, field: &Rc<Field>) -> Result<(), Error> {
    let env = rs.env();
    let missing = env
        .cache()
        .borrow()
        .missing_ids(&model.name, &rs.record_ids(), &field.name);
    if missing.is_empty() {
        return Ok(());
    }

    match &field.kind {
        FieldKind::One2many { comodel, inverse } => {
            let co = env.registry().get(comodel)?;
            // Pending column updates on the comodel must be visible to the
            // scan; drain them (writes only, no recomputation).
            ops::flush::flush_writes(env, Some(comodel))?;
            for id in missing {
                let ids = match id {
                    RecordId::New(_) => Vec::new(),
                    RecordId::Real(raw) => {
                        let candidates = env.store().scan_ids(env.txn_id(), &co.table);
                        let co_rs = env.records(comodel, &candidates)?;
                        let mut members = Vec::new();
                        for child in co_rs.iter() {
                            let inv = get(&child, inverse)?;
                            if inv.as_id() == Some(raw) {
                                members.extend(child.ids());
                            }
                        }
                        members
                    }
                };
                env.cache()
                    .borrow_mut()
                    .set(&model.name, id, &field.name, Value::IdList(ids));
            }
        }
        FieldKind::Many2many { relation, .. } => {
            for id in missing {
                let ids = match id {
                    RecordId::New(_) => Vec::new(),
                    RecordId::Real(raw) => env.store().links_of(env.txn_id(), relation, raw),
                };
                env.cache()
                    .borrow_mut()
                    .set(&model.name, id, &field.name, Value::IdList(ids));
            }
        }
        _ => {
            return Err(Error::internal(format!(
                "load_x2many on non-collection field '{}'",
                field.name
            )));
        }
    }
    Ok(())
}

fn cached_or_null(env: &Env, model: &Rc<Model>, field: &Rc<Field>, id: RecordId) -> Value {
    env.cached_value(&model.name, id, &field.name)
        .unwrap_or(Value::Null)
}

/// Cache form to user form: translation projection for translated fields
/// read in a non-source language.
fn user_value(
    env: &Env,
    model: &Rc<Model>,
    field: &Rc<Field>,
    id: RecordId,
) -> Result<Value, Error> {
    let raw = cached_or_null(env, model, field, id);
    if !field.translate || env.lang() == SOURCE_LANG {
        return Ok(raw);
    }
    let Some(real) = id.real() else {
        return Ok(raw);
    };
    match env
        .store()
        .translation(env.txn_id(), &model.table, &field.name, real, env.lang())
    {
        Some(translated) => Ok(Value::Str(translated)),
        None if env.config().translation_fallback => Ok(raw),
        None => Ok(Value::Null),
    }
}
