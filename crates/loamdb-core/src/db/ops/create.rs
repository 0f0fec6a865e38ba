use crate::{
    db::{
        access::{self, AccessOp},
        env::Env,
        ops::{propagate, write},
        recordset::{RecordId, RecordSet},
        store::Row,
    },
    error::Error,
    obs::sink::{self, ExecKind, MetricsEvent},
    registry::Model,
    schema::{FieldDefault, FieldStorage},
    value::{Value, command::Vals},
};
use std::{collections::BTreeSet, rc::Rc};

/// Create one record per vals dict: defaults merged in, one batched insert
/// per entity, delegated parents synchronized, then the same dependency
/// propagation as `write`.
pub fn create(handle: &RecordSet, vals_list: Vec<Vals>) -> Result<RecordSet, Error> {
    let env = handle.env().clone();
    env.txn().ensure_open()?;
    let model = handle.model().clone();
    access::check_model_access(&env, &model.name, AccessOp::Create)?;
    if vals_list.is_empty() {
        return Ok(handle.browse(&[]));
    }
    sink::emit(MetricsEvent::ExecStart {
        kind: ExecKind::Create,
        entity: model.name.clone(),
    });

    let mut rows: Vec<Row> = Vec::with_capacity(vals_list.len());
    let mut deferred: Vec<Vals> = Vec::with_capacity(vals_list.len());
    let mut touched: Vec<BTreeSet<String>> = Vec::with_capacity(vals_list.len());

    for vals in vals_list {
        let mut vals = with_defaults(&env, &model, vals)?;
        sync_delegated_parents(&env, &model, &mut vals)?;

        let mut row = Row::new();
        let mut later = Vals::new();
        let mut names: BTreeSet<String> = BTreeSet::new();

        for (name, value) in vals {
            let field = model.field(&name)?.clone();
            access::check_field_access(&env, &model.name, &field)?;
            names.insert(name.clone());

            let is_direct_column = field.is_column()
                && matches!(field.storage, FieldStorage::Stored)
                && !(field.translate && env.lang() != crate::db::env::SOURCE_LANG);
            if is_direct_column {
                row.insert(name, write::normalize(&env, &model, &field, &value)?);
            } else {
                // Collections, related aliases, computed-with-inverse, and
                // non-source-language translations go through the write
                // pipeline once the record exists.
                later.insert(name, value);
            }
        }

        for field in model.columns() {
            if matches!(field.storage, FieldStorage::Stored) {
                let value = row.entry(field.name.clone()).or_insert(Value::Null);
                if field.required && value.is_null() {
                    return Err(Error::validation(format!(
                        "{}.{} is required",
                        model.name, field.name
                    )));
                }
            }
        }

        rows.push(row);
        deferred.push(later);
        touched.push(names);
    }

    let ids = env.store().insert(env.txn_id(), &model.table, rows.clone())?;
    let created = handle.browse(&ids);

    // Seed the cache: every stored column of a new record has a defined
    // value from here on.
    {
        let mut cache = env.cache().borrow_mut();
        for (id, row) in ids.iter().zip(&rows) {
            for field in model.columns() {
                let value = row.get(&field.name).cloned().unwrap_or(Value::Null);
                cache.set(&model.name, RecordId::Real(*id), &field.name, value);
            }
        }
    }

    // All stored fields count as newly set: constrains, dependents, and
    // the model's own stored computes.
    {
        let mut pending = env.pending().borrow_mut();
        for (id, names) in ids.iter().zip(&touched) {
            for name in names {
                pending.note_changed(&model.name, *id, name);
            }
        }
        for field in model.fields() {
            if field.is_stored_compute() {
                pending
                    .recompute
                    .entry((model.name.clone(), field.name.clone()))
                    .or_default()
                    .extend(ids.iter().copied());
            }
        }
    }
    for field in model.columns() {
        let set_ids: Vec<i64> = ids
            .iter()
            .zip(&rows)
            .filter(|(_, row)| row.get(&field.name).is_some_and(|v| !v.is_null()))
            .map(|(id, _)| *id)
            .collect();
        propagate::mark_dependents(&env, &model.name, &field.name, &set_ids)?;
        if let crate::value::FieldKind::Many2one { .. } = field.kind {
            let mut parents = BTreeSet::new();
            for (_, row) in ids.iter().zip(&rows) {
                if let Some(v) = row.get(&field.name) {
                    parents.extend(v.id_list());
                }
            }
            propagate::note_m2o_changed(&env, &model.name, &field.name, &parents)?;
        }
    }

    for (one, later) in created.iter().zip(deferred) {
        if !later.is_empty() {
            one.write(&later)?;
        }
    }

    for hook in &model.create_hooks {
        hook(&created)?;
    }

    sink::emit(MetricsEvent::ExecFinish {
        kind: ExecKind::Create,
        entity: model.name.clone(),
        records: ids.len() as u64,
    });
    Ok(created)
}

/// Merge declared defaults into vals for fields the caller did not set.
pub(crate) fn with_defaults(env: &Env, model: &Rc<Model>, mut vals: Vals) -> Result<Vals, Error> {
    for field in model.fields() {
        if vals.contains_key(&field.name) {
            continue;
        }
        if let Some(default) = &field.default {
            let value = match default {
                FieldDefault::Value(v) => v.clone(),
                FieldDefault::Fn(f) => f(env),
            };
            if !value.is_null() {
                vals.insert(field.name.clone(), value);
            }
        }
    }
    Ok(vals)
}

/// Delegated inheritance, create side: values landing on parent fields are
/// peeled off into a parent record created first, unless the caller
/// supplied the reference explicitly.
fn sync_delegated_parents(env: &Env, model: &Rc<Model>, vals: &mut Vals) -> Result<(), Error> {
    for (parent_name, via) in &model.inherits {
        if vals.contains_key(via) {
            continue;
        }
        let prefix = format!("{via}.");
        let delegated: Vec<String> = vals
            .keys()
            .filter(|name| {
                model
                    .field(name)
                    .ok()
                    .and_then(|f| f.related_path().map(ToString::to_string))
                    .is_some_and(|p| p.starts_with(&prefix) && !p[prefix.len()..].contains('.'))
            })
            .cloned()
            .collect();

        let mut parent_vals = Vals::new();
        for name in delegated {
            if let Some(value) = vals.remove(&name) {
                parent_vals.insert(name, value);
            }
        }
        let parent = env.model(parent_name)?.create(vec![parent_vals])?;
        vals.insert(via.clone(), Value::Id(parent.id()?));
    }
    Ok(())
}
