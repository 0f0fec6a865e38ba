use crate::{
    db::{env::Env, fields, recordset::RecordId, tracking},
    error::Error,
    obs::sink::{self, ExecKind, MetricsEvent},
    value::Value,
};
use std::collections::{BTreeMap, BTreeSet};

/// Iteration guard: a write/recompute cycle that keeps producing new work
/// past this many passes is a broken compute contract.
const MAX_FLUSH_PASSES: usize = 100;

/// Drain pending writes and recomputations to storage.
///
/// Ordering inside one pass: recompute dependents in topological order,
/// run `constrains` on written ∪ recomputed records, verify uniqueness
/// constraints, then push SQL. Recomputations may enqueue further work, so
/// passes repeat until the queues are dry, then tracking is logged.
pub fn flush_all(env: &Env, recompute: bool) -> Result<(), Error> {
    env.txn().ensure_open()?;
    sink::emit(MetricsEvent::ExecStart {
        kind: ExecKind::Flush,
        entity: String::new(),
    });

    for _pass in 0..MAX_FLUSH_PASSES {
        if recompute {
            drain_recompute(env)?;
        }
        let touched_models: Vec<String> = {
            let pending = env.pending().borrow();
            pending
                .writes
                .keys()
                .chain(pending.constrains.keys())
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };
        run_constrains(env)?;
        check_uniques(env, &touched_models)?;
        flush_writes(env, None)?;

        let pending = env.pending().borrow();
        let done = pending.writes.is_empty()
            && pending.constrains.is_empty()
            && (!recompute || pending.recompute.is_empty());
        drop(pending);
        if done {
            tracking::log_pending(env);
            sink::emit(MetricsEvent::ExecFinish {
                kind: ExecKind::Flush,
                entity: String::new(),
                records: 0,
            });
            return Ok(());
        }
    }
    Err(Error::programming(
        "flush did not converge; a compute keeps dirtying its own dependencies",
    ))
}

/// Recompute stored computes in topological order: lowest rank first, so a
/// compute never reads a dependency that is still stale.
fn drain_recompute(env: &Env) -> Result<(), Error> {
    loop {
        let next = {
            let pending = env.pending().borrow();
            pending
                .recompute
                .keys()
                .min_by_key(|(model, field)| {
                    (env.registry().rank(model, field), (*model).clone(), (*field).clone())
                })
                .cloned()
        };
        let Some((model_name, field_name)) = next else {
            return Ok(());
        };
        recompute_one(env, &model_name, &field_name)?;
    }
}

/// Recompute a pending stored compute before it is observed. The whole
/// queued set for the field is recomputed, not just the requested ids, so
/// the cache ends consistent in one batch.
pub(crate) fn recompute_pending_field(
    env: &Env,
    model: &str,
    field: &str,
    _requested: &[i64],
) -> Result<(), Error> {
    if env.is_computing(model, field) {
        return Ok(());
    }
    let queued = env
        .pending()
        .borrow()
        .recompute
        .contains_key(&(model.to_string(), field.to_string()));
    if queued {
        recompute_one(env, model, field)?;
    }
    Ok(())
}

fn recompute_one(env: &Env, model_name: &str, field_name: &str) -> Result<(), Error> {
    let ids: BTreeSet<i64> = {
        let mut pending = env.pending().borrow_mut();
        let key = (model_name.to_string(), field_name.to_string());
        pending.recompute.remove(&key).unwrap_or_default()
    };
    if ids.is_empty() {
        return Ok(());
    }

    let model = env.registry().get(model_name)?;
    let field = model.field(field_name)?.clone();
    let alive = env.store().filter_existing(
        env.txn_id(),
        &model.table,
        &ids.iter().copied().collect::<Vec<_>>(),
    );
    if alive.is_empty() {
        return Ok(());
    }

    let record_ids: Vec<RecordId> = alive.iter().map(|&id| RecordId::Real(id)).collect();
    fields::run_compute(env, &model, &field, &record_ids)?;

    sink::emit(MetricsEvent::RecomputeBatch {
        entity: model_name.to_string(),
        field: field_name.to_string(),
        records: alive.len() as u64,
    });
    tracing::trace!(
        target: "loamdb::flush",
        entity = model_name,
        field = field_name,
        records = alive.len(),
        "recomputed stored field"
    );
    Ok(())
}

/// Run `constrains` hooks for records whose listed fields changed since
/// the last flush. A failure aborts with no partial flush of this round.
fn run_constrains(env: &Env) -> Result<(), Error> {
    let touched: BTreeMap<String, BTreeMap<i64, BTreeSet<String>>> = {
        let mut pending = env.pending().borrow_mut();
        std::mem::take(&mut pending.constrains)
    };

    for (model_name, per_record) in touched {
        let model = env.registry().get(&model_name)?;
        if model.constrains.is_empty() {
            continue;
        }
        for constraint in &model.constrains {
            let ids: Vec<i64> = per_record
                .iter()
                .filter(|(_, fields)| constraint.fields.iter().any(|f| fields.contains(f)))
                .map(|(id, _)| *id)
                .collect();
            if ids.is_empty() {
                continue;
            }
            let alive = env.store().filter_existing(env.txn_id(), &model.table, &ids);
            if alive.is_empty() {
                continue;
            }
            let rs = env.records(&model_name, &alive)?;
            (constraint.check)(&rs)?;
        }
    }
    Ok(())
}

/// Engine-side uniqueness verification for models with touched records.
/// Tuples containing a null are exempt, like SQL unique indexes.
fn check_uniques(env: &Env, touched_models: &[String]) -> Result<(), Error> {
    for model_name in touched_models.iter().cloned() {
        let model = env.registry().get(&model_name)?;
        let mut unique_sets: Vec<(String, Vec<String>)> = model.uniques.clone();
        for field in model.fields() {
            if field.unique {
                unique_sets.push((field.name.clone(), vec![field.name.clone()]));
            }
        }
        if unique_sets.is_empty() {
            continue;
        }

        let ids = env.store().scan_ids(env.txn_id(), &model.table);
        let rs = env.records(&model_name, &ids)?;
        for (name, columns) in unique_sets {
            let mut seen: BTreeMap<String, i64> = BTreeMap::new();
            for one in rs.iter() {
                let mut parts = Vec::with_capacity(columns.len());
                let mut has_null = false;
                for column in &columns {
                    let value = fields::get(&one, column)?;
                    if value.is_null() {
                        has_null = true;
                        break;
                    }
                    parts.push(value.display());
                }
                if has_null {
                    continue;
                }
                let key = parts.join("\u{1f}");
                let id = one.record_ids()[0].real().unwrap_or_default();
                if let Some(other) = seen.insert(key, id) {
                    return Err(Error::validation(format!(
                        "unique constraint '{name}' on '{model_name}' violated by records {other} and {id}"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Drain pending column updates to the store, without recomputation or
/// constraint checks. `model` narrows to one entity; used internally when
/// a scan must observe queued writes.
pub(crate) fn flush_writes(env: &Env, model: Option<&str>) -> Result<(), Error> {
    let drained: Vec<(String, BTreeMap<i64, BTreeMap<String, Value>>)> = {
        let mut pending = env.pending().borrow_mut();
        match model {
            Some(name) => pending
                .writes
                .remove(name)
                .map(|rows| vec![(name.to_string(), rows)])
                .unwrap_or_default(),
            None => std::mem::take(&mut pending.writes).into_iter().collect(),
        }
    };

    for (model_name, rows) in drained {
        let table = env.registry().get(&model_name)?.table.clone();
        // One UPDATE per distinct value-set; records sharing values batch
        // together.
        let mut grouped: BTreeMap<String, (BTreeMap<String, Value>, Vec<i64>)> = BTreeMap::new();
        for (id, values) in rows {
            let signature = format!("{values:?}");
            grouped
                .entry(signature)
                .or_insert_with(|| (values, Vec::new()))
                .1
                .push(id);
        }
        for (_, (values, ids)) in grouped {
            env.store().update(env.txn_id(), &table, &ids, &values)?;
        }
    }
    Ok(())
}
