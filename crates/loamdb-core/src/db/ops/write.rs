use crate::{
    db::{
        access::{self, AccessOp},
        env::{Env, SOURCE_LANG},
        fields,
        ops::propagate,
        recordset::{RecordId, RecordSet},
        tracking::{self, TrackingEntry},
    },
    error::Error,
    obs::sink::{self, ExecKind, MetricsEvent},
    registry::{Field, Model},
    value::{FieldKind, RelCommand, Value, command::Vals},
};
use std::{collections::BTreeSet, rc::Rc};

/// Assign values to every record in the set atomically through the write
/// pipeline: normalize, split, update the cache eagerly, queue SQL, mark
/// dependents, and record tracking diffs.
pub fn write(rs: &RecordSet, vals: &Vals) -> Result<(), Error> {
    if rs.is_empty() || vals.is_empty() {
        return Ok(());
    }
    let env = rs.env().clone();
    env.txn().ensure_open()?;
    let model = rs.model().clone();
    access::check_model_access(&env, &model.name, AccessOp::Write)?;
    sink::emit(MetricsEvent::ExecStart {
        kind: ExecKind::Write,
        entity: model.name.clone(),
    });

    for (name, value) in vals {
        let field = model.field(name)?.clone();
        access::check_field_access(&env, &model.name, &field)?;

        if let Some(path) = field.related_path().map(ToString::to_string) {
            write_related(rs, &field, &path, value)?;
        } else if field.kind.is_x2many() {
            apply_commands(rs, &model, &field, value)?;
        } else if field.is_computed() && !env.is_computing(&model.name, &field.name) {
            write_via_inverse(rs, &model, &field, value)?;
        } else {
            write_column(rs, &model, &field, value)?;
        }
    }

    sink::emit(MetricsEvent::ExecFinish {
        kind: ExecKind::Write,
        entity: model.name.clone(),
        records: rs.len() as u64,
    });
    Ok(())
}

/// Normalize a user value for one field, with selection-key membership.
pub(crate) fn normalize(env: &Env, model: &Model, field: &Field, value: &Value) -> Result<Value, Error> {
    let normalized = field.kind.normalize(value.clone()).map_err(|message| {
        Error::validation(format!("{}.{}: {message}", model.name, field.name))
    })?;

    if matches!(field.kind, FieldKind::Selection) && !normalized.is_null() {
        let key = normalized.as_str().unwrap_or_default().to_string();
        let mut known: Vec<String> = field.selection.iter().map(|(k, _)| k.clone()).collect();
        if let Some(expand) = &field.expand {
            known.extend(expand(env).into_iter().map(|(k, _)| k));
        }
        if !known.iter().any(|k| k == &key) {
            return Err(Error::validation(format!(
                "{}.{}: '{key}' is not a valid selection key",
                model.name, field.name
            )));
        }
    }
    Ok(normalized)
}

/// Plain column assignment: the idempotence check happens here, so writing
/// a value equal to the current one triggers nothing downstream.
fn write_column(
    rs: &RecordSet,
    model: &Rc<Model>,
    field: &Rc<Field>,
    value: &Value,
) -> Result<(), Error> {
    let env = rs.env().clone();
    let normalized = normalize(&env, model, field, value)?;

    if normalized.is_null() && field.required {
        return Err(Error::validation(format!(
            "{}.{} is required",
            model.name, field.name
        )));
    }

    // Translated fields written in a non-source language update the
    // per-language cell only; the source column stays put.
    if field.translate && env.lang() != SOURCE_LANG {
        let Some(text) = normalized.as_str() else {
            return Err(Error::validation(format!(
                "{}.{}: translations must be text",
                model.name, field.name
            )));
        };
        for id in rs.ids() {
            env.store().set_translation(
                env.txn_id(),
                &model.table,
                &field.name,
                id,
                env.lang(),
                text,
            );
        }
        return Ok(());
    }

    // Load current values so unchanged writes can be skipped and tracking
    // can diff old against new. A virtual compute writing itself must not
    // load through its own compute hook.
    if field.is_column() || !env.is_computing(&model.name, &field.name) {
        fields::ensure_loaded(rs, model, field)?;
    }

    let mut changed: Vec<i64> = Vec::new();
    let mut old_parents: BTreeSet<i64> = BTreeSet::new();
    let is_m2o = matches!(field.kind, FieldKind::Many2one { .. });

    for id in rs.record_ids() {
        let old = env
            .cached_value(&model.name, id, &field.name)
            .unwrap_or(Value::Null);
        if old.same(&normalized) {
            continue;
        }

        if field.tracked && !id.is_new() {
            tracking::record(
                &env,
                TrackingEntry {
                    model: model.name.clone(),
                    id: id.real().unwrap_or_default(),
                    field: field.name.clone(),
                    old: old.display(),
                    new: normalized.display(),
                },
            );
        }

        env.cache()
            .borrow_mut()
            .set(&model.name, id, &field.name, normalized.clone());

        let RecordId::Real(raw) = id else {
            // Unsaved records live in the cache only.
            continue;
        };
        if is_m2o {
            old_parents.extend(old.id_list());
            old_parents.extend(normalized.id_list());
        }
        changed.push(raw);
        let mut pending = env.pending().borrow_mut();
        if field.is_column() {
            pending
                .writes
                .entry(model.name.clone())
                .or_default()
                .entry(raw)
                .or_default()
                .insert(field.name.clone(), normalized.clone());
        }
        pending.note_changed(&model.name, raw, &field.name);
    }

    if changed.is_empty() {
        return Ok(());
    }

    propagate::mark_dependents(&env, &model.name, &field.name, &changed)?;
    if is_m2o {
        propagate::note_m2o_changed(&env, &model.name, &field.name, &old_parents)?;
    }
    Ok(())
}

/// Write-through on a related alias: follow the hops, write the endpoint.
fn write_related(rs: &RecordSet, field: &Rc<Field>, path: &str, value: &Value) -> Result<(), Error> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, hops) = segments
        .split_last()
        .ok_or_else(|| Error::internal(format!("empty related path on {}", field.name)))?;

    for one in rs.iter() {
        let mut cur = one;
        for hop in hops {
            cur = cur.rel(hop)?;
            if cur.is_empty() {
                return Err(Error::validation(format!(
                    "cannot write '{}' through an empty '{hop}'",
                    field.name
                )));
            }
        }
        let mut vals = Vals::new();
        vals.insert((*last).to_string(), value.clone());
        write(&cur, &vals)?;
    }
    Ok(())
}

/// A computed field with an inverse hook accepts writes: the cache gets the
/// value, then the inverse propagates it onto real fields.
fn write_via_inverse(
    rs: &RecordSet,
    model: &Rc<Model>,
    field: &Rc<Field>,
    value: &Value,
) -> Result<(), Error> {
    let env = rs.env().clone();
    let Some(hook_name) = field.inverse_hook.clone() else {
        return Err(Error::validation(format!(
            "{}.{} is computed and cannot be written",
            model.name, field.name
        )));
    };
    let hook = model
        .inverses
        .get(&hook_name)
        .ok_or_else(|| {
            Error::programming(format!(
                "inverse hook '{hook_name}' is not registered on '{}'",
                model.name
            ))
        })?
        .clone();

    let normalized = normalize(&env, model, field, value)?;
    for id in rs.record_ids() {
        env.cache()
            .borrow_mut()
            .set(&model.name, id, &field.name, normalized.clone());
    }
    hook(rs)?;

    propagate::mark_dependents(&env, &model.name, &field.name, &rs.ids())?;
    Ok(())
}

/// Apply a relational command list to a one2many/many2many field.
fn apply_commands(
    rs: &RecordSet,
    model: &Rc<Model>,
    field: &Rc<Field>,
    value: &Value,
) -> Result<(), Error> {
    let env = rs.env().clone();
    let commands = RelCommand::coerce(value).ok_or_else(|| {
        Error::validation(format!(
            "{}.{}: expected a command list or id list",
            model.name, field.name
        ))
    })?;

    for one in rs.iter() {
        let Some(owner) = one.record_ids().first().and_then(|id| id.real()) else {
            return Err(Error::validation(format!(
                "{}.{}: collection writes need a persisted record",
                model.name, field.name
            )));
        };
        match &field.kind {
            FieldKind::One2many { comodel, inverse } => {
                apply_o2m(&env, comodel, inverse, owner, &commands)?;
            }
            FieldKind::Many2many {
                comodel, relation, ..
            } => {
                apply_m2m(&env, comodel, relation, owner, &commands)?;
            }
            _ => {
                return Err(Error::internal(format!(
                    "command write on non-collection field '{}'",
                    field.name
                )));
            }
        }
        env.cache().borrow_mut().mark_stale(
            &model.name,
            &field.name,
            &BTreeSet::from([owner]),
        );
        propagate::mark_dependents(&env, &model.name, &field.name, &[owner])?;
    }
    Ok(())
}

fn apply_o2m(
    env: &Env,
    comodel: &str,
    inverse: &str,
    owner: i64,
    commands: &[RelCommand],
) -> Result<(), Error> {
    let handle = env.model(comodel)?;
    let inverse_required = handle.model().field(inverse)?.required;

    for command in commands {
        match command {
            RelCommand::Create(vals) => {
                let mut vals = vals.clone();
                vals.insert(inverse.to_string(), Value::Id(owner));
                handle.create(vec![vals])?;
            }
            RelCommand::Update(id, vals) => {
                env.records(comodel, &[*id])?.write(vals)?;
            }
            RelCommand::Link(id) => {
                env.records(comodel, &[*id])?.set(inverse, Value::Id(owner))?;
            }
            RelCommand::Unlink(id) => {
                detach_o2m(env, comodel, inverse, inverse_required, &[*id])?;
            }
            RelCommand::Clear => {
                let members = current_members(env, comodel, inverse, owner)?;
                detach_o2m(env, comodel, inverse, inverse_required, &members)?;
            }
            RelCommand::Set(ids) => {
                let members = current_members(env, comodel, inverse, owner)?;
                let keep: BTreeSet<i64> = ids.iter().copied().collect();
                let drop: Vec<i64> = members.into_iter().filter(|m| !keep.contains(m)).collect();
                detach_o2m(env, comodel, inverse, inverse_required, &drop)?;
                for id in ids {
                    env.records(comodel, &[*id])?.set(inverse, Value::Id(owner))?;
                }
            }
        }
    }
    Ok(())
}

/// Severed one2many members lose their parent; when the inverse is
/// required they are deleted instead.
fn detach_o2m(
    env: &Env,
    comodel: &str,
    inverse: &str,
    inverse_required: bool,
    ids: &[i64],
) -> Result<(), Error> {
    if ids.is_empty() {
        return Ok(());
    }
    let members = env.records(comodel, ids)?;
    if inverse_required {
        members.unlink()
    } else {
        members.set(inverse, Value::Null)
    }
}

fn current_members(env: &Env, comodel: &str, inverse: &str, owner: i64) -> Result<Vec<i64>, Error> {
    let handle = env.model(comodel)?;
    let co = handle.model().clone();
    crate::db::ops::flush::flush_writes(env, Some(comodel))?;
    let candidates = env.store().scan_ids(env.txn_id(), &co.table);
    let rs = env.records(comodel, &candidates)?;
    let mut members = Vec::new();
    for one in rs.iter() {
        if fields::get(&one, inverse)?.as_id() == Some(owner) {
            members.extend(one.ids());
        }
    }
    Ok(members)
}

fn apply_m2m(
    env: &Env,
    comodel: &str,
    relation: &str,
    owner: i64,
    commands: &[RelCommand],
) -> Result<(), Error> {
    for command in commands {
        match command {
            RelCommand::Create(vals) => {
                let created = env.model(comodel)?.create(vec![vals.clone()])?;
                env.store()
                    .link_add(env.txn_id(), relation, owner, &created.ids());
            }
            RelCommand::Update(id, vals) => {
                env.records(comodel, &[*id])?.write(vals)?;
            }
            RelCommand::Link(id) => {
                env.store().link_add(env.txn_id(), relation, owner, &[*id]);
            }
            RelCommand::Unlink(id) => {
                env.store().link_remove(env.txn_id(), relation, owner, &[*id]);
            }
            RelCommand::Clear => {
                env.store().link_clear(env.txn_id(), relation, owner);
            }
            RelCommand::Set(ids) => {
                env.store().link_clear(env.txn_id(), relation, owner);
                env.store().link_add(env.txn_id(), relation, owner, ids);
            }
        }
    }
    Ok(())
}
