use crate::{
    db::{
        access::{self, AccessOp},
        fields,
        ops::propagate,
        recordset::{RecordId, RecordSet},
    },
    error::Error,
    obs::sink::{self, ExecKind, MetricsEvent},
    schema::OnDelete,
    value::{FieldKind, Value},
};
use std::collections::BTreeSet;

/// Destroy the records: ondelete rules on inbound relations first
/// (restrict raises, cascade recurses, set-null detaches), then dependent
/// invalidation, SQL deletes, and cache eviction.
pub fn unlink(rs: &RecordSet) -> Result<(), Error> {
    let env = rs.env().clone();
    env.txn().ensure_open()?;
    let model = rs.model().clone();
    access::check_model_access(&env, &model.name, AccessOp::Unlink)?;

    let ids = env
        .store()
        .filter_existing(env.txn_id(), &model.table, &rs.ids());
    if ids.is_empty() {
        return Ok(());
    }
    let doomed = rs.browse(&ids);
    sink::emit(MetricsEvent::ExecStart {
        kind: ExecKind::Unlink,
        entity: model.name.clone(),
    });

    for hook in &model.ondelete_hooks {
        hook(&doomed)?;
    }

    // Inbound many2one references, restrict checks first so a violation
    // leaves everything untouched.
    let registry = env.registry();
    let inbound = registry.inbound_refs(&model.name).to_vec();
    let id_set: BTreeSet<i64> = ids.iter().copied().collect();

    for inbound_ref in &inbound {
        if inbound_ref.ondelete != OnDelete::Restrict {
            continue;
        }
        let mut referrers = referrers_of(&env, &inbound_ref.model, &inbound_ref.field, &id_set)?;
        if inbound_ref.model == model.name {
            // Self-references inside the doomed set do not block deletion.
            referrers.retain(|id| !id_set.contains(id));
        }
        if !referrers.is_empty() {
            return Err(Error::validation(format!(
                "cannot delete {}: still referenced by {}.{}",
                model.name, inbound_ref.model, inbound_ref.field
            )));
        }
    }

    for inbound_ref in &inbound {
        let mut referrers = referrers_of(&env, &inbound_ref.model, &inbound_ref.field, &id_set)?;
        if inbound_ref.model == model.name {
            referrers.retain(|id| !id_set.contains(id));
        }
        if referrers.is_empty() {
            continue;
        }
        let referrer_rs = env.records(&inbound_ref.model, &referrers)?;
        match inbound_ref.ondelete {
            OnDelete::Restrict => {}
            OnDelete::Cascade => referrer_rs.unlink()?,
            OnDelete::SetNull => {
                if inbound_ref.required {
                    return Err(Error::validation(format!(
                        "cannot delete {}: {}.{} is required",
                        model.name, inbound_ref.model, inbound_ref.field
                    )));
                }
                referrer_rs.set(&inbound_ref.field, Value::Null)?;
            }
        }
    }

    // Mark dependents while relations are still readable; the recompute
    // pass will see the records gone.
    for field in model.columns() {
        propagate::mark_dependents(&env, &model.name, &field.name, &ids)?;
        if matches!(field.kind, FieldKind::Many2one { .. }) {
            let mut parents = BTreeSet::new();
            for one in doomed.iter() {
                parents.extend(fields::get(&one, &field.name)?.id_list());
            }
            propagate::note_m2o_changed(&env, &model.name, &field.name, &parents)?;
        }
    }

    // Link tables and translation cells go with the rows.
    for field in model.fields() {
        if let FieldKind::Many2many { relation, .. } = &field.kind {
            env.store().link_purge(env.txn_id(), relation, &ids);
        }
    }
    env.store().drop_translations(env.txn_id(), &model.table, &ids);

    // Pending work on deleted records is void.
    {
        let mut pending = env.pending().borrow_mut();
        if let Some(writes) = pending.writes.get_mut(&model.name) {
            writes.retain(|id, _| !id_set.contains(id));
        }
        for ((m, _), recompute_ids) in &mut pending.recompute {
            if m == &model.name {
                recompute_ids.retain(|id| !id_set.contains(id));
            }
        }
        if let Some(constrains) = pending.constrains.get_mut(&model.name) {
            constrains.retain(|id, _| !id_set.contains(id));
        }
    }

    env.store().delete(env.txn_id(), &model.table, &ids)?;
    {
        let mut cache = env.cache().borrow_mut();
        for &id in &ids {
            cache.evict_record(&model.name, RecordId::Real(id));
        }
    }

    sink::emit(MetricsEvent::ExecFinish {
        kind: ExecKind::Unlink,
        entity: model.name.clone(),
        records: ids.len() as u64,
    });
    Ok(())
}

fn referrers_of(
    env: &crate::db::env::Env,
    model: &str,
    field: &str,
    targets: &BTreeSet<i64>,
) -> Result<Vec<i64>, Error> {
    let referrer = env.registry().get(model)?;
    let candidates = env.store().scan_ids(env.txn_id(), &referrer.table);
    let rs = env.records(model, &candidates)?;
    let mut out = Vec::new();
    for one in rs.iter() {
        if let Some(target) = fields::get(&one, field)?.as_id()
            && targets.contains(&target)
        {
            out.extend(one.ids());
        }
    }
    Ok(out)
}
