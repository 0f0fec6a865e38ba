//! Dependency propagation: after a field changes on some records, walk the
//! trigger tree to find every impacted `(entity, field, ids)` and mark it —
//! stored computes join the recompute queue, virtual computes and related
//! aliases are tombstoned in the cache.

use crate::{
    db::{
        env::Env,
        fields,
        triggers::{FieldNode, Hop, TriggerTree},
    },
    error::Error,
    value::FieldKind,
};
use std::collections::BTreeSet;

/// Mark everything downstream of `(model, field)` changing on `ids`.
pub(crate) fn mark_dependents(
    env: &Env,
    model: &str,
    field: &str,
    ids: &[i64],
) -> Result<(), Error> {
    if ids.is_empty() {
        return Ok(());
    }
    let registry = env.registry();
    let tree = registry.graph().trigger_tree(&[FieldNode::new(model, field)]);
    if tree.is_empty() {
        return Ok(());
    }
    resolve_tree(env, &tree, ids)
}

fn resolve_tree(env: &Env, tree: &TriggerTree, ids: &[i64]) -> Result<(), Error> {
    for node in &tree.fields {
        mark_one(env, node, ids)?;
    }
    for (hop, subtree) in &tree.children {
        let next = resolve_hop(env, hop, ids)?;
        if !next.is_empty() {
            resolve_tree(env, subtree, &next)?;
        }
    }
    Ok(())
}

fn mark_one(env: &Env, node: &FieldNode, ids: &[i64]) -> Result<(), Error> {
    let model = env.registry().get(&node.model)?;
    let field = model.field(&node.field)?.clone();
    let id_set: BTreeSet<i64> = ids.iter().copied().collect();

    env.cache()
        .borrow_mut()
        .mark_stale(&node.model, &node.field, &id_set);

    if field.is_stored_compute() {
        env.pending()
            .borrow_mut()
            .recompute
            .entry((node.model.clone(), node.field.clone()))
            .or_default()
            .extend(id_set);
    }
    Ok(())
}

/// Navigate one reverse hop from changed records to impacted ones.
pub(crate) fn resolve_hop(env: &Env, hop: &Hop, ids: &[i64]) -> Result<Vec<i64>, Error> {
    match hop {
        Hop::ReadField { model, field } => {
            let rs = env.records(model, ids)?;
            let mut out = BTreeSet::new();
            for one in rs.iter() {
                if let Ok(value) = fields::get(&one, field) {
                    out.extend(value.id_list());
                }
            }
            Ok(out.into_iter().collect())
        }
        Hop::SearchReferrers { model, field } => {
            let referrer = env.registry().get(model)?;
            let fdef = referrer.field(field)?.clone();
            let needle: BTreeSet<i64> = ids.iter().copied().collect();
            let candidates = match &fdef.kind {
                FieldKind::Many2many { relation, .. } => {
                    let mut lefts = BTreeSet::new();
                    for &id in ids {
                        lefts.extend(env.store().links_referencing(env.txn_id(), relation, id));
                    }
                    lefts.into_iter().collect::<Vec<i64>>()
                }
                _ => env.store().scan_ids(env.txn_id(), &referrer.table),
            };
            let rs = env.records(model, &candidates)?;
            let mut out = Vec::new();
            for one in rs.iter() {
                let value = fields::get(&one, field)?;
                if value.id_list().iter().any(|id| needle.contains(id)) {
                    out.extend(one.ids());
                }
            }
            Ok(out)
        }
    }
}

/// A many2one changed: derived one2many collections on both the old and
/// new targets go stale, and their dependents are marked.
pub(crate) fn note_m2o_changed(
    env: &Env,
    model: &str,
    field: &str,
    parents: &BTreeSet<i64>,
) -> Result<(), Error> {
    if parents.is_empty() {
        return Ok(());
    }
    let registry = env.registry();
    let parent_ids: Vec<i64> = parents.iter().copied().collect();
    for (o2m_model, o2m_field) in registry.o2m_fields_of_inverse(model, field).to_vec() {
        env.cache()
            .borrow_mut()
            .mark_stale(&o2m_model, &o2m_field, parents);
        mark_dependents(env, &o2m_model, &o2m_field, &parent_ids)?;
    }
    Ok(())
}
