use crate::{
    db::{
        ops::{create::with_defaults, write},
        recordset::RecordSet,
    },
    error::Error,
    value::{Value, command::Vals},
};

/// The onchange protocol: run the registered hooks against an unsaved
/// record seeded with the form values, and return the tentative diff.
/// Purely in-memory; nothing reaches storage.
pub fn onchange(handle: &RecordSet, values: Vals, changed: &[&str]) -> Result<Vals, Error> {
    let env = handle.env().clone();
    let model = handle.model().clone();

    let new_id = env.next_new_id();
    let record = handle.with_record_ids(vec![new_id]);

    // Seed the cache: form values first, then defaults, then null.
    let seeded = with_defaults(&env, &model, values)?;
    let mut before = Vals::new();
    for field in model.fields() {
        if field.is_computed() || field.related_path().is_some() {
            continue;
        }
        let value = match seeded.get(&field.name) {
            Some(v) => write::normalize(&env, &model, &field, v)?,
            None => Value::Null,
        };
        env.cache()
            .borrow_mut()
            .set(&model.name, new_id, &field.name, value.clone());
        before.insert(field.name.clone(), value);
    }

    for hook in &model.onchanges {
        if hook.fields.iter().any(|f| changed.contains(&f.as_str())) {
            (hook.apply)(&record)?;
        }
    }

    // The diff: every seeded field whose cached value moved.
    let mut diff = Vals::new();
    for (name, old) in &before {
        let now = env
            .cached_value(&model.name, new_id, name)
            .unwrap_or(Value::Null);
        if !now.same(old) {
            diff.insert(name.clone(), now);
        }
    }

    // Placeholder state must not leak into later reads.
    env.cache().borrow_mut().evict_record(&model.name, new_id);
    Ok(diff)
}
