use crate::{
    db::{
        access::{self, AccessOp},
        ops::create::with_defaults,
        recordset::RecordSet,
    },
    error::Error,
    obs::sink::{self, ExecKind, MetricsEvent},
    value::{Value, command::Vals},
};

/// Read the given fields for every record, in user form, one map per
/// record with its `id`.
pub fn read(rs: &RecordSet, fields: &[&str]) -> Result<Vec<Vals>, Error> {
    let model = rs.model().clone();
    access::check_model_access(rs.env(), &model.name, AccessOp::Read)?;
    sink::emit(MetricsEvent::ExecStart {
        kind: ExecKind::Read,
        entity: model.name.clone(),
    });

    let mut out = Vec::with_capacity(rs.len());
    for one in rs.iter() {
        let mut vals = Vals::new();
        if let Some(id) = one.record_ids().first().and_then(|id| id.real()) {
            vals.insert("id".to_string(), Value::Int(id));
        }
        for field in fields {
            vals.insert((*field).to_string(), one.get(field)?);
        }
        out.push(vals);
    }

    sink::emit(MetricsEvent::ExecFinish {
        kind: ExecKind::Read,
        entity: model.name.clone(),
        records: rs.len() as u64,
    });
    Ok(out)
}

/// Merged defaults for the given fields, without creating anything.
/// Callables are evaluated in the environment.
pub fn default_get(handle: &RecordSet, fields: &[&str]) -> Result<Vals, Error> {
    let env = handle.env();
    let model = handle.model().clone();
    let defaults = with_defaults(env, &model, Vals::new())?;
    let mut out = Vals::new();
    for field in fields {
        // Unknown names are rejected; absent defaults simply don't appear.
        model.field(field)?;
        if let Some(value) = defaults.get(*field) {
            out.insert((*field).to_string(), value.clone());
        }
    }
    Ok(out)
}
