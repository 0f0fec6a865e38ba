use crate::{
    db::{ops::flush, recordset::RecordSet},
    error::Error,
};

/// Pin the rows for the rest of the transaction
/// (`SELECT ... FOR UPDATE NOWAIT`). Pending writes are drained first so
/// the lock covers current row state.
pub fn lock_for_update(rs: &RecordSet) -> Result<(), Error> {
    let env = rs.env();
    env.txn().ensure_open()?;
    let model = rs.model().clone();
    let ids = rs.ids();
    if ids.is_empty() {
        return Ok(());
    }
    flush::flush_writes(env, Some(&model.name))?;
    env.store()
        .lock_rows(env.txn_id(), &model.table, &ids, env.config().lock_wait_policy)
        .map_err(|err| match err {
            // The store reports conflicts by table; re-key to the entity.
            Error::Concurrency { id, .. } => Error::concurrency(&model.name, id),
            other => other,
        })
}

/// Nowait lock for idempotent background batches: a conflict is logged and
/// skipped rather than raised, leaving the work to a later run.
pub fn try_lock_for_update(rs: &RecordSet) -> Result<bool, Error> {
    match lock_for_update(rs) {
        Ok(()) => Ok(true),
        Err(err) if err.is_retryable() => {
            tracing::info!(
                target: "loamdb::lock",
                entity = %rs.model_name(),
                ids = ?rs.ids(),
                "row lock not available, skipping batch"
            );
            Ok(false)
        }
        Err(other) => Err(other),
    }
}
