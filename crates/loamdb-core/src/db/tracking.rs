use crate::db::env::Env;

///
/// TrackingEntry
///
/// One logged value change on a tracked field, in display form. Recorded
/// by the write pipeline, surfaced on the transaction, and logged at
/// flush, strictly before post-commit side effects run.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrackingEntry {
    pub model: String,
    pub id: i64,
    pub field: String,
    pub old: String,
    pub new: String,
}

/// Record one tracked change on the transaction.
pub(crate) fn record(env: &Env, entry: TrackingEntry) {
    env.txn().push_tracking(entry);
}

/// Log entries recorded since the last flush.
pub(crate) fn log_pending(env: &Env) {
    for entry in env.txn().unlogged_tracking() {
        tracing::info!(
            target: "loamdb::tracking",
            model = %entry.model,
            id = entry.id,
            field = %entry.field,
            old = %entry.old,
            new = %entry.new,
            "tracked field changed"
        );
    }
}
