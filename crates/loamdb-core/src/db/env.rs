use crate::{
    config::DbConfig,
    db::{
        access::ROOT_USER,
        cache::Cache,
        database::Database,
        ops,
        recordset::{RecordId, RecordSet},
        store::{Row, Store, TxnId},
        tracking::TrackingEntry,
    },
    error::Error,
    registry::Registry,
    value::Value,
};
use chrono::FixedOffset;
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

/// Language translated values are stored in; reads in other languages go
/// through the translation layer.
pub const SOURCE_LANG: &str = "en_US";

///
/// TxnState
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TxnState {
    Open,
    Committed,
    RolledBack,
}

///
/// Transaction
///
/// One store transaction plus its side-effect queues: tracking entries and
/// post-commit hooks. Owned by the environment family that created it.
///

pub struct Transaction {
    id: TxnId,
    store: Rc<dyn Store>,
    state: Cell<TxnState>,
    tracking: RefCell<Vec<TrackingEntry>>,
    tracking_logged: Cell<usize>,
    after_commit: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl Transaction {
    fn begin(store: Rc<dyn Store>) -> Self {
        let id = store.begin();
        Self {
            id,
            store,
            state: Cell::new(TxnState::Open),
            tracking: RefCell::new(Vec::new()),
            tracking_logged: Cell::new(0),
            after_commit: RefCell::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> TxnId {
        self.id
    }

    pub fn ensure_open(&self) -> Result<(), Error> {
        match self.state.get() {
            TxnState::Open => Ok(()),
            other => Err(Error::internal(format!(
                "transaction {} is no longer open ({other:?})",
                self.id
            ))),
        }
    }

    pub fn push_tracking(&self, entry: TrackingEntry) {
        self.tracking.borrow_mut().push(entry);
    }

    #[must_use]
    pub fn tracking_entries(&self) -> Vec<TrackingEntry> {
        self.tracking.borrow().clone()
    }

    /// Entries recorded since the last flush logged them.
    pub(crate) fn unlogged_tracking(&self) -> Vec<TrackingEntry> {
        let entries = self.tracking.borrow();
        let from = self.tracking_logged.get();
        self.tracking_logged.set(entries.len());
        entries[from..].to_vec()
    }

    /// Queue a side effect to run after a successful commit.
    pub fn after_commit(&self, hook: impl FnOnce() + 'static) {
        self.after_commit.borrow_mut().push(Box::new(hook));
    }

    fn commit(&self) -> Result<(), Error> {
        self.ensure_open()?;
        self.store.commit(self.id)?;
        self.state.set(TxnState::Committed);
        // Tracking was already recorded at flush; post-commit side effects
        // run strictly after it.
        for hook in self.after_commit.borrow_mut().drain(..) {
            hook();
        }
        Ok(())
    }

    fn rollback(&self) {
        if self.state.get() == TxnState::Open {
            self.store.rollback(self.id);
            self.state.set(TxnState::RolledBack);
            self.after_commit.borrow_mut().clear();
        }
    }
}

///
/// Pending
///
/// Writes and recomputations queued between cache updates and flush.
///

#[derive(Default)]
pub struct Pending {
    /// Storage-form column updates awaiting SQL, per model then id.
    pub writes: BTreeMap<String, BTreeMap<i64, Row>>,
    /// Stored computed fields known stale, with the impacted ids.
    pub recompute: BTreeMap<(String, String), BTreeSet<i64>>,
    /// Changed fields per record since the last flush, for `constrains`.
    pub constrains: BTreeMap<String, BTreeMap<i64, BTreeSet<String>>>,
}

impl Pending {
    pub fn clear(&mut self) {
        self.writes.clear();
        self.recompute.clear();
        self.constrains.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.recompute.is_empty() && self.constrains.is_empty()
    }

    pub fn note_changed(&mut self, model: &str, id: i64, field: &str) {
        self.constrains
            .entry(model.to_string())
            .or_default()
            .entry(id)
            .or_default()
            .insert(field.to_string());
    }
}

///
/// EnvShared
///
/// State shared by every environment derived within one transaction:
/// the cache, the pending queues, and the prefetch hints.
///

pub struct EnvShared {
    db: Database,
    txn: Rc<Transaction>,
    pub(crate) cache: RefCell<Cache>,
    pub(crate) pending: RefCell<Pending>,
    pub(crate) prefetch: RefCell<BTreeMap<String, BTreeSet<i64>>>,
    /// Fields currently being computed; their hooks may write them.
    computing: RefCell<BTreeSet<(String, String)>>,
    new_seq: Cell<u64>,
}

///
/// Invalidate
///
/// Cache invalidation granularities.
///

#[derive(Clone, Debug)]
pub enum Invalidate {
    All,
    /// The field across all cached ids of the model.
    Field { model: String, field: String },
    /// The field on the given ids.
    Ids {
        model: String,
        field: String,
        ids: Vec<i64>,
    },
}

///
/// Env
///
/// Per-request scope: user identity, language, active company, context,
/// and the shared transaction/cache. Derivations are cheap and share the
/// transaction.
///

#[derive(Clone)]
pub struct Env {
    shared: Rc<EnvShared>,
    user: i64,
    lang: String,
    company: i64,
    su: bool,
    context: Rc<BTreeMap<String, serde_json::Value>>,
}

impl Env {
    pub(crate) fn root(db: Database) -> Self {
        let txn = Rc::new(Transaction::begin(db.store()));
        Self {
            shared: Rc::new(EnvShared {
                db,
                txn,
                cache: RefCell::new(Cache::default()),
                pending: RefCell::new(Pending::default()),
                prefetch: RefCell::new(BTreeMap::new()),
                computing: RefCell::new(BTreeSet::new()),
                new_seq: Cell::new(0),
            }),
            user: ROOT_USER,
            lang: SOURCE_LANG.to_string(),
            company: 1,
            su: false,
            context: Rc::new(BTreeMap::new()),
        }
    }

    ///
    /// DERIVATIONS
    ///

    #[must_use]
    pub fn with_user(&self, user: i64) -> Self {
        let mut env = self.clone();
        env.user = user;
        env.su = false;
        env
    }

    #[must_use]
    pub fn with_company(&self, company: i64) -> Self {
        let mut env = self.clone();
        env.company = company;
        env
    }

    #[must_use]
    pub fn with_lang(&self, lang: &str) -> Self {
        let mut env = self.clone();
        env.lang = lang.to_string();
        env
    }

    #[must_use]
    pub fn with_context(&self, key: &str, value: serde_json::Value) -> Self {
        let mut env = self.clone();
        let mut context = (*env.context).clone();
        context.insert(key.to_string(), value);
        env.context = Rc::new(context);
        env
    }

    #[must_use]
    pub fn sudo(&self) -> Self {
        self.sudo_flag(true)
    }

    #[must_use]
    pub fn sudo_flag(&self, flag: bool) -> Self {
        let mut env = self.clone();
        env.su = flag;
        env
    }

    ///
    /// ACCESSORS
    ///

    #[must_use]
    pub const fn user(&self) -> i64 {
        self.user
    }

    #[must_use]
    pub fn lang(&self) -> &str {
        &self.lang
    }

    #[must_use]
    pub const fn company(&self) -> i64 {
        self.company
    }

    #[must_use]
    pub const fn is_sudo(&self) -> bool {
        self.su
    }

    #[must_use]
    pub const fn is_superuser(&self) -> bool {
        self.su || self.user == ROOT_USER
    }

    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.get(key)
    }

    /// Active timezone as a fixed offset, from the `tz_offset_minutes`
    /// context key. UTC when absent.
    #[must_use]
    pub fn tz(&self) -> FixedOffset {
        let minutes = self
            .context_value("tz_offset_minutes")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);
        #[allow(clippy::cast_possible_truncation)]
        let seconds = (minutes * 60) as i32;
        FixedOffset::east_opt(seconds)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is always valid"))
    }

    #[must_use]
    pub fn registry(&self) -> Rc<Registry> {
        self.shared.db.registry()
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.shared.db
    }

    #[must_use]
    pub fn config(&self) -> DbConfig {
        self.shared.db.config()
    }

    #[must_use]
    pub fn store(&self) -> Rc<dyn Store> {
        self.shared.db.store()
    }

    #[must_use]
    pub fn txn(&self) -> Rc<Transaction> {
        self.shared.txn.clone()
    }

    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.shared.txn.id()
    }

    pub(crate) fn begin_compute(&self, model: &str, field: &str) {
        self.shared
            .computing
            .borrow_mut()
            .insert((model.to_string(), field.to_string()));
    }

    pub(crate) fn end_compute(&self, model: &str, field: &str) {
        self.shared
            .computing
            .borrow_mut()
            .remove(&(model.to_string(), field.to_string()));
    }

    #[must_use]
    pub(crate) fn is_computing(&self, model: &str, field: &str) -> bool {
        self.shared
            .computing
            .borrow()
            .contains(&(model.to_string(), field.to_string()))
    }

    /// Placeholder id for an unsaved record (onchange protocol).
    pub(crate) fn next_new_id(&self) -> RecordId {
        let seq = self.shared.new_seq.get() + 1;
        self.shared.new_seq.set(seq);
        RecordId::New(seq)
    }

    ///
    /// RECORD-SET ENTRY POINTS
    ///

    /// Empty record-set bound to the model; the handle for `create`,
    /// `search`, and `browse`.
    pub fn model(&self, name: &str) -> Result<RecordSet, Error> {
        let model = self.registry().get(name)?;
        Ok(RecordSet::from_parts(self.clone(), model, Vec::new()))
    }

    /// Bind the given ids without checking existence (reads will).
    pub fn records(&self, name: &str, ids: &[i64]) -> Result<RecordSet, Error> {
        let model = self.registry().get(name)?;
        Ok(RecordSet::from_parts(
            self.clone(),
            model,
            ids.iter().map(|&id| RecordId::Real(id)).collect(),
        ))
    }

    ///
    /// CACHE & FLUSH
    ///

    pub(crate) fn cache(&self) -> &RefCell<Cache> {
        &self.shared.cache
    }

    pub(crate) fn pending(&self) -> &RefCell<Pending> {
        &self.shared.pending
    }

    /// Register ids as prefetch candidates for their model.
    pub(crate) fn hint_prefetch(&self, model: &str, ids: &[RecordId]) {
        let mut hints = self.shared.prefetch.borrow_mut();
        let set = hints.entry(model.to_string()).or_default();
        for id in ids {
            if let RecordId::Real(id) = id {
                set.insert(*id);
            }
        }
    }

    #[must_use]
    pub(crate) fn prefetch_ids(&self, model: &str) -> BTreeSet<i64> {
        self.shared
            .prefetch
            .borrow()
            .get(model)
            .cloned()
            .unwrap_or_default()
    }

    /// Drain pending writes and recomputations to storage.
    pub fn flush(&self) -> Result<(), Error> {
        ops::flush::flush_all(self, true)
    }

    /// Mark cache entries stale.
    pub fn invalidate(&self, spec: Invalidate) {
        let mut cache = self.shared.cache.borrow_mut();
        match spec {
            Invalidate::All => cache.clear(),
            Invalidate::Field { model, field } => cache.mark_stale_field(&model, &field),
            Invalidate::Ids { model, field, ids } => {
                cache.mark_stale(&model, &field, &ids.into_iter().collect());
            }
        }
    }

    /// Flush, then commit the transaction. With `recompute_on_commit`
    /// disabled, stored computes left stale are written as-is.
    pub fn commit(&self) -> Result<(), Error> {
        ops::flush::flush_all(self, self.config().recompute_on_commit)?;
        self.shared.txn.commit()
    }

    /// Roll back: no partial effect persists. Cache, pending queues, and
    /// the recompute queue unwind with the transaction.
    pub fn rollback(&self) {
        self.shared.txn.rollback();
        self.shared.cache.borrow_mut().clear();
        self.shared.pending.borrow_mut().clear();
        self.shared.prefetch.borrow_mut().clear();
    }

    /// Read a value through the cache without any fetch.
    #[must_use]
    pub(crate) fn cached_value(&self, model: &str, id: RecordId, field: &str) -> Option<Value> {
        self.shared.cache.borrow().get_value(model, id, field)
    }
}
