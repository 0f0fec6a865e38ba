use crate::{
    config::DbConfig,
    db::{env::Env, store::MemoryStore, store::Store},
    registry::Registry,
};
use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

///
/// Database
///
/// The registry bound to a store and a configuration. Cheap to clone;
/// every environment family hangs off one of these.
///

#[derive(Clone)]
pub struct Database {
    inner: Rc<DbInner>,
}

struct DbInner {
    registry: Rc<Registry>,
    store: Rc<dyn Store>,
    config: DbConfig,
    /// (model, field) -> times an indexed field was used by a search
    /// domain. Feeds the unused-index health check.
    index_usage: RefCell<BTreeMap<(String, String), u64>>,
}

impl Database {
    #[must_use]
    pub fn new(registry: Registry, config: DbConfig) -> Self {
        Self::with_store(registry, config, Rc::new(MemoryStore::new()))
    }

    #[must_use]
    pub fn with_store(registry: Registry, config: DbConfig, store: Rc<dyn Store>) -> Self {
        Self {
            inner: Rc::new(DbInner {
                registry: Rc::new(registry),
                store,
                config,
                index_usage: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    /// Open a root environment with its own transaction.
    #[must_use]
    pub fn env(&self) -> Env {
        Env::root(self.clone())
    }

    /// Open an environment for a specific user, with its own transaction.
    #[must_use]
    pub fn env_for(&self, user: i64) -> Env {
        self.env().with_user(user)
    }

    #[must_use]
    pub fn registry(&self) -> Rc<Registry> {
        self.inner.registry.clone()
    }

    #[must_use]
    pub fn store(&self) -> Rc<dyn Store> {
        self.inner.store.clone()
    }

    #[must_use]
    pub fn config(&self) -> DbConfig {
        self.inner.config.clone()
    }

    pub(crate) fn note_index_use(&self, model: &str, field: &str) {
        *self
            .inner
            .index_usage
            .borrow_mut()
            .entry((model.to_string(), field.to_string()))
            .or_insert(0) += 1;
    }

    /// Search-side usage counters per indexed field.
    #[must_use]
    pub fn index_usage(&self) -> BTreeMap<(String, String), u64> {
        self.inner.index_usage.borrow().clone()
    }
}
