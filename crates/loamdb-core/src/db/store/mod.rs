mod memory;

#[cfg(test)]
mod tests;

pub use memory::MemoryStore;

use crate::{config::LockWaitPolicy, error::Error, value::Value};
use std::collections::BTreeMap;

/// Storage-form row: column name to value.
pub type Row = BTreeMap<String, Value>;

///
/// TxnId
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, derive_more::Display)]
pub struct TxnId(pub u64);

///
/// Store
///
/// The narrow persistence contract: a relational store with transactions,
/// id sequences, batched row access, `nowait` row locks, link tables for
/// symmetric collections, and per-language translation cells.
///
/// Engines lower domains to a typed plan; the SQL rendering of that plan
/// lives in `db::sql` and is what an external relational backend would
/// execute. `MemoryStore` interprets the row surface directly.
///

pub trait Store {
    fn begin(&self) -> TxnId;
    fn commit(&self, txn: TxnId) -> Result<(), Error>;
    fn rollback(&self, txn: TxnId);

    /// Next value of the table's id sequence. Sequences are monotone and
    /// non-transactional, like database sequences.
    fn next_id(&self, table: &str) -> i64;

    /// Insert rows (without ids) in one batch; returns assigned ids in
    /// input order, like `INSERT ... RETURNING id`.
    fn insert(&self, txn: TxnId, table: &str, rows: Vec<Row>) -> Result<Vec<i64>, Error>;

    /// Apply one column-value map to every given id.
    fn update(&self, txn: TxnId, table: &str, ids: &[i64], values: &Row) -> Result<(), Error>;

    fn delete(&self, txn: TxnId, table: &str, ids: &[i64]) -> Result<(), Error>;

    /// Batched fetch by ids (`SELECT ... WHERE id IN (...)`). Missing ids
    /// are silently absent from the result.
    fn fetch(&self, txn: TxnId, table: &str, ids: &[i64]) -> Result<Vec<(i64, Row)>, Error>;

    /// All visible ids of the table, ascending.
    fn scan_ids(&self, txn: TxnId, table: &str) -> Vec<i64>;

    /// Subset of `ids` that still exist.
    fn filter_existing(&self, txn: TxnId, table: &str, ids: &[i64]) -> Vec<i64>;

    /// Row-level locks for the rest of the transaction
    /// (`SELECT ... FOR UPDATE NOWAIT`). A conflict raises
    /// `Error::Concurrency` carrying the table name.
    fn lock_rows(
        &self,
        txn: TxnId,
        table: &str,
        ids: &[i64],
        policy: LockWaitPolicy,
    ) -> Result<(), Error>;

    ///
    /// LINK TABLES (many2many)
    ///

    fn link_add(&self, txn: TxnId, relation: &str, left: i64, rights: &[i64]);
    fn link_remove(&self, txn: TxnId, relation: &str, left: i64, rights: &[i64]);
    fn link_clear(&self, txn: TxnId, relation: &str, left: i64);
    /// Rights linked to `left`, ascending.
    fn links_of(&self, txn: TxnId, relation: &str, left: i64) -> Vec<i64>;
    /// Lefts referencing `right`, ascending.
    fn links_referencing(&self, txn: TxnId, relation: &str, right: i64) -> Vec<i64>;
    /// Drop every link (either side) involving the id on the given side.
    fn link_purge(&self, txn: TxnId, relation: &str, left_ids: &[i64]);

    ///
    /// TRANSLATIONS
    ///

    fn set_translation(
        &self,
        txn: TxnId,
        table: &str,
        field: &str,
        id: i64,
        lang: &str,
        value: &str,
    );
    fn translation(
        &self,
        txn: TxnId,
        table: &str,
        field: &str,
        id: i64,
        lang: &str,
    ) -> Option<String>;
    fn drop_translations(&self, txn: TxnId, table: &str, ids: &[i64]);
}
