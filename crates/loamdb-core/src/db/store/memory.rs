use crate::{
    config::LockWaitPolicy,
    db::store::{Row, Store, TxnId},
    error::Error,
    obs::sink::{self, MetricsEvent},
};
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
};

type TransKey = (String, String, i64, String);

#[derive(Default)]
struct Committed {
    /// table -> id -> row
    rows: BTreeMap<String, BTreeMap<i64, Row>>,
    /// relation -> (left, right), kept sorted
    links: BTreeMap<String, BTreeSet<(i64, i64)>>,
    /// (table, field, id, lang) -> value
    translations: BTreeMap<TransKey, String>,
}

/// Per-transaction view on top of the committed state (read-committed).
#[derive(Default)]
struct Overlay {
    /// `None` marks a deletion.
    rows: BTreeMap<String, BTreeMap<i64, Option<Row>>>,
    /// `true` adds a link, `false` removes one.
    links: BTreeMap<String, BTreeMap<(i64, i64), bool>>,
    translations: BTreeMap<TransKey, Option<String>>,
}

#[derive(Default)]
struct Inner {
    committed: Committed,
    overlays: BTreeMap<u64, Overlay>,
    sequences: BTreeMap<String, i64>,
    /// (table, id) -> owning transaction
    locks: BTreeMap<(String, i64), u64>,
    next_txn: u64,
}

///
/// MemoryStore
///
/// In-process implementation of the store contract: committed state plus a
/// per-transaction overlay, an explicit row-lock table, and monotone id
/// sequences. Single-threaded by design; concurrency means several open
/// transactions interleaved on one worker.
///

#[derive(Default)]
pub struct MemoryStore {
    inner: RefCell<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        f(&mut self.inner.borrow_mut())
    }
}

impl Inner {
    fn overlay(&mut self, txn: TxnId) -> &mut Overlay {
        self.overlays.entry(txn.0).or_default()
    }

    fn visible_row(&self, txn: TxnId, table: &str, id: i64) -> Option<Row> {
        if let Some(overlay) = self.overlays.get(&txn.0)
            && let Some(slot) = overlay.rows.get(table).and_then(|t| t.get(&id))
        {
            return slot.clone();
        }
        self.committed
            .rows
            .get(table)
            .and_then(|t| t.get(&id))
            .cloned()
    }

    fn release_locks(&mut self, txn: TxnId) {
        self.locks.retain(|_, owner| *owner != txn.0);
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> TxnId {
        self.with(|inner| {
            inner.next_txn += 1;
            let id = inner.next_txn;
            inner.overlays.insert(id, Overlay::default());
            TxnId(id)
        })
    }

    fn commit(&self, txn: TxnId) -> Result<(), Error> {
        self.with(|inner| {
            let Some(overlay) = inner.overlays.remove(&txn.0) else {
                return Err(Error::internal(format!("unknown transaction {txn}")));
            };

            for (table, changes) in overlay.rows {
                let rows = inner.committed.rows.entry(table).or_default();
                for (id, slot) in changes {
                    match slot {
                        Some(row) => {
                            rows.insert(id, row);
                        }
                        None => {
                            rows.remove(&id);
                        }
                    }
                }
            }
            for (relation, changes) in overlay.links {
                let links = inner.committed.links.entry(relation).or_default();
                for (pair, present) in changes {
                    if present {
                        links.insert(pair);
                    } else {
                        links.remove(&pair);
                    }
                }
            }
            for (key, slot) in overlay.translations {
                match slot {
                    Some(value) => {
                        inner.committed.translations.insert(key, value);
                    }
                    None => {
                        inner.committed.translations.remove(&key);
                    }
                }
            }

            inner.release_locks(txn);
            Ok(())
        })
    }

    fn rollback(&self, txn: TxnId) {
        self.with(|inner| {
            inner.overlays.remove(&txn.0);
            inner.release_locks(txn);
        });
    }

    fn next_id(&self, table: &str) -> i64 {
        self.with(|inner| {
            let seq = inner.sequences.entry(table.to_string()).or_insert(0);
            *seq += 1;
            *seq
        })
    }

    fn insert(&self, txn: TxnId, table: &str, rows: Vec<Row>) -> Result<Vec<i64>, Error> {
        let mut ids = Vec::with_capacity(rows.len());
        self.with(|inner| {
            for row in rows {
                let seq = inner.sequences.entry(table.to_string()).or_insert(0);
                *seq += 1;
                let id = *seq;
                inner
                    .overlay(txn)
                    .rows
                    .entry(table.to_string())
                    .or_default()
                    .insert(id, Some(row));
                ids.push(id);
            }
        });
        Ok(ids)
    }

    fn update(&self, txn: TxnId, table: &str, ids: &[i64], values: &Row) -> Result<(), Error> {
        self.with(|inner| {
            for &id in ids {
                let Some(mut row) = inner.visible_row(txn, table, id) else {
                    return Err(Error::internal(format!(
                        "update of missing row {table}({id})"
                    )));
                };
                for (column, value) in values {
                    row.insert(column.clone(), value.clone());
                }
                inner
                    .overlay(txn)
                    .rows
                    .entry(table.to_string())
                    .or_default()
                    .insert(id, Some(row));
            }
            Ok(())
        })
    }

    fn delete(&self, txn: TxnId, table: &str, ids: &[i64]) -> Result<(), Error> {
        self.with(|inner| {
            for &id in ids {
                inner
                    .overlay(txn)
                    .rows
                    .entry(table.to_string())
                    .or_default()
                    .insert(id, None);
            }
            Ok(())
        })
    }

    fn fetch(&self, txn: TxnId, table: &str, ids: &[i64]) -> Result<Vec<(i64, Row)>, Error> {
        let rows = self.with(|inner| {
            ids.iter()
                .filter_map(|&id| inner.visible_row(txn, table, id).map(|row| (id, row)))
                .collect::<Vec<_>>()
        });
        sink::emit(MetricsEvent::RowsFetched {
            table: table.to_string(),
            rows: rows.len() as u64,
        });
        Ok(rows)
    }

    fn scan_ids(&self, txn: TxnId, table: &str) -> Vec<i64> {
        let ids = self.with(|inner| {
            let mut ids: BTreeSet<i64> = inner
                .committed
                .rows
                .get(table)
                .map(|t| t.keys().copied().collect())
                .unwrap_or_default();
            if let Some(overlay) = inner.overlays.get(&txn.0)
                && let Some(changes) = overlay.rows.get(table)
            {
                for (id, slot) in changes {
                    if slot.is_some() {
                        ids.insert(*id);
                    } else {
                        ids.remove(id);
                    }
                }
            }
            ids.into_iter().collect::<Vec<_>>()
        });
        sink::emit(MetricsEvent::RowsScanned {
            table: table.to_string(),
            rows: ids.len() as u64,
        });
        ids
    }

    fn filter_existing(&self, txn: TxnId, table: &str, ids: &[i64]) -> Vec<i64> {
        self.with(|inner| {
            ids.iter()
                .copied()
                .filter(|&id| inner.visible_row(txn, table, id).is_some())
                .collect()
        })
    }

    fn lock_rows(
        &self,
        txn: TxnId,
        table: &str,
        ids: &[i64],
        _policy: LockWaitPolicy,
    ) -> Result<(), Error> {
        // There is no scheduler to suspend on, so `Wait` degrades to
        // `Nowait` here: a held lock is a conflict either way.
        self.with(|inner| {
            for &id in ids {
                match inner.locks.get(&(table.to_string(), id)) {
                    Some(owner) if *owner != txn.0 => {
                        sink::emit(MetricsEvent::LockConflict {
                            table: table.to_string(),
                        });
                        return Err(Error::concurrency(table, id));
                    }
                    _ => {
                        inner.locks.insert((table.to_string(), id), txn.0);
                    }
                }
            }
            Ok(())
        })
    }

    fn link_add(&self, txn: TxnId, relation: &str, left: i64, rights: &[i64]) {
        self.with(|inner| {
            let links = inner
                .overlay(txn)
                .links
                .entry(relation.to_string())
                .or_default();
            for &right in rights {
                links.insert((left, right), true);
            }
        });
    }

    fn link_remove(&self, txn: TxnId, relation: &str, left: i64, rights: &[i64]) {
        self.with(|inner| {
            let links = inner
                .overlay(txn)
                .links
                .entry(relation.to_string())
                .or_default();
            for &right in rights {
                links.insert((left, right), false);
            }
        });
    }

    fn link_clear(&self, txn: TxnId, relation: &str, left: i64) {
        let rights = self.links_of(txn, relation, left);
        self.link_remove(txn, relation, left, &rights);
    }

    fn links_of(&self, txn: TxnId, relation: &str, left: i64) -> Vec<i64> {
        self.with(|inner| {
            let mut rights: BTreeSet<i64> = inner
                .committed
                .links
                .get(relation)
                .map(|links| {
                    links
                        .range((left, i64::MIN)..=(left, i64::MAX))
                        .map(|(_, r)| *r)
                        .collect()
                })
                .unwrap_or_default();
            if let Some(overlay) = inner.overlays.get(&txn.0)
                && let Some(changes) = overlay.links.get(relation)
            {
                for (&(l, r), &present) in changes {
                    if l == left {
                        if present {
                            rights.insert(r);
                        } else {
                            rights.remove(&r);
                        }
                    }
                }
            }
            rights.into_iter().collect()
        })
    }

    fn links_referencing(&self, txn: TxnId, relation: &str, right: i64) -> Vec<i64> {
        self.with(|inner| {
            let mut lefts: BTreeSet<i64> = inner
                .committed
                .links
                .get(relation)
                .map(|links| {
                    links
                        .iter()
                        .filter(|(_, r)| *r == right)
                        .map(|(l, _)| *l)
                        .collect()
                })
                .unwrap_or_default();
            if let Some(overlay) = inner.overlays.get(&txn.0)
                && let Some(changes) = overlay.links.get(relation)
            {
                for (&(l, r), &present) in changes {
                    if r == right {
                        if present {
                            lefts.insert(l);
                        } else {
                            lefts.remove(&l);
                        }
                    }
                }
            }
            lefts.into_iter().collect()
        })
    }

    fn link_purge(&self, txn: TxnId, relation: &str, left_ids: &[i64]) {
        for &left in left_ids {
            self.link_clear(txn, relation, left);
        }
        // Also purge as the right-hand side.
        self.with(|inner| {
            let committed: Vec<(i64, i64)> = inner
                .committed
                .links
                .get(relation)
                .map(|links| {
                    links
                        .iter()
                        .filter(|(_, r)| left_ids.contains(r))
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            let overlay_pairs: Vec<(i64, i64)> = inner
                .overlays
                .get(&txn.0)
                .and_then(|o| o.links.get(relation))
                .map(|changes| {
                    changes
                        .iter()
                        .filter(|(pair, present)| **present && left_ids.contains(&pair.1))
                        .map(|(pair, _)| *pair)
                        .collect()
                })
                .unwrap_or_default();
            let links = inner
                .overlay(txn)
                .links
                .entry(relation.to_string())
                .or_default();
            for pair in committed.into_iter().chain(overlay_pairs) {
                links.insert(pair, false);
            }
        });
    }

    fn set_translation(
        &self,
        txn: TxnId,
        table: &str,
        field: &str,
        id: i64,
        lang: &str,
        value: &str,
    ) {
        self.with(|inner| {
            let key = (table.to_string(), field.to_string(), id, lang.to_string());
            inner
                .overlay(txn)
                .translations
                .insert(key, Some(value.to_string()));
        });
    }

    fn translation(
        &self,
        txn: TxnId,
        table: &str,
        field: &str,
        id: i64,
        lang: &str,
    ) -> Option<String> {
        self.with(|inner| {
            let key = (table.to_string(), field.to_string(), id, lang.to_string());
            if let Some(overlay) = inner.overlays.get(&txn.0)
                && let Some(slot) = overlay.translations.get(&key)
            {
                return slot.clone();
            }
            inner.committed.translations.get(&key).cloned()
        })
    }

    fn drop_translations(&self, txn: TxnId, table: &str, ids: &[i64]) {
        self.with(|inner| {
            let keys: Vec<TransKey> = inner
                .committed
                .translations
                .keys()
                .filter(|(t, _, id, _)| t == table && ids.contains(id))
                .cloned()
                .collect();
            for key in keys {
                inner.overlay(txn).translations.insert(key, None);
            }
        });
    }
}
