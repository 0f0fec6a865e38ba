use crate::registry::{IndexInfo, Registry};
use std::collections::BTreeMap;

/// Index pairs covering the same column list on the same table; the later
/// one is redundant.
#[must_use]
pub fn duplicate_indexes(registry: &Registry) -> Vec<(IndexInfo, IndexInfo)> {
    let mut seen: BTreeMap<(String, Vec<String>), IndexInfo> = BTreeMap::new();
    let mut duplicates = Vec::new();
    for table in registry.tables() {
        for index in &table.indexes {
            let key = (index.table.clone(), index.columns.clone());
            match seen.get(&key) {
                Some(first) => duplicates.push((first.clone(), index.clone())),
                None => {
                    seen.insert(key, index.clone());
                }
            }
        }
    }
    duplicates
}

/// Non-unique indexes whose leading column never appeared in a search
/// domain. Unique indexes stay out: they enforce constraints regardless of
/// read traffic.
#[must_use]
pub fn unused_indexes(
    registry: &Registry,
    usage: &BTreeMap<(String, String), u64>,
) -> Vec<IndexInfo> {
    let mut out = Vec::new();
    for table in registry.tables() {
        for index in &table.indexes {
            if index.unique {
                continue;
            }
            let Some(leading) = index.columns.first() else {
                continue;
            };
            let used = usage
                .get(&(table.model.clone(), leading.clone()))
                .copied()
                .unwrap_or(0);
            if used == 0 {
                out.push(index.clone());
            }
        }
    }
    out
}
