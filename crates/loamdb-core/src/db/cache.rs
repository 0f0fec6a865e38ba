use crate::{db::recordset::RecordId, value::Value};
use std::collections::{BTreeMap, BTreeSet};

///
/// Slot
///
/// One cached field value. Absence from the cache means "not yet fetched";
/// `Stale` is the explicit tombstone for "known invalidated".
///

#[derive(Clone, Debug, PartialEq)]
pub enum Slot {
    Value(Value),
    Stale,
}

///
/// Cache
///
/// `(entity, id) -> {field -> slot}` in storage form. Scoped to the
/// transaction; every environment derived from it shares this cache, so
/// invalidation is global across sibling environments.
///

#[derive(Debug, Default)]
pub struct Cache {
    slots: BTreeMap<(String, RecordId), BTreeMap<String, Slot>>,
}

impl Cache {
    #[must_use]
    pub fn get(&self, model: &str, id: RecordId, field: &str) -> Option<&Slot> {
        self.slots
            .get(&(model.to_string(), id))
            .and_then(|fields| fields.get(field))
    }

    #[must_use]
    pub fn get_value(&self, model: &str, id: RecordId, field: &str) -> Option<Value> {
        match self.get(model, id, field) {
            Some(Slot::Value(v)) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn set(&mut self, model: &str, id: RecordId, field: &str, value: Value) {
        self.slots
            .entry((model.to_string(), id))
            .or_default()
            .insert(field.to_string(), Slot::Value(value));
    }

    /// Ids among the given ones that have no usable value for the field.
    #[must_use]
    pub fn missing_ids(&self, model: &str, ids: &[RecordId], field: &str) -> Vec<RecordId> {
        ids.iter()
            .copied()
            .filter(|id| !matches!(self.get(model, *id, field), Some(Slot::Value(_))))
            .collect()
    }

    pub fn mark_stale(&mut self, model: &str, field: &str, ids: &BTreeSet<i64>) {
        for &id in ids {
            self.slots
                .entry((model.to_string(), RecordId::Real(id)))
                .or_default()
                .insert(field.to_string(), Slot::Stale);
        }
    }

    /// Tombstone the field on every cached record of the model.
    pub fn mark_stale_field(&mut self, model: &str, field: &str) {
        for ((m, _), fields) in &mut self.slots {
            if m == model {
                fields.insert(field.to_string(), Slot::Stale);
            }
        }
    }

    pub fn evict_record(&mut self, model: &str, id: RecordId) {
        self.slots.remove(&(model.to_string(), id));
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_stale_both_count_as_not_fetched() {
        let mut cache = Cache::default();
        let ids = [RecordId::Real(1), RecordId::Real(2), RecordId::Real(3)];
        cache.set("sale.order", RecordId::Real(1), "name", Value::from("a"));
        cache.mark_stale("sale.order", "name", &BTreeSet::from([2]));

        let missing = cache.missing_ids("sale.order", &ids, "name");
        assert_eq!(
            missing,
            vec![RecordId::Real(2), RecordId::Real(3)],
            "stale tombstones and absent slots both need a fetch"
        );
    }

    #[test]
    fn eviction_removes_every_field_of_the_record() {
        let mut cache = Cache::default();
        cache.set("sale.order", RecordId::Real(1), "name", Value::from("a"));
        cache.set("sale.order", RecordId::Real(1), "total", Value::Float(5.0));
        cache.evict_record("sale.order", RecordId::Real(1));
        assert!(cache.get("sale.order", RecordId::Real(1), "name").is_none());
        assert!(cache.get("sale.order", RecordId::Real(1), "total").is_none());
    }
}
