use crate::{
    db::{
        env::Env,
        fields, ops,
        query::{Domain, parse_order},
    },
    error::Error,
    registry::Model,
    value::{Value, command::Vals},
};
use std::{collections::BTreeSet, fmt, rc::Rc};

///
/// RecordId
///
/// Persisted ids are positive and monotone; `New` placeholders stand in
/// for unsaved records during the onchange protocol.
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum RecordId {
    Real(i64),
    New(u64),
}

impl RecordId {
    #[must_use]
    pub const fn real(&self) -> Option<i64> {
        match self {
            Self::Real(id) => Some(*id),
            Self::New(_) => None,
        }
    }

    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(id) => write!(f, "{id}"),
            Self::New(n) => write!(f, "new{n}"),
        }
    }
}

///
/// Mapped
///
/// Result of `mapped(path)`: scalar values aligned with iteration, or the
/// concatenated target record-set for relational endpoints.
///

#[derive(Clone, Debug)]
pub enum Mapped {
    Values(Vec<Value>),
    Records(RecordSet),
}

impl Mapped {
    #[must_use]
    pub fn values(self) -> Vec<Value> {
        match self {
            Self::Values(v) => v,
            Self::Records(rs) => rs.ids().into_iter().map(Value::Id).collect(),
        }
    }

    pub fn records(self) -> Result<RecordSet, Error> {
        match self {
            Self::Records(rs) => Ok(rs),
            Self::Values(_) => Err(Error::validation("mapped path ends on a scalar field")),
        }
    }
}

///
/// RecordSet
///
/// Immutable ordered collection of ids of one entity, bound to an
/// environment. All operations flow through it; combinators return new
/// sets sharing the environment.
///

#[derive(Clone)]
pub struct RecordSet {
    env: Env,
    model: Rc<Model>,
    ids: Rc<Vec<RecordId>>,
}

impl fmt::Debug for RecordSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.model.name, self.record_ids())
    }
}

impl PartialEq for RecordSet {
    fn eq(&self, other: &Self) -> bool {
        self.model.name == other.model.name && self.ids == other.ids
    }
}

impl RecordSet {
    pub(crate) fn from_parts(env: Env, model: Rc<Model>, ids: Vec<RecordId>) -> Self {
        let set = Self {
            env,
            model,
            ids: Rc::new(ids),
        };
        // Every new set feeds the prefetch hint for its model.
        set.env.hint_prefetch(&set.model.name, &set.ids);
        set
    }

    ///
    /// ACCESSORS
    ///

    #[must_use]
    pub fn env(&self) -> &Env {
        &self.env
    }

    #[must_use]
    pub fn model(&self) -> &Rc<Model> {
        &self.model
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Real (persisted) ids, in set order.
    #[must_use]
    pub fn ids(&self) -> Vec<i64> {
        self.ids.iter().filter_map(RecordId::real).collect()
    }

    #[must_use]
    pub fn record_ids(&self) -> Vec<RecordId> {
        self.ids.as_ref().clone()
    }

    /// The single record's persisted id.
    pub fn id(&self) -> Result<i64, Error> {
        self.ensure_one()?;
        self.ids[0]
            .real()
            .ok_or_else(|| Error::validation("record is not persisted yet"))
    }

    /// Rebind the same environment to other ids.
    #[must_use]
    pub fn browse(&self, ids: &[i64]) -> Self {
        Self::from_parts(
            self.env.clone(),
            self.model.clone(),
            ids.iter().map(|&id| RecordId::Real(id)).collect(),
        )
    }

    #[must_use]
    pub(crate) fn with_record_ids(&self, ids: Vec<RecordId>) -> Self {
        Self::from_parts(self.env.clone(), self.model.clone(), ids)
    }

    /// Rebind to a different environment (derivations share the
    /// transaction and cache).
    #[must_use]
    pub fn with_env(&self, env: Env) -> Self {
        Self {
            env,
            model: self.model.clone(),
            ids: self.ids.clone(),
        }
    }

    pub fn ensure_one(&self) -> Result<&Self, Error> {
        if self.ids.len() == 1 {
            Ok(self)
        } else {
            Err(Error::validation(format!(
                "expected a single {} record, got {}",
                self.model.name,
                self.ids.len()
            )))
        }
    }

    /// Iterate as length-1 record-sets, in order.
    pub fn iter(&self) -> impl Iterator<Item = Self> + '_ {
        self.ids
            .iter()
            .map(|id| Self::from_parts(self.env.clone(), self.model.clone(), vec![*id]))
    }

    #[must_use]
    pub fn first(&self) -> Self {
        self.with_record_ids(self.ids.first().map_or_else(Vec::new, |id| vec![*id]))
    }

    #[must_use]
    pub fn contains_id(&self, id: i64) -> bool {
        self.ids.contains(&RecordId::Real(id))
    }

    ///
    /// SET ALGEBRA (order-preserving)
    ///

    fn check_same_model(&self, other: &Self) -> Result<(), Error> {
        if self.model.name == other.model.name {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "mixing record-sets of '{}' and '{}'",
                self.model.name, other.model.name
            )))
        }
    }

    /// Union keeping first-occurrence order.
    pub fn union(&self, other: &Self) -> Result<Self, Error> {
        self.check_same_model(other)?;
        let mut seen = BTreeSet::new();
        let ids = self
            .ids
            .iter()
            .chain(other.ids.iter())
            .filter(|id| seen.insert(**id))
            .copied()
            .collect();
        Ok(self.with_record_ids(ids))
    }

    pub fn minus(&self, other: &Self) -> Result<Self, Error> {
        self.check_same_model(other)?;
        let exclude: BTreeSet<RecordId> = other.ids.iter().copied().collect();
        let ids = self
            .ids
            .iter()
            .filter(|id| !exclude.contains(id))
            .copied()
            .collect();
        Ok(self.with_record_ids(ids))
    }

    pub fn intersect(&self, other: &Self) -> Result<Self, Error> {
        self.check_same_model(other)?;
        let keep: BTreeSet<RecordId> = other.ids.iter().copied().collect();
        let mut seen = BTreeSet::new();
        let ids = self
            .ids
            .iter()
            .filter(|id| keep.contains(id) && seen.insert(**id))
            .copied()
            .collect();
        Ok(self.with_record_ids(ids))
    }

    ///
    /// COMBINATORS
    ///

    /// Keep records the predicate accepts; the predicate sees length-1
    /// sets.
    #[must_use]
    pub fn filtered(&self, pred: impl Fn(&Self) -> bool) -> Self {
        let ids = self
            .ids
            .iter()
            .filter(|id| {
                pred(&Self::from_parts(
                    self.env.clone(),
                    self.model.clone(),
                    vec![**id],
                ))
            })
            .copied()
            .collect();
        self.with_record_ids(ids)
    }

    /// Keep records matching the domain, evaluated in memory.
    pub fn filtered_domain(&self, domain: &Domain) -> Result<Self, Error> {
        ops::search::filtered_domain(self, domain)
    }

    /// Order-stable sort by an order spec; `None` uses the entity default.
    pub fn sorted(&self, order: Option<&str>) -> Result<Self, Error> {
        let terms = match order {
            Some(spec) => parse_order(spec)?,
            None => self.model.order.clone(),
        };
        ops::search::sort_records(self, &terms)
    }

    /// Order-stable sort by a key function.
    #[must_use]
    pub fn sorted_by_key(&self, key: impl Fn(&Self) -> Value, reverse: bool) -> Self {
        let mut decorated: Vec<(usize, RecordId, Value)> = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let one = Self::from_parts(self.env.clone(), self.model.clone(), vec![*id]);
                (i, *id, key(&one))
            })
            .collect();
        decorated.sort_by(|a, b| {
            let ord = a.2.compare(&b.2).unwrap_or(std::cmp::Ordering::Equal);
            let ord = if reverse { ord.reverse() } else { ord };
            ord.then(a.0.cmp(&b.0))
        });
        self.with_record_ids(decorated.into_iter().map(|(_, id, _)| id).collect())
    }

    /// Traverse a dotted path, concatenating results.
    pub fn mapped(&self, path: &str) -> Result<Mapped, Error> {
        fields::mapped(self, path)
    }

    /// Subset of records that still exist in storage.
    pub fn exists(&self) -> Result<Self, Error> {
        ops::search::exists(self)
    }

    ///
    /// FIELD ACCESS
    ///

    /// Field value: the single record's value, or a list aligned with
    /// iteration on longer sets. Relational fields come back in id form;
    /// use `rel` for the target record-set.
    pub fn get(&self, field: &str) -> Result<Value, Error> {
        fields::get(self, field)
    }

    /// Target record-set of a relational field, concatenated over the set
    /// and de-duplicated preserving order.
    pub fn rel(&self, field: &str) -> Result<Self, Error> {
        fields::rel(self, field)
    }

    /// Assign one field on every record in the set.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<(), Error> {
        let mut vals = Vals::new();
        vals.insert(field.to_string(), value.into());
        self.write(&vals)
    }

    ///
    /// LIFECYCLE
    ///

    pub fn create(&self, vals_list: Vec<Vals>) -> Result<Self, Error> {
        ops::create::create(self, vals_list)
    }

    pub fn write(&self, vals: &Vals) -> Result<(), Error> {
        ops::write::write(self, vals)
    }

    pub fn read(&self, fields: &[&str]) -> Result<Vec<Vals>, Error> {
        ops::read::read(self, fields)
    }

    pub fn unlink(&self) -> Result<(), Error> {
        ops::unlink::unlink(self)
    }

    pub fn search(
        &self,
        domain: &Domain,
        offset: usize,
        limit: Option<usize>,
        order: Option<&str>,
    ) -> Result<Self, Error> {
        ops::search::search(self, domain, offset, limit, order)
    }

    pub fn search_count(&self, domain: &Domain) -> Result<usize, Error> {
        ops::search::search_count(self, domain)
    }

    pub fn read_group(
        &self,
        domain: &Domain,
        aggregates: &[&str],
        groupby: &[&str],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<ops::group::Group>, Error> {
        ops::group::read_group(self, domain, aggregates, groupby, limit, offset)
    }

    /// Merged defaults for the given fields, without creating anything.
    pub fn default_get(&self, fields: &[&str]) -> Result<Vals, Error> {
        ops::read::default_get(self, fields)
    }

    /// Run the onchange protocol on an unsaved record: returns the
    /// tentative value diff produced by the registered hooks.
    pub fn onchange(&self, values: Vals, changed: &[&str]) -> Result<Vals, Error> {
        ops::onchange::onchange(self, values, changed)
    }

    ///
    /// LOCKING
    ///

    /// Pin the rows for the rest of the transaction
    /// (`SELECT ... FOR UPDATE NOWAIT`).
    pub fn lock_for_update(&self) -> Result<(), Error> {
        ops::lock::lock_for_update(self)
    }

    /// Nowait lock for idempotent background batches: on conflict, log and
    /// report `false` instead of failing.
    pub fn try_lock_for_update(&self) -> Result<bool, Error> {
        ops::lock::try_lock_for_update(self)
    }
}
