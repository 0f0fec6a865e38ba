//! The compiled catalog of entity classes: every declaration targeting one
//! name merged into a single effective model, dependency maps resolved, and
//! the SQL schema derived.

mod build;
mod schema_info;


pub use build::RegistryBuilder;
pub use schema_info::{ColumnInfo, IndexInfo, LinkTableInfo, TableInfo};

use crate::{
    db::{access::AccessRegistry, query::OrderTerm, triggers::DependencyGraph},
    error::Error,
    schema::{Constraint, FieldDefault, FieldStorage, HookFn, OnDelete, Onchange, SelectionExpander},
    value::FieldKind,
};
use std::{collections::BTreeMap, fmt, rc::Rc};

///
/// Field
///
/// Runtime field metadata: the declaration resolved against the effective
/// model. Shared behind `Rc`; never mutated after build.
///

#[derive(Clone)]
pub struct Field {
    pub name: String,
    pub model: String,
    pub kind: FieldKind,
    pub storage: FieldStorage,
    pub inverse_hook: Option<String>,
    pub required: bool,
    pub readonly: bool,
    pub default: Option<FieldDefault>,
    pub selection: Vec<(String, String)>,
    pub expand: Option<SelectionExpander>,
    pub ondelete: OnDelete,
    pub tracked: bool,
    pub translate: bool,
    pub index: bool,
    pub unique: bool,
    pub groups: Vec<String>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("model", &self.model)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl Field {
    /// Whether the field maps to a column on the model's table: plain
    /// stored fields and stored computes, excluding collection kinds.
    #[must_use]
    pub fn is_column(&self) -> bool {
        self.kind.has_column()
            && match &self.storage {
                FieldStorage::Stored => true,
                FieldStorage::Computed { store, .. } => *store,
                FieldStorage::Related { .. } => false,
            }
    }

    #[must_use]
    pub const fn is_computed(&self) -> bool {
        matches!(self.storage, FieldStorage::Computed { .. })
    }

    #[must_use]
    pub const fn is_stored_compute(&self) -> bool {
        matches!(self.storage, FieldStorage::Computed { store: true, .. })
    }

    #[must_use]
    pub fn compute_hook(&self) -> Option<&str> {
        match &self.storage {
            FieldStorage::Computed { compute, .. } => Some(compute),
            _ => None,
        }
    }

    #[must_use]
    pub fn depends(&self) -> &[String] {
        match &self.storage {
            FieldStorage::Computed { depends, .. } => depends,
            _ => &[],
        }
    }

    #[must_use]
    pub fn related_path(&self) -> Option<&str> {
        match &self.storage {
            FieldStorage::Related { path } => Some(path),
            _ => None,
        }
    }

    /// Declared selection options, in order.
    #[must_use]
    pub fn selection_keys(&self) -> Vec<&str> {
        self.selection.iter().map(|(k, _)| k.as_str()).collect()
    }
}

///
/// Model
///
/// The effective entity class: merged fields, hooks, order, constraints,
/// and delegation. Process-wide and immutable after registry build.
///

#[derive(Clone)]
pub struct Model {
    pub name: String,
    pub table: String,
    fields: BTreeMap<String, Rc<Field>>,
    /// Declaration order, for deterministic iteration.
    field_names: Vec<String>,
    pub order: Vec<OrderTerm>,
    pub parent_field: String,
    /// Delegated inheritance: parent model -> reference field.
    pub inherits: BTreeMap<String, String>,
    /// Named multi-column uniqueness constraints.
    pub uniques: Vec<(String, Vec<String>)>,

    pub computes: BTreeMap<String, HookFn>,
    pub inverses: BTreeMap<String, HookFn>,
    pub constrains: Vec<Constraint>,
    pub onchanges: Vec<Onchange>,
    pub ondelete_hooks: Vec<HookFn>,
    pub create_hooks: Vec<HookFn>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("fields", &self.field_names)
            .finish_non_exhaustive()
    }
}

impl Model {
    pub fn field(&self, name: &str) -> Result<&Rc<Field>, Error> {
        self.fields.get(name).ok_or_else(|| {
            Error::validation(format!("unknown field '{}' on entity '{}'", name, self.name))
        })
    }

    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &Rc<Field>> {
        self.field_names.iter().filter_map(|n| self.fields.get(n))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.field_names.iter().map(String::as_str)
    }

    /// Columns on the model's table, in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &Rc<Field>> {
        self.fields().filter(|f| f.is_column())
    }

    pub fn tracked_fields(&self) -> impl Iterator<Item = &Rc<Field>> {
        self.fields().filter(|f| f.tracked)
    }

    pub fn compute_fn(&self, hook: &str) -> Result<&HookFn, Error> {
        self.computes.get(hook).ok_or_else(|| {
            Error::programming(format!(
                "compute hook '{hook}' is not registered on '{}'",
                self.name
            ))
        })
    }
}

///
/// InboundRef
///
/// A many2one field elsewhere pointing at this model; drives ondelete
/// handling.
///

#[derive(Clone, Debug)]
pub struct InboundRef {
    pub model: String,
    pub field: String,
    pub ondelete: OnDelete,
    pub required: bool,
}

///
/// Registry
///

#[derive(Debug)]
pub struct Registry {
    models: BTreeMap<String, Rc<Model>>,
    graph: DependencyGraph,
    /// target model -> inbound many2one references
    inbound: BTreeMap<String, Vec<InboundRef>>,
    /// (comodel, many2one field) -> one2many fields built on that inverse
    o2m_by_inverse: BTreeMap<(String, String), Vec<(String, String)>>,
    /// Recompute ordering rank per stored computed field.
    ranks: BTreeMap<(String, String), u32>,
    access: AccessRegistry,
    tables: BTreeMap<String, TableInfo>,
}

impl Registry {
    pub fn get(&self, name: &str) -> Result<Rc<Model>, Error> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| Error::validation(format!("unknown entity '{name}'")))
    }

    pub fn fields_of(&self, name: &str) -> Result<BTreeMap<String, Rc<Field>>, Error> {
        Ok(self.get(name)?.fields.clone())
    }

    pub fn models(&self) -> impl Iterator<Item = &Rc<Model>> {
        self.models.values()
    }

    #[must_use]
    pub const fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    #[must_use]
    pub fn inbound_refs(&self, model: &str) -> &[InboundRef] {
        self.inbound.get(model).map_or(&[], Vec::as_slice)
    }

    /// One2many fields whose collection is derived from the given
    /// many2one inverse.
    #[must_use]
    pub fn o2m_fields_of_inverse(&self, comodel: &str, field: &str) -> &[(String, String)] {
        self.o2m_by_inverse
            .get(&(comodel.to_string(), field.to_string()))
            .map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn rank(&self, model: &str, field: &str) -> u32 {
        self.ranks
            .get(&(model.to_string(), field.to_string()))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub const fn access(&self) -> &AccessRegistry {
        &self.access
    }

    #[must_use]
    pub fn table(&self, model: &str) -> Option<&TableInfo> {
        self.tables.get(model)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    /// Resolve a field through related aliasing to its concrete endpoint,
    /// returning the model owning the endpoint and the endpoint field.
    pub fn resolve_endpoint(&self, model: &str, field: &str) -> Result<(Rc<Model>, Rc<Field>), Error> {
        let mut model = self.get(model)?;
        let mut field = model.field(field)?.clone();
        let mut guard = 0;
        while let Some(path) = field.related_path().map(ToString::to_string) {
            guard += 1;
            if guard > 16 {
                return Err(Error::registry(format!(
                    "related alias chain too deep at {}.{}",
                    model.name, field.name
                )));
            }
            let segments: Vec<&str> = path.split('.').collect();
            let (last, hops) = segments.split_last().ok_or_else(|| {
                Error::registry(format!("empty related path on {}.{}", model.name, field.name))
            })?;
            let mut cur = model.clone();
            for hop in hops {
                let hop_field = cur.field(hop)?;
                let comodel = hop_field.kind.comodel().ok_or_else(|| {
                    Error::registry(format!(
                        "related path segment '{hop}' on '{}' is not relational",
                        cur.name
                    ))
                })?;
                cur = self.get(comodel)?;
            }
            field = cur.field(last)?.clone();
            model = cur;
        }
        Ok((model, field))
    }
}
