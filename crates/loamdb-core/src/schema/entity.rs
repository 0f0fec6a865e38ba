use crate::{
    db::env::Env,
    db::recordset::RecordSet,
    error::Error,
    schema::{
        field::FieldDef,
        hooks::{Constraint, HookFn, Onchange},
    },
};
use std::{collections::BTreeMap, fmt, rc::Rc};

///
/// EntityDef
///
/// One entity declaration. Several declarations may target the same name
/// ("inheritance-by-name"); the registry merges them into one effective
/// model, later declarations extending earlier ones.
///

#[derive(Clone)]
pub struct EntityDef {
    pub name: String,
    /// Extension of an already-declared name; must not introduce the name.
    pub extend: bool,
    /// Default search order, e.g. `"date_order desc, id"`.
    pub order: Option<String>,
    /// Field used by `child_of`/`parent_of`; defaults to `parent_id`.
    pub parent_field: Option<String>,
    /// Delegated inheritance: `(parent entity, required reference field)`.
    pub inherits: Vec<(String, String)>,
    pub fields: Vec<FieldDef>,
    /// Named multi-column uniqueness constraints.
    pub uniques: Vec<(String, Vec<String>)>,

    pub computes: BTreeMap<String, HookFn>,
    pub inverses: BTreeMap<String, HookFn>,
    pub constrains: Vec<Constraint>,
    pub onchanges: Vec<Onchange>,
    pub ondelete_hooks: Vec<HookFn>,
    /// Batched create hooks, invoked once per created batch.
    pub create_hooks: Vec<HookFn>,
}

impl fmt::Debug for EntityDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDef")
            .field("name", &self.name)
            .field("extend", &self.extend)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl EntityDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            extend: false,
            order: None,
            parent_field: None,
            inherits: Vec::new(),
            fields: Vec::new(),
            uniques: Vec::new(),
            computes: BTreeMap::new(),
            inverses: BTreeMap::new(),
            constrains: Vec::new(),
            onchanges: Vec::new(),
            ondelete_hooks: Vec::new(),
            create_hooks: Vec::new(),
        }
    }

    /// Declare an extension of an existing entity name.
    pub fn extend(name: &str) -> Self {
        let mut def = Self::new(name);
        def.extend = true;
        def
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn order(mut self, order: &str) -> Self {
        self.order = Some(order.to_string());
        self
    }

    pub fn parent_field(mut self, field: &str) -> Self {
        self.parent_field = Some(field.to_string());
        self
    }

    /// Delegated inheritance: the parent's fields appear transparently on
    /// this entity, backed by the given required reference field.
    pub fn inherits(mut self, parent: &str, via: &str) -> Self {
        self.inherits.push((parent.to_string(), via.to_string()));
        self
    }

    pub fn unique(mut self, name: &str, fields: &[&str]) -> Self {
        self.uniques.push((
            name.to_string(),
            fields.iter().map(ToString::to_string).collect(),
        ));
        self
    }

    ///
    /// HOOK REGISTRATION
    ///

    pub fn compute_fn(
        mut self,
        name: &str,
        f: impl Fn(&RecordSet) -> Result<(), Error> + 'static,
    ) -> Self {
        self.computes.insert(name.to_string(), Rc::new(f));
        self
    }

    pub fn inverse_fn(
        mut self,
        name: &str,
        f: impl Fn(&RecordSet) -> Result<(), Error> + 'static,
    ) -> Self {
        self.inverses.insert(name.to_string(), Rc::new(f));
        self
    }

    /// Validation run at flush for records whose listed fields changed.
    pub fn constrains(
        mut self,
        fields: &[&str],
        f: impl Fn(&RecordSet) -> Result<(), Error> + 'static,
    ) -> Self {
        self.constrains.push(Constraint {
            fields: fields.iter().map(ToString::to_string).collect(),
            check: Rc::new(f),
        });
        self
    }

    /// In-memory propagation run on form edits before any write.
    pub fn onchange(
        mut self,
        fields: &[&str],
        f: impl Fn(&RecordSet) -> Result<(), Error> + 'static,
    ) -> Self {
        self.onchanges.push(Onchange {
            fields: fields.iter().map(ToString::to_string).collect(),
            apply: Rc::new(f),
        });
        self
    }

    /// Validation run at unlink time, before rows are removed.
    pub fn ondelete(mut self, f: impl Fn(&RecordSet) -> Result<(), Error> + 'static) -> Self {
        self.ondelete_hooks.push(Rc::new(f));
        self
    }

    /// Invoked once per created batch, after rows exist.
    pub fn on_create(mut self, f: impl Fn(&RecordSet) -> Result<(), Error> + 'static) -> Self {
        self.create_hooks.push(Rc::new(f));
        self
    }

    /// Convenience: register a default through a closure over the
    /// environment on the named field.
    pub fn default_for(mut self, field: &str, f: impl Fn(&Env) -> crate::value::Value + 'static) -> Self {
        if let Some(def) = self.fields.iter_mut().find(|d| d.name == field) {
            def.default = Some(crate::schema::field::FieldDefault::Fn(Rc::new(f)));
        }
        self
    }
}
