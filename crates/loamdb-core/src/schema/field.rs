use crate::{
    schema::hooks::{DefaultFn, SelectionExpander},
    value::{FieldKind, Value},
};
use std::fmt;

///
/// FieldStorage
///

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldStorage {
    /// Column on the entity's own row.
    Stored,
    /// Computed by the named hook; `store` persists the result and keeps it
    /// consistent through dependency-driven recomputation.
    Computed {
        compute: String,
        store: bool,
        depends: Vec<String>,
    },
    /// Alias of a dotted path of many2one hops ending on another field.
    Related { path: String },
}

///
/// OnDelete
///
/// Behavior on inbound many2one references when the target is unlinked.
///

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OnDelete {
    #[default]
    SetNull,
    Restrict,
    Cascade,
}

///
/// FieldDefault
///

#[derive(Clone)]
pub enum FieldDefault {
    Value(Value),
    Fn(DefaultFn),
}

///
/// FieldDef
///
/// One field declaration: kind plus per-kind options. Consumed by the
/// registry; never used directly at runtime.
///

#[derive(Clone)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub storage: FieldStorage,
    /// Inverse hook name letting a computed field be written.
    pub inverse: Option<String>,
    pub required: bool,
    pub readonly: bool,
    pub default: Option<FieldDefault>,
    /// Ordered `(key, label)` options for selection fields.
    pub selection: Vec<(String, String)>,
    pub expand: Option<SelectionExpander>,
    pub ondelete: OnDelete,
    pub tracked: bool,
    pub translate: bool,
    pub index: bool,
    pub unique: bool,
    /// Role names required to read/write the field; empty means everyone.
    pub groups: Vec<String>,
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl FieldDef {
    fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            storage: FieldStorage::Stored,
            inverse: None,
            required: false,
            readonly: false,
            default: None,
            selection: Vec::new(),
            expand: None,
            ondelete: OnDelete::default(),
            tracked: false,
            translate: false,
            index: false,
            unique: false,
            groups: Vec::new(),
        }
    }

    ///
    /// KIND CONSTRUCTORS
    ///

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldKind::Float { digits: None })
    }

    pub fn monetary(name: &str, currency_field: &str) -> Self {
        Self::new(
            name,
            FieldKind::Monetary {
                currency_field: currency_field.to_string(),
            },
        )
    }

    pub fn char(name: &str) -> Self {
        Self::new(name, FieldKind::Char { size: None })
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn html(name: &str) -> Self {
        Self::new(name, FieldKind::Html)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn datetime(name: &str) -> Self {
        Self::new(name, FieldKind::Datetime)
    }

    pub fn binary(name: &str) -> Self {
        Self::new(name, FieldKind::Binary)
    }

    pub fn selection<K, L>(name: &str, options: impl IntoIterator<Item = (K, L)>) -> Self
    where
        K: Into<String>,
        L: Into<String>,
    {
        let mut def = Self::new(name, FieldKind::Selection);
        def.selection = options
            .into_iter()
            .map(|(k, l)| (k.into(), l.into()))
            .collect();
        def
    }

    pub fn reference(name: &str) -> Self {
        Self::new(name, FieldKind::Reference)
    }

    pub fn many2one(name: &str, comodel: &str) -> Self {
        Self::new(
            name,
            FieldKind::Many2one {
                comodel: comodel.to_string(),
            },
        )
    }

    pub fn one2many(name: &str, comodel: &str, inverse: &str) -> Self {
        Self::new(
            name,
            FieldKind::One2many {
                comodel: comodel.to_string(),
                inverse: inverse.to_string(),
            },
        )
    }

    pub fn many2many(name: &str, comodel: &str, relation: &str) -> Self {
        Self::new(
            name,
            FieldKind::Many2many {
                comodel: comodel.to_string(),
                relation: relation.to_string(),
            },
        )
    }

    ///
    /// OPTIONS
    ///

    pub fn size(mut self, max: usize) -> Self {
        if let FieldKind::Char { size } = &mut self.kind {
            *size = Some(max);
        }
        self
    }

    pub fn digits(mut self, digits: u32) -> Self {
        if let FieldKind::Float { digits: d } = &mut self.kind {
            *d = Some(digits);
        }
        self
    }

    /// Make the field computed by the named hook with the given dependency
    /// paths. Virtual unless `.stored()` follows.
    pub fn compute(mut self, hook: &str, depends: &[&str]) -> Self {
        self.storage = FieldStorage::Computed {
            compute: hook.to_string(),
            store: false,
            depends: depends.iter().map(ToString::to_string).collect(),
        };
        self
    }

    /// Persist a computed field; it is invalidated and recomputed when a
    /// dependency changes.
    pub fn stored(mut self) -> Self {
        if let FieldStorage::Computed { store, .. } = &mut self.storage {
            *store = true;
        }
        self
    }

    /// Alias a dotted path of many2one hops; reads follow the path, writes
    /// write through to the final segment.
    pub fn related(mut self, path: &str) -> Self {
        self.storage = FieldStorage::Related {
            path: path.to_string(),
        };
        self
    }

    /// Register the named inverse hook, letting the computed field be
    /// written.
    pub fn inverse(mut self, hook: &str) -> Self {
        self.inverse = Some(hook.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(FieldDefault::Value(value.into()));
        self
    }

    pub fn default_fn(mut self, f: DefaultFn) -> Self {
        self.default = Some(FieldDefault::Fn(f));
        self
    }

    /// Selection group-expander: contributes additional keys at read time
    /// while preserving declared order.
    pub fn expand_with(mut self, expander: SelectionExpander) -> Self {
        self.expand = Some(expander);
        self
    }

    pub fn ondelete(mut self, rule: OnDelete) -> Self {
        self.ondelete = rule;
        self
    }

    pub fn tracked(mut self) -> Self {
        self.tracked = true;
        self
    }

    pub fn translate(mut self) -> Self {
        self.translate = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(ToString::to_string).collect();
        self
    }
}
