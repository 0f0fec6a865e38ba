pub mod command;
mod kind;

#[cfg(test)]
mod tests;

pub use command::{RelCommand, Vals};
pub use kind::FieldKind;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::cmp::Ordering;

///
/// Value
///
/// Runtime value in storage/cache form.
///
/// Null    → the field's value is absent (SQL NULL).
/// Id      → many2one cache form; the companion record-set is rebuilt lazily.
/// IdList  → x2many cache form; ordered, deduplicated.
/// List    → generic ordered list (`in` right-hand sides, `array_agg`).
/// Commands → x2many write form; only ever seen by the write pipeline.
///

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    /// Naive UTC; the environment timezone only matters for bucketing.
    DateTime(NaiveDateTime),
    Binary(Vec<u8>),
    /// `model,id` pair for reference fields.
    Ref { model: String, id: i64 },
    Id(i64),
    IdList(Vec<i64>),
    List(Vec<Self>),
    #[serde(skip)]
    Commands(Vec<RelCommand>),
}

impl Value {
    ///
    /// ACCESSORS
    ///

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Falsy mirrors the "no value" bucket semantics of group-by: null,
    /// false, zero, the empty string, and empty collections.
    #[must_use]
    pub fn is_falsy(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(b) => !b,
            Self::Int(i) => *i == 0,
            Self::Float(f) => *f == 0.0,
            Self::Str(s) => s.is_empty(),
            Self::Binary(b) => b.is_empty(),
            Self::IdList(ids) => ids.is_empty(),
            Self::List(items) => items.is_empty(),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) | Self::Id(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_id(&self) -> Option<i64> {
        match self {
            Self::Id(id) | Self::Int(id) => Some(*id),
            Self::Ref { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Ids carried by the value, whatever the relational shape.
    #[must_use]
    pub fn id_list(&self) -> Vec<i64> {
        match self {
            Self::Id(id) => vec![*id],
            Self::IdList(ids) => ids.clone(),
            Self::List(items) => items.iter().filter_map(Self::as_id).collect(),
            Self::Int(id) => vec![*id],
            _ => Vec::new(),
        }
    }

    ///
    /// COMPARISON
    ///

    /// Kind-tolerant ordering used by sorts and range operators.
    /// Values of incomparable shapes return `None`.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            // Null sorts first, like NULLS FIRST ascending.
            (Self::Null, _) => Some(Ordering::Less),
            (_, Self::Null) => Some(Ordering::Greater),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (Self::Binary(a), Self::Binary(b)) => Some(a.cmp(b)),
            (Self::Id(a) | Self::Int(a), Self::Id(b) | Self::Int(b)) => Some(a.cmp(b)),
            (Self::IdList(a), Self::IdList(b)) => Some(a.cmp(b)),
            (a, b) => {
                let (x, y) = (a.as_f64()?, b.as_f64()?);
                x.partial_cmp(&y)
            }
        }
    }

    /// Change detection for tracking and "has this changed" checks.
    /// Numeric values compare across Int/Float; everything else is strict.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// User-facing rendering, used by tracking diffs and error messages.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => s.clone(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Self::Binary(b) => format!("<{} bytes>", b.len()),
            Self::Ref { model, id } => format!("{model},{id}"),
            Self::Id(id) => id.to_string(),
            Self::IdList(ids) => format!("{ids:?}"),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(Self::display).collect();
                format!("[{}]", parts.join(", "))
            }
            Self::Commands(cmds) => format!("<{} commands>", cmds.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Self::List(v.into_iter().map(Self::Int).collect())
    }
}

impl From<Vec<RelCommand>> for Value {
    fn from(v: Vec<RelCommand>) -> Self {
        Self::Commands(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
