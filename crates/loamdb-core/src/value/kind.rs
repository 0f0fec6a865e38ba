use crate::{sanitize::sanitize_html, value::Value};
use chrono::{NaiveDate, NaiveDateTime};

///
/// FieldKind
///
/// The value kind of a field. Each kind owns the conversion contract
/// between user form, cache/storage form, and query-parameter form.
///

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Boolean,
    Integer,
    Float {
        /// Decimal precision applied on write; `None` keeps full precision.
        digits: Option<u32>,
    },
    Monetary {
        /// Sibling many2one field naming the currency of the amount.
        currency_field: String,
    },
    Char {
        size: Option<usize>,
    },
    Text,
    /// Sanitized on write.
    Html,
    Date,
    Datetime,
    Binary,
    /// Closed set of labeled keys; options live on the field.
    Selection,
    /// Free model+id pair.
    Reference,
    Many2one {
        comodel: String,
    },
    One2many {
        comodel: String,
        /// Many2one field on the comodel pointing back here.
        inverse: String,
    },
    Many2many {
        comodel: String,
        /// Link table name.
        relation: String,
    },
}

impl FieldKind {
    #[must_use]
    pub const fn is_relational(&self) -> bool {
        matches!(
            self,
            Self::Many2one { .. } | Self::One2many { .. } | Self::Many2many { .. }
        )
    }

    #[must_use]
    pub const fn is_x2many(&self) -> bool {
        matches!(self, Self::One2many { .. } | Self::Many2many { .. })
    }

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Integer | Self::Float { .. } | Self::Monetary { .. }
        )
    }

    /// Whether the kind maps to a column on the entity's own table.
    #[must_use]
    pub const fn has_column(&self) -> bool {
        !matches!(self, Self::One2many { .. } | Self::Many2many { .. })
    }

    #[must_use]
    pub fn comodel(&self) -> Option<&str> {
        match self {
            Self::Many2one { comodel }
            | Self::One2many { comodel, .. }
            | Self::Many2many { comodel, .. } => Some(comodel),
            _ => None,
        }
    }

    /// Coerce a user-supplied value into cache/storage form.
    ///
    /// Returns a kind-level message on rejection; the field engine wraps it
    /// with the field name. Selection key membership and relational command
    /// handling are field-level concerns and are checked there.
    pub fn normalize(&self, value: Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            Self::Boolean => match value {
                Value::Bool(_) => Ok(value),
                Value::Int(i) => Ok(Value::Bool(i != 0)),
                other => Err(format!("expected boolean, got {other:?}")),
            },
            Self::Integer => match value {
                Value::Int(_) => Ok(value),
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                #[allow(clippy::cast_possible_truncation)]
                Value::Float(f) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
                other => Err(format!("expected integer, got {other:?}")),
            },
            Self::Float { digits } => {
                let raw = value
                    .as_f64()
                    .ok_or_else(|| format!("expected float, got {value:?}"))?;
                Ok(Value::Float(round_to(raw, *digits)))
            }
            Self::Monetary { .. } => {
                let raw = value
                    .as_f64()
                    .ok_or_else(|| format!("expected monetary amount, got {value:?}"))?;
                Ok(Value::Float(raw))
            }
            Self::Char { size } => match value {
                Value::Str(s) => {
                    if let Some(max) = size
                        && s.chars().count() > *max
                    {
                        return Err(format!("value exceeds maximum length {max}"));
                    }
                    Ok(Value::Str(s))
                }
                other => Err(format!("expected string, got {other:?}")),
            },
            Self::Text | Self::Selection => match value {
                Value::Str(_) => Ok(value),
                other => Err(format!("expected string, got {other:?}")),
            },
            Self::Html => match value {
                Value::Str(s) => Ok(Value::Str(sanitize_html(&s))),
                other => Err(format!("expected html string, got {other:?}")),
            },
            Self::Date => match value {
                Value::Date(_) => Ok(value),
                Value::Str(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|_| format!("invalid date '{s}'")),
                other => Err(format!("expected date, got {other:?}")),
            },
            Self::Datetime => match value {
                Value::DateTime(_) => Ok(value),
                Value::Date(d) => Ok(Value::DateTime(d.and_hms_opt(0, 0, 0).unwrap_or_default())),
                Value::Str(s) => NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .map(Value::DateTime)
                    .map_err(|_| format!("invalid datetime '{s}'")),
                other => Err(format!("expected datetime, got {other:?}")),
            },
            Self::Binary => match value {
                Value::Binary(_) => Ok(value),
                other => Err(format!("expected binary, got {other:?}")),
            },
            Self::Reference => match value {
                Value::Ref { .. } => Ok(value),
                other => Err(format!("expected model,id reference, got {other:?}")),
            },
            Self::Many2one { .. } => match value {
                Value::Id(_) => Ok(value),
                Value::Int(id) => Ok(Value::Id(id)),
                other => Err(format!("expected record id, got {other:?}")),
            },
            Self::One2many { .. } | Self::Many2many { .. } => match value {
                Value::IdList(mut ids) => {
                    dedup_preserving(&mut ids);
                    Ok(Value::IdList(ids))
                }
                Value::Commands(_) | Value::Id(_) | Value::List(_) => Ok(value),
                other => Err(format!("expected id list or command list, got {other:?}")),
            },
        }
    }

    /// Query-parameter form. Dates become their canonical string so the
    /// lowered statement can bind them as text parameters.
    #[must_use]
    pub fn to_param(&self, value: &Value) -> Value {
        match value {
            Value::Date(d) => Value::Str(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => Value::Str(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            other => other.clone(),
        }
    }
}

fn round_to(raw: f64, digits: Option<u32>) -> f64 {
    match digits {
        Some(d) => {
            let factor = 10f64.powi(d.min(12) as i32);
            (raw * factor).round() / factor
        }
        None => raw,
    }
}

fn dedup_preserving(ids: &mut Vec<i64>) {
    let mut seen = std::collections::BTreeSet::new();
    ids.retain(|id| seen.insert(*id));
}
