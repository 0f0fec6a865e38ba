use crate::value::Value;
use std::collections::BTreeMap;

/// Write payload for one record: field name to user value.
pub type Vals = BTreeMap<String, Value>;

///
/// RelCommand
///
/// Command list accepted when writing a one2many/many2many field.
/// Applied in order by the write pipeline.
///

#[derive(Clone, Debug, PartialEq)]
pub enum RelCommand {
    /// Create a target record and link it.
    Create(Vals),
    /// Write values on an already-linked target record.
    Update(i64, Vals),
    /// Link an existing target record.
    Link(i64),
    /// Remove the link; one2many targets are deleted, many2many links are
    /// just severed.
    Unlink(i64),
    /// Remove every link.
    Clear,
    /// Replace all links with the given target ids.
    Set(Vec<i64>),
}

impl RelCommand {
    /// Coerce a raw relational write into a command list.
    ///
    /// An `IdList`/`List` value is shorthand for `Set`, matching the
    /// common "assign the whole collection" write.
    pub fn coerce(value: &Value) -> Option<Vec<Self>> {
        match value {
            Value::Commands(cmds) => Some(cmds.clone()),
            Value::IdList(_) | Value::List(_) | Value::Id(_) => {
                Some(vec![Self::Set(value.id_list())])
            }
            Value::Null => Some(vec![Self::Clear]),
            _ => None,
        }
    }
}
