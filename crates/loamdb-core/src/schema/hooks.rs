use crate::{db::env::Env, db::recordset::RecordSet, error::Error, value::Value};
use std::rc::Rc;

/// Entity-level hook: computes, inverses, constrains, ondelete, and create
/// hooks all share this shape and receive the affected record-set.
pub type HookFn = Rc<dyn Fn(&RecordSet) -> Result<(), Error>>;

/// Default evaluated in the environment at create time.
pub type DefaultFn = Rc<dyn Fn(&Env) -> Value>;

/// Contributes additional selection keys at read time; declared order is
/// preserved and contributed keys follow it.
pub type SelectionExpander = Rc<dyn Fn(&Env) -> Vec<(String, String)>>;

///
/// Constraint
///
/// Validation hook run at flush for records whose listed fields changed.
///

#[derive(Clone)]
pub struct Constraint {
    pub fields: Vec<String>,
    pub check: HookFn,
}

///
/// Onchange
///
/// Pure in-memory hook run on form edits to propagate tentative values
/// before any write.
///

#[derive(Clone)]
pub struct Onchange {
    pub fields: Vec<String>,
    pub apply: HookFn,
}
