//! Declaration layer: entities and fields are declared as data through
//! builders, hooks are registered explicitly by name. The registry compiles
//! declarations into effective models.

mod entity;
mod field;
mod hooks;

#[cfg(test)]
mod tests;

pub use entity::EntityDef;
pub use field::{FieldDef, FieldDefault, FieldStorage, OnDelete};
pub use hooks::{Constraint, DefaultFn, HookFn, Onchange, SelectionExpander};
