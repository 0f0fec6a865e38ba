//! Query surface: the domain filter language (list form parsed once into a
//! typed AST), order specs, and the evaluator shared by `search` and
//! `filtered_domain`.

pub mod domain;
pub mod eval;
pub mod order;

#[cfg(test)]
mod tests;

pub use domain::{Domain, DomainExpr, DomainItem, DomainLeaf, DomainOp};
pub use order::{OrderTerm, parse_order};
