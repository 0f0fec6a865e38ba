//! Lowering of typed query plans to PostgreSQL text, schema DDL from the
//! registry, and index-health tooling. This is the surface an external
//! relational backend executes; the in-memory store interprets the same
//! plans directly.

pub mod ddl;
pub mod health;
pub mod render;

#[cfg(test)]
mod tests;

pub use render::{SqlStatement, group_sql, select_sql};
