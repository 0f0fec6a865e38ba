//! LoamDB — a declarative entity runtime with dependency-driven
//! recomputation for business records.
//!
//! ## Crate layout
//! - `core`: values, schema declarations, the registry, environments,
//!   record-sets, the field engine, queries, SQL lowering, and stores.
//! - `fixtures` (dev-only): the demo business schema used by the suites.
//!
//! The `prelude` mirrors the runtime surface add-on code uses.

pub use loamdb_core as core;

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use loamdb_core::{domain, vals};

///
/// Prelude
///

pub mod prelude {
    pub use crate::core::prelude::*;
}
