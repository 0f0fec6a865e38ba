//! Core runtime for LoamDB: the declarative entity registry, value types,
//! environments, record-sets, the dependency-driven recomputation engine,
//! and the query/persistence surface.

#[macro_use]
pub mod macros;

pub mod config;
pub mod db;
pub mod error;
pub mod obs;
pub mod registry;
pub mod sanitize;
pub mod schema;
pub mod value;

///
/// Prelude
///
/// Domain vocabulary only: declarations, the runtime handles, and values.
/// Errors, stores, and internals stay one module level down.
///

pub mod prelude {
    pub use crate::{
        config::{DbConfig, Granularity},
        db::{
            database::Database,
            env::Env,
            query::Domain,
            recordset::{Mapped, RecordSet},
        },
        error::Error,
        registry::RegistryBuilder,
        schema::{EntityDef, FieldDef, OnDelete},
        value::{RelCommand, Vals, Value},
    };
}
