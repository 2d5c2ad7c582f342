//! Backend-agnostic scoped repository abstraction.
//!
//! `store-core` implements the enrichment pipeline, constraint gate,
//! cursor engine, and query stream that every backend adapter plugs into
//! via [`adapter::BackendAdapter`]. It never talks to a database itself —
//! see `store-mongo` and `store-firestore` for the two shipped adapters.

pub mod adapter;
pub mod config;
pub mod constraints;
pub mod cursor;
pub mod enrich;
pub mod error;
pub mod filter;
pub mod mapping;
pub mod repository;
pub mod stream;

#[cfg(test)]
pub mod fake;

/// Common imports for building and using a `Repository`.
pub mod prelude {
    pub use crate::adapter::{BackendAdapter, BatchOutcome, CreateEntry};
    pub use crate::config::{
        IdStrategy, KeyChoice, RepositoryBuilder, ResolvedConfig, Scope, TimestampKeys, Timestamps,
        TraceStrategy, UserConfig, Versioning,
    };
    pub use crate::constraints::ScopeBreachPolicy;
    pub use crate::cursor::{Cursor, SortKey};
    pub use crate::enrich::{TraceContext, WriteDescriptor};
    pub use crate::error::{ConfigProblem, RepoError};
    pub use crate::filter::{combine, Direction, FieldEquals, Filter, Specification, Value};
    pub use crate::mapping::{Document, Entity};
    pub use crate::repository::{CreateManyOptions, Page, Repository, WriteOptions};
    pub use crate::stream::QueryStream;
}
