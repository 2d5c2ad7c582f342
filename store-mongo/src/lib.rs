//! Backend-D adapter: implements `store_core::adapter::BackendAdapter` on
//! top of the [`mongodb`] driver.
//!
//! Document identity is a plain `String` stored in Mongo's `_id` field; the
//! repository's own `id_key` attribute is a separate, visible field
//! synthesized on read (`store_core::mapping::synthesize_id`) and never
//! stored back into the document. See [`adapter::MongoAdapter`] for the
//! create/upsert design and [`connect::MongoConnectOptions`] for how to
//! acquire a collection handle — connection acquisition is always the
//! caller's responsibility (spec.md §5).

pub mod adapter;
pub mod connect;
pub mod error;
pub mod query;
pub mod write;

pub use adapter::MongoAdapter;
pub use connect::MongoConnectOptions;
pub use error::MongoErrorExt;
