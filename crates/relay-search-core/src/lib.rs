//! # Relay Search Core
//!
//! Pure logic shared by the relay search overlay: record and filter
//! models, the enrichment pipeline, the index document projection, the
//! query compiler and the event store abstraction.
//!
//! Nothing in this crate touches tokio, sqlx, tantivy or the filesystem.
//! The engine-specific parts (SQLite primary store, tantivy index,
//! streaming and reindexing) live in the `relay-search` crate and consume
//! the types defined here.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | `Record`, `Tag`, `Filter` |
//! | [`enrich`] | Derives searchable tags before a record is stored |
//! | [`document`] | Projects a record into index fields |
//! | [`query`] | Sanitizes search text and builds a [`query::QueryNode`] tree |
//! | [`prioritize`] | Name predicate used by the exact-match pre-pass |
//! | [`store`] | [`store::EventStore`] trait and an in-memory backend |

pub mod document;
pub mod enrich;
pub mod models;
pub mod prioritize;
pub mod query;
pub mod store;
