//! Typed errors for the index engine and the reindex orchestrator.
//!
//! Everything else in the crate uses `anyhow`; these exist where callers
//! branch on the variant (HTTP status mapping, degraded search).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("search index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("search index I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search index at {0} was opened read-only")]
    ReadOnly(String),

    #[error("search index writer is closed")]
    Closed,

    #[error("index at {path} is missing field '{field}'")]
    SchemaMismatch { path: String, field: &'static str },
}

#[derive(Debug, Error)]
pub enum ReindexError {
    #[error("indexing already in progress")]
    AlreadyRunning,

    #[error("reindex failed: {0}")]
    Failed(String),
}
