//! Primary store abstraction.
//!
//! The [`EventStore`] trait is the contract the search overlay relies on
//! from the authoritative record store: keyed writes, lookups by id and by
//! filter, counting, and creation-ordered paging for rebuilds.
//!
//! Implementations must be `Send + Sync` and must tolerate reads
//! concurrent with writes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Filter, Record};

/// Authoritative record storage.
///
/// # Operations
///
/// | Method | Used by |
/// |--------|---------|
/// | `ping` | Reindex connect phase |
/// | `save` / `delete` | Write path |
/// | `query_by_ids` | Result materialization |
/// | `query_by_filter` | Structural (non-search) queries |
/// | `count_by_filter` | Reindex count phase |
/// | `page_by_created_at` | Reindex batches |
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Verifies the store is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Stores a record. Returns `false` when a record with the same id
    /// already exists (records are immutable).
    async fn save(&self, record: &Record) -> Result<bool>;

    /// Removes a record by id. Returns whether anything was deleted.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Records with the given ids, in no particular order. Missing ids are skipped.
    async fn query_by_ids(&self, ids: &[String]) -> Result<Vec<Record>>;

    /// Records matching the structural predicates, newest first, honoring `limit`.
    async fn query_by_filter(&self, filter: &Filter) -> Result<Vec<Record>>;

    /// Number of records matching the structural predicates (ignores `limit`).
    async fn count_by_filter(&self, filter: &Filter) -> Result<u64>;

    /// One page of matching records ordered by `created_at` ascending, then
    /// id, starting strictly after `after`. Keyset paging keeps the walk
    /// stable while records are deleted or inserted behind the cursor.
    async fn page_by_created_at(
        &self,
        filter: &Filter,
        limit: usize,
        after: Option<&PageCursor>,
    ) -> Result<Vec<Record>>;
}

/// Position of the last record returned by
/// [`EventStore::page_by_created_at`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageCursor {
    pub created_at: i64,
    pub id: String,
}

impl PageCursor {
    pub fn of(record: &Record) -> Self {
        Self {
            created_at: record.created_at,
            id: record.id.clone(),
        }
    }

    /// True when `record` sorts after this cursor.
    pub fn precedes(&self, record: &Record) -> bool {
        (record.created_at, record.id.as_str()) > (self.created_at, self.id.as_str())
    }
}
