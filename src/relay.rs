//! Relay facade.
//!
//! [`Relay`] is what the CLI and the HTTP surface talk to. It owns the
//! primary store, the shared [`IndexState`] and the [`Reindexer`], and
//! decides for every filter whether it is answered by the primary store
//! or by the search pipeline:
//!
//! | filter | path |
//! |--------|------|
//! | no search text | primary store |
//! | search text with no terms and no field extension | primary store, search text dropped |
//! | search text, no live index | empty stream (search unsupported) |
//! | otherwise | exact-match pre-pass + ranked search, materialized |
//!
//! Writes are enriched once and land in the primary store first; the
//! index write that follows never fails the request.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use relay_search_core::enrich::enrich;
use relay_search_core::models::{kind_name, Filter, Record};
use relay_search_core::query::{compile, CompileOptions, QueryNode};
use relay_search_core::store::EventStore;

use crate::config::{Config, IndexConfig, SearchConfig};
use crate::error::ReindexError;
use crate::index::{IndexHit, IndexLayout, SearchIndex};
use crate::materialize::RecordStream;
use crate::progress::ReindexProgressReporter;
use crate::reindex::{IndexState, JournalOp, ReindexSettings, ReindexStatus, Reindexer};
use crate::search::{search_stream, SearchSettings};
use crate::sqlite_store::SqliteEventStore;
use crate::{db, migrate};

/// Debug view of how a search string compiles and what the index returns.
#[derive(Debug, Serialize)]
pub struct Inspection {
    pub query: String,
    pub normalized: String,
    pub terms: Vec<String>,
    pub extensions: BTreeMap<String, String>,
    pub degenerate: bool,
    pub compiled: QueryNode,
    pub hits: Vec<IndexHit>,
}

pub struct Relay {
    store: Arc<dyn EventStore>,
    state: Arc<IndexState>,
    reindexer: Arc<Reindexer>,
    index_config: IndexConfig,
    search_config: SearchConfig,
    settings: SearchSettings,
    compile_options: CompileOptions,
    pool: Option<SqlitePool>,
}

impl Relay {
    /// Assembles a relay over an existing store and (optional) live index.
    pub fn new(config: &Config, store: Arc<dyn EventStore>, live: Option<SearchIndex>) -> Self {
        let state = Arc::new(IndexState::new(live));
        let reindexer = Arc::new(Reindexer::new(
            Arc::clone(&state),
            Arc::clone(&store),
            IndexLayout::new(&config.index.root),
            ReindexSettings::from_config(config),
        ));
        Self {
            store,
            state,
            reindexer,
            index_config: config.index.clone(),
            search_config: config.search.clone(),
            settings: SearchSettings::from_config(&config.search),
            compile_options: config.search.compile_options(),
            pool: None,
        }
    }

    /// Opens the SQLite store and the current index generation for writing.
    ///
    /// Stale generations are removed first. An index that cannot be opened
    /// leaves text search disabled; structural queries keep working.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let layout = IndexLayout::new(&config.index.root);
        let heap = config.index.writer_heap_bytes;
        let opened = tokio::task::spawn_blocking(move || {
            match layout.prune_stale() {
                Ok(0) => {}
                Ok(removed) => info!(removed, "removed stale index generations"),
                Err(e) => warn!(error = %e, "failed to prune stale index generations"),
            }
            layout.open_or_create(heap)
        })
        .await
        .context("index open task failed")?;

        let live = match opened {
            Ok(index) => {
                info!(path = %index.path().display(), docs = index.num_docs(), "search index ready");
                Some(index)
            }
            Err(e) => {
                warn!(error = %e, "search index unavailable, text search disabled");
                None
            }
        };

        let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(pool.clone()));
        let mut relay = Self::new(config, store, live);
        relay.pool = Some(pool);
        Ok(relay)
    }

    /// Opens the store and the current generation without an index writer.
    pub async fn open_read_only(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let layout = IndexLayout::new(&config.index.root);
        let opened = tokio::task::spawn_blocking(move || layout.open_current_read_only())
            .await
            .context("index open task failed")?;
        let live = match opened {
            Ok(Some(index)) => Some(index),
            Ok(None) => {
                warn!("no search index generation found, text search disabled");
                None
            }
            Err(e) => {
                warn!(error = %e, "search index unavailable, text search disabled");
                None
            }
        };

        let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(pool.clone()));
        let mut relay = Self::new(config, store, live);
        relay.pool = Some(pool);
        Ok(relay)
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn live_index(&self) -> Option<Arc<SearchIndex>> {
        self.state.live()
    }

    pub fn indexing_status(&self) -> ReindexStatus {
        self.state.status()
    }

    /// Answers `filter` as a stream of records.
    pub async fn query(&self, filter: &Filter) -> Result<RecordStream> {
        info!(filter = %filter.summary(), "query");
        let Some(text) = filter.search_text() else {
            let records = self.store.query_by_filter(filter).await?;
            return Ok(RecordStream::from_records(records));
        };

        let compiled = compile(text, filter, &self.compile_options);
        if compiled.is_degenerate() && !compiled.has_field_extensions() {
            debug!(search = text, "degenerate search, answering from primary store");
            let records = self.store.query_by_filter(&filter.without_search()).await?;
            return Ok(RecordStream::from_records(records));
        }

        let Some(index) = self.state.live() else {
            warn!(search = text, "search requested but no index is available");
            return Ok(RecordStream::empty());
        };

        let scoped = filter
            .clone()
            .with_default_kinds(&self.search_config.default_kinds);
        let compiled = compile(text, &scoped, &self.compile_options);
        let limit = self.search_config.effective_limit(filter.limit);
        debug!(terms = ?compiled.terms, limit, "running search pipeline");
        Ok(search_stream(
            index,
            Arc::clone(&self.store),
            compiled,
            limit,
            &self.settings,
        ))
    }

    /// Enriches and stores `record`, then indexes it. Returns `false` for a
    /// duplicate id.
    pub async fn save_event(&self, record: Record) -> Result<bool> {
        let record = enrich(record);
        let saved = self
            .store
            .save(&record)
            .await
            .with_context(|| format!("saving record {}", record.id))?;
        if !saved {
            debug!(id = %record.id, "duplicate record ignored");
            return Ok(false);
        }
        debug!(id = %record.id, kind = kind_name(record.kind), "saved record");

        if !self.index_config.indexes_kind(record.kind) {
            return Ok(true);
        }
        let Some(index) = self.state.route_write(JournalOp::Upsert(record.id.clone())) else {
            return Ok(true);
        };
        let id = record.id.clone();
        let indexed = tokio::task::spawn_blocking(move || {
            index.upsert(&record)?;
            index.commit()
        })
        .await;
        match indexed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(id = %id, error = %e, "failed to index record"),
            Err(e) => warn!(id = %id, error = %e, "index task failed"),
        }
        Ok(true)
    }

    /// Deletes `id` from the primary store and the index.
    pub async fn delete_event(&self, id: &str) -> Result<bool> {
        let deleted = self
            .store
            .delete(id)
            .await
            .with_context(|| format!("deleting record {id}"))?;

        if let Some(index) = self.state.route_write(JournalOp::Delete(id.to_string())) {
            let owned = id.to_string();
            let result = tokio::task::spawn_blocking(move || {
                index.delete(&owned)?;
                index.commit()
            })
            .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(id, error = %e, "failed to remove record from index"),
                Err(e) => warn!(id, error = %e, "index task failed"),
            }
        }
        Ok(deleted)
    }

    /// Starts a background rebuild.
    pub fn start_reindex(&self) -> Result<(), ReindexError> {
        self.reindexer.start()
    }

    /// Runs a rebuild on the current task.
    pub async fn rebuild_index(
        &self,
        reporter: &dyn ReindexProgressReporter,
    ) -> Result<ReindexStatus, ReindexError> {
        self.reindexer.rebuild(reporter).await
    }

    /// Compiles `text` the way a search would and returns raw index hits.
    pub async fn inspect(&self, text: &str, limit: usize) -> Result<Inspection> {
        let filter = Filter::new().with_default_kinds(&self.search_config.default_kinds);
        let compiled = compile(text, &filter, &self.compile_options);
        let limit = self.search_config.effective_limit(Some(limit));
        let hits = match self.state.live() {
            Some(index) => {
                let root = compiled.root.clone();
                let order = self.settings.order;
                tokio::task::spawn_blocking(move || index.search(&root, limit, order))
                    .await
                    .context("inspect task failed")??
            }
            None => Vec::new(),
        };
        Ok(Inspection {
            query: text.to_string(),
            degenerate: compiled.is_degenerate(),
            normalized: compiled.normalized,
            terms: compiled.terms,
            extensions: compiled.extensions,
            compiled: compiled.root,
            hits,
        })
    }

    /// Releases the index writer and the database pool.
    pub async fn close(&self) {
        if let Some(index) = self.state.live() {
            match tokio::task::spawn_blocking(move || index.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "failed to close index writer"),
                Err(e) => warn!(error = %e, "index close task failed"),
            }
        }
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
