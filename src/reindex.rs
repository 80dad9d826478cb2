//! Reindex orchestrator.
//!
//! Rebuilds the whole text index from the primary store into a fresh
//! generation directory and swaps it in as the live index.
//!
//! # State machine
//!
//! ```text
//!           start()                 ping ok        count ok
//!   Idle ──────────▶ Connecting ──────────▶ Counting ──────────▶ Indexing
//!    ▲                   │                     │                    │
//!    │                   └──────────┬──────────┴────────────────────┤
//!    │                              ▼                               ▼
//!    └──── next start() ────── Failed                          Completed
//! ```
//!
//! Only one job runs at a time: [`Reindexer::start`] returns
//! [`ReindexError::AlreadyRunning`] while a job is in a running phase and
//! leaves its state untouched. Completed and Failed stay visible to
//! pollers until the next admitted start.
//!
//! # Shared state
//!
//! [`IndexState`] holds the job status, the live index handle and the
//! write journal behind a single mutex that is never held across I/O.
//! While a rebuild runs, every index write routed through
//! [`IndexState::route_write`] is also journaled; the journal is replayed
//! into the new generation before and right after the swap so writes that
//! raced with paging are not lost.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use relay_search_core::enrich::enrich;
use relay_search_core::models::{Filter, Record};
use relay_search_core::store::{EventStore, PageCursor};

use crate::config::Config;
use crate::error::{IndexError, ReindexError};
use crate::index::{IndexLayout, SearchIndex};
use crate::progress::{percent, NoProgress, ReindexProgressEvent, ReindexProgressReporter};

/// Journal drain rounds before the swap; the remainder is applied after it.
const JOURNAL_ROUNDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexPhase {
    Idle,
    Connecting,
    Counting,
    Indexing,
    Completed,
    Failed,
}

impl ReindexPhase {
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ReindexPhase::Connecting | ReindexPhase::Counting | ReindexPhase::Indexing
        )
    }
}

/// Snapshot of the job, as reported to pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReindexStatus {
    pub phase: ReindexPhase,
    pub is_indexing: bool,
    pub processed: u64,
    pub total: u64,
    pub percent: f64,
    pub error: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    /// Generation being built, or last built.
    pub generation: Option<String>,
    /// Generation currently serving searches.
    pub live_generation: Option<String>,
}

/// An index write recorded while a rebuild is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOp {
    Upsert(String),
    Delete(String),
}

#[derive(Debug, Clone)]
struct Job {
    phase: ReindexPhase,
    processed: u64,
    total: u64,
    error: Option<String>,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    generation: Option<String>,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            phase: ReindexPhase::Idle,
            processed: 0,
            total: 0,
            error: None,
            started_at: None,
            finished_at: None,
            generation: None,
        }
    }
}

struct Inner {
    job: Job,
    live: Option<Arc<SearchIndex>>,
    journal: Option<Vec<JournalOp>>,
}

/// Job status, live index holder and write journal under one lock.
pub struct IndexState {
    inner: Mutex<Inner>,
}

fn generation_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl IndexState {
    pub fn new(live: Option<SearchIndex>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                job: Job::default(),
                live: live.map(Arc::new),
                journal: None,
            }),
        }
    }

    /// The live index handle. Callers keep it for the duration of their
    /// query even if a swap happens meanwhile.
    pub fn live(&self) -> Option<Arc<SearchIndex>> {
        self.inner.lock().live.clone()
    }

    pub fn status(&self) -> ReindexStatus {
        let inner = self.inner.lock();
        let job = &inner.job;
        let pct = if job.phase == ReindexPhase::Completed && job.total == 0 {
            100.0
        } else {
            percent(job.processed, job.total)
        };
        ReindexStatus {
            phase: job.phase,
            is_indexing: job.phase.is_running(),
            processed: job.processed,
            total: job.total,
            percent: pct,
            error: job.error.clone(),
            started_at: job.started_at,
            finished_at: job.finished_at,
            generation: job.generation.clone(),
            live_generation: inner.live.as_ref().and_then(|l| generation_name(l.path())),
        }
    }

    /// Returns the index a write should go to, journaling it while a
    /// rebuild is running.
    pub fn route_write(&self, op: JournalOp) -> Option<Arc<SearchIndex>> {
        let mut inner = self.inner.lock();
        if let Some(journal) = inner.journal.as_mut() {
            journal.push(op);
        }
        inner.live.clone()
    }

    fn admit(&self) -> Result<(), ReindexError> {
        let mut inner = self.inner.lock();
        if inner.job.phase.is_running() {
            return Err(ReindexError::AlreadyRunning);
        }
        let previous = inner.job.phase;
        inner.job = Job {
            phase: ReindexPhase::Connecting,
            started_at: Some(now()),
            ..Job::default()
        };
        inner.journal = Some(Vec::new());
        debug!(from = ?previous, "reindex admitted");
        Ok(())
    }

    fn set_phase(&self, phase: ReindexPhase) {
        self.inner.lock().job.phase = phase;
        info!(phase = ?phase, "reindex phase");
    }

    fn begin_indexing(&self, total: u64, generation: Option<String>) {
        {
            let mut inner = self.inner.lock();
            inner.job.phase = ReindexPhase::Indexing;
            inner.job.total = total;
            inner.job.processed = 0;
            inner.job.generation = generation;
        }
        info!(total, "reindex phase: indexing");
    }

    /// Records progress; returns the (possibly raised) total.
    fn record_progress(&self, processed: u64) -> u64 {
        let mut inner = self.inner.lock();
        inner.job.processed = processed;
        inner.job.total = inner.job.total.max(processed);
        inner.job.total
    }

    fn drain_journal(&self) -> Vec<JournalOp> {
        let mut inner = self.inner.lock();
        inner
            .journal
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Installs `index` as live, closes the journal, and returns the
    /// previous handle with any ops journaled since the last drain.
    fn swap_in(&self, index: Arc<SearchIndex>) -> (Option<Arc<SearchIndex>>, Vec<JournalOp>) {
        let mut inner = self.inner.lock();
        let remaining = inner.journal.take().unwrap_or_default();
        let old = inner.live.replace(index);
        (old, remaining)
    }

    fn complete(&self) {
        let mut inner = self.inner.lock();
        inner.job.phase = ReindexPhase::Completed;
        inner.job.total = inner.job.total.max(inner.job.processed);
        inner.job.finished_at = Some(now());
        inner.journal = None;
    }

    fn fail(&self, message: String) {
        let mut inner = self.inner.lock();
        inner.job.phase = ReindexPhase::Failed;
        inner.job.error = Some(message);
        inner.job.finished_at = Some(now());
        inner.journal = None;
    }
}

/// Rebuild parameters.
#[derive(Debug, Clone)]
pub struct ReindexSettings {
    /// Records eligible for the index.
    pub scope: Filter,
    pub batch_size: usize,
    pub pause: Duration,
    pub writer_heap_bytes: usize,
}

impl ReindexSettings {
    pub fn from_config(config: &Config) -> Self {
        let scope = if config.index.kinds.is_empty() {
            Filter::new()
        } else {
            Filter::new().with_kinds(config.index.kinds.iter().copied())
        };
        Self {
            scope,
            batch_size: config.reindex.batch_size,
            pause: config.reindex.pause(),
            writer_heap_bytes: config.index.writer_heap_bytes,
        }
    }
}

/// Single-flight rebuild job over one [`IndexState`].
pub struct Reindexer {
    state: Arc<IndexState>,
    store: Arc<dyn EventStore>,
    layout: IndexLayout,
    settings: ReindexSettings,
}

impl Reindexer {
    pub fn new(
        state: Arc<IndexState>,
        store: Arc<dyn EventStore>,
        layout: IndexLayout,
        settings: ReindexSettings,
    ) -> Self {
        Self {
            state,
            store,
            layout,
            settings,
        }
    }

    pub fn state(&self) -> &Arc<IndexState> {
        &self.state
    }

    pub fn status(&self) -> ReindexStatus {
        self.state.status()
    }

    /// Admits a rebuild and runs it in the background.
    ///
    /// Returns as soon as the job is admitted; poll [`Reindexer::status`]
    /// for progress.
    pub fn start(self: &Arc<Self>) -> Result<(), ReindexError> {
        self.state.admit()?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(&NoProgress).await;
        });
        Ok(())
    }

    /// Admits a rebuild and runs it to completion on the current task.
    pub async fn rebuild(
        &self,
        reporter: &dyn ReindexProgressReporter,
    ) -> Result<ReindexStatus, ReindexError> {
        self.state.admit()?;
        let status = self.run(reporter).await;
        match status.phase {
            ReindexPhase::Failed => Err(ReindexError::Failed(
                status.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            _ => Ok(status),
        }
    }

    async fn run(&self, reporter: &dyn ReindexProgressReporter) -> ReindexStatus {
        let started = Instant::now();
        let dir = self.layout.new_generation();

        let outcome = match self.build(&dir, reporter).await {
            Ok(index) => self.swap(index, &dir, reporter).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.state.complete();
                let status = self.state.status();
                info!(
                    processed = status.processed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "reindex completed"
                );
                reporter.report(ReindexProgressEvent::Completed {
                    processed: status.processed,
                    elapsed: started.elapsed(),
                });
                status
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(error = %message, "reindex failed");
                self.state.fail(message.clone());
                reporter.report(ReindexProgressEvent::Failed { error: message });
                if dir.exists() {
                    if let Err(e) = std::fs::remove_dir_all(&dir) {
                        warn!(path = %dir.display(), error = %e, "failed to remove partial generation");
                    }
                }
                self.state.status()
            }
        }
    }

    async fn build(
        &self,
        dir: &Path,
        reporter: &dyn ReindexProgressReporter,
    ) -> anyhow::Result<Arc<SearchIndex>> {
        info!("reindex phase: connecting");
        reporter.report(ReindexProgressEvent::Connecting);
        self.store
            .ping()
            .await
            .context("connecting to primary store")?;

        self.state.set_phase(ReindexPhase::Counting);
        reporter.report(ReindexProgressEvent::Counting);
        let total = self
            .store
            .count_by_filter(&self.settings.scope)
            .await
            .context("counting eligible records")?;

        let path = dir.to_path_buf();
        let heap = self.settings.writer_heap_bytes;
        let index = tokio::task::spawn_blocking(move || SearchIndex::create(&path, heap))
            .await
            .context("index creation task failed")?
            .with_context(|| format!("creating index at {}", dir.display()))?;
        let index = Arc::new(index);

        self.state.begin_indexing(total, generation_name(dir));
        reporter.report(ReindexProgressEvent::Indexing { processed: 0, total });

        let batch_size = self.settings.batch_size;
        let mut cursor: Option<PageCursor> = None;
        let mut processed = 0u64;
        loop {
            let batch = self
                .store
                .page_by_created_at(&self.settings.scope, batch_size, cursor.as_ref())
                .await
                .with_context(|| format!("reading batch after {processed} records"))?;
            let fetched = batch.len();
            if let Some(last) = batch.last() {
                cursor = Some(PageCursor::of(last));
            }

            if fetched > 0 {
                let target = Arc::clone(&index);
                tokio::task::spawn_blocking(move || -> Result<(), IndexError> {
                    for record in batch {
                        target.upsert(&enrich(record))?;
                    }
                    target.commit()
                })
                .await
                .context("indexing task failed")?
                .with_context(|| format!("indexing batch after {processed} records"))?;
            }

            processed += fetched as u64;
            let total = self.state.record_progress(processed);
            debug!(processed, total, "indexed batch");
            reporter.report(ReindexProgressEvent::Indexing { processed, total });

            if fetched < batch_size {
                break;
            }
            tokio::time::sleep(self.settings.pause).await;
        }

        Ok(index)
    }

    async fn swap(
        &self,
        index: Arc<SearchIndex>,
        dir: &Path,
        reporter: &dyn ReindexProgressReporter,
    ) -> anyhow::Result<()> {
        for _ in 0..JOURNAL_ROUNDS {
            let ops = self.state.drain_journal();
            if ops.is_empty() {
                break;
            }
            self.replay(&index, ops).await?;
        }

        let layout = self.layout.clone();
        let promoted = dir.to_path_buf();
        tokio::task::spawn_blocking(move || layout.promote(&promoted))
            .await
            .context("promote task failed")?
            .context("promoting new generation")?;

        let (old, remaining) = self.state.swap_in(Arc::clone(&index));
        let generation = generation_name(dir).unwrap_or_default();
        info!(generation = %generation, "swapped in rebuilt search index");
        reporter.report(ReindexProgressEvent::Swapped { generation });

        if !remaining.is_empty() {
            if let Err(e) = self.replay(&index, remaining).await {
                warn!(error = %format!("{e:#}"), "failed to replay writes journaled during swap");
            }
        }

        if let Some(old) = old {
            match tokio::task::spawn_blocking(move || old.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "failed to close previous index writer"),
                Err(e) => warn!(error = %e, "previous index close task failed"),
            }
        }
        Ok(())
    }

    /// Applies journaled writes to `index`, reading upserted records back
    /// from the primary store.
    async fn replay(&self, index: &Arc<SearchIndex>, ops: Vec<JournalOp>) -> anyhow::Result<()> {
        let upsert_ids: Vec<String> = ops
            .iter()
            .filter_map(|op| match op {
                JournalOp::Upsert(id) => Some(id.clone()),
                JournalOp::Delete(_) => None,
            })
            .collect();
        let fetched: Vec<Record> = if upsert_ids.is_empty() {
            Vec::new()
        } else {
            self.store
                .query_by_ids(&upsert_ids)
                .await
                .context("reading journaled records")?
        };
        debug!(ops = ops.len(), "replaying journaled index writes");

        let target = Arc::clone(index);
        tokio::task::spawn_blocking(move || -> Result<(), IndexError> {
            for op in ops {
                match op {
                    JournalOp::Upsert(id) => match fetched.iter().find(|r| r.id == id) {
                        Some(record) => target.upsert(&enrich(record.clone()))?,
                        // Gone from the primary store since it was journaled.
                        None => target.delete(&id)?,
                    },
                    JournalOp::Delete(id) => target.delete(&id)?,
                }
            }
            target.commit()
        })
        .await
        .context("replay task failed")??;
        Ok(())
    }
}
