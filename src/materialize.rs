//! Result materialization.
//!
//! Index hits are only ids plus a few stored fields. The [`Materializer`]
//! turns them into full records by reading the primary store, merges the
//! exact-match and general hit streams, and pushes the result into a
//! bounded [`RecordStream`].
//!
//! Delivery rules:
//!
//! - exact-match hits are emitted before any general hit
//! - an id is emitted at most once per query
//! - a hit whose primary read fails or times out falls back to a partial
//!   record built from stored fields, or is skipped when that is impossible
//! - a hit the primary store no longer has is skipped
//! - nothing more is emitted once the consumer cancels or drops the stream

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use relay_search_core::models::Record;
use relay_search_core::store::EventStore;

use crate::index::IndexHit;

/// Lazily produced search results.
///
/// Dropping the stream cancels every producer feeding it.
pub struct RecordStream {
    rx: mpsc::Receiver<Record>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl RecordStream {
    /// A bounded stream and the sink that feeds it.
    pub fn channel(capacity: usize) -> (StreamSink, RecordStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let sink = StreamSink {
            tx,
            cancel: cancel.clone(),
        };
        let stream = RecordStream {
            rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
        };
        (sink, stream)
    }

    /// A stream over records that are already in memory.
    pub fn from_records(records: Vec<Record>) -> Self {
        let (sink, stream) = Self::channel(records.len());
        for record in records {
            // Capacity covers every record.
            let _ = sink.tx.try_send(record);
        }
        stream
    }

    pub fn empty() -> Self {
        Self::channel(1).1
    }

    /// Stops producers and discards anything already buffered. The stream
    /// yields nothing after this.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn next_record(&mut self) -> Option<Record> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.recv().await
    }

    /// Reads the stream to the end.
    pub async fn collect_all(mut self) -> Vec<Record> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record().await {
            records.push(record);
        }
        records
    }
}

impl futures_core::Stream for RecordStream {
    type Item = Record;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Record>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

/// Producer side of a [`RecordStream`].
#[derive(Clone)]
pub struct StreamSink {
    tx: mpsc::Sender<Record>,
    cancel: CancellationToken,
}

impl StreamSink {
    /// Sends one record; `false` once the consumer is gone or cancelled.
    pub async fn emit(&self, record: Record) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(record) => sent.is_ok(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Resolves hits against the primary store.
#[derive(Clone)]
pub struct Materializer {
    store: Arc<dyn EventStore>,
    resolve_timeout: Duration,
}

impl Materializer {
    pub fn new(store: Arc<dyn EventStore>, resolve_timeout: Duration) -> Self {
        Self {
            store,
            resolve_timeout,
        }
    }

    /// The record for one hit, if any should be emitted.
    pub async fn resolve(&self, hit: &IndexHit) -> Option<Record> {
        let ids = [hit.id.clone()];
        match tokio::time::timeout(self.resolve_timeout, self.store.query_by_ids(&ids)).await {
            Ok(Ok(records)) => {
                let found = records.into_iter().find(|r| r.id == hit.id);
                if found.is_none() {
                    debug!(id = %hit.id, "index hit missing from primary store, skipping");
                }
                found
            }
            Ok(Err(e)) => {
                warn!(id = %hit.id, error = %e, "primary read failed, using stored fields");
                hit.to_partial_record()
            }
            Err(_) => {
                warn!(
                    id = %hit.id,
                    timeout_ms = self.resolve_timeout.as_millis() as u64,
                    "primary read timed out, using stored fields"
                );
                hit.to_partial_record()
            }
        }
    }

    /// Drains `exact` then `general` into `sink`, emitting at most `limit`
    /// records with no repeated id.
    pub async fn merge(
        &self,
        mut exact: mpsc::Receiver<IndexHit>,
        mut general: mpsc::Receiver<IndexHit>,
        limit: usize,
        sink: StreamSink,
    ) {
        let mut seen = HashSet::new();
        let mut emitted = 0usize;
        if self
            .drain(&mut exact, &mut seen, &mut emitted, limit, &sink)
            .await
        {
            self.drain(&mut general, &mut seen, &mut emitted, limit, &sink)
                .await;
        }
        debug!(emitted, "search stream finished");
    }

    /// Returns `false` when the whole merge should stop.
    async fn drain(
        &self,
        rx: &mut mpsc::Receiver<IndexHit>,
        seen: &mut HashSet<String>,
        emitted: &mut usize,
        limit: usize,
        sink: &StreamSink,
    ) -> bool {
        loop {
            if *emitted >= limit {
                return false;
            }
            let hit = tokio::select! {
                biased;
                _ = sink.token().cancelled() => return false,
                hit = rx.recv() => hit,
            };
            let Some(hit) = hit else {
                return true;
            };
            if !seen.insert(hit.id.clone()) {
                continue;
            }
            let resolved = tokio::select! {
                biased;
                _ = sink.token().cancelled() => return false,
                record = self.resolve(&hit) => record,
            };
            if let Some(record) = resolved {
                if !sink.emit(record).await {
                    return false;
                }
                *emitted += 1;
            }
        }
    }
}

/// Feeds `hits` into `tx` until done, the receiver is gone, or `cancel` fires.
pub async fn forward_hits(hits: Vec<IndexHit>, tx: mpsc::Sender<IndexHit>, cancel: CancellationToken) {
    for hit in hits {
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = tx.send(hit) => sent,
        };
        if sent.is_err() {
            return;
        }
    }
}
