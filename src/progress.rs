//! Reindex progress reporting.
//!
//! `rsearch reindex` runs the rebuild in the foreground and reports each
//! phase and batch. Progress goes to **stderr** so stdout stays parseable;
//! the HTTP-triggered background job uses [`NoProgress`] and is observed by
//! polling `/admin/indexing-status` instead.

use std::io::Write;
use std::time::Duration;

/// A single progress event for a rebuild.
#[derive(Clone, Debug, PartialEq)]
pub enum ReindexProgressEvent {
    Connecting,
    Counting,
    Indexing { processed: u64, total: u64 },
    Swapped { generation: String },
    Completed { processed: u64, elapsed: Duration },
    Failed { error: String },
}

/// Receives rebuild progress events.
pub trait ReindexProgressReporter: Send + Sync {
    fn report(&self, event: ReindexProgressEvent);
}

/// Human-friendly progress on stderr: "reindex  indexing  1,500 / 4,200 records (35%)".
pub struct StderrProgress;

impl ReindexProgressReporter for StderrProgress {
    fn report(&self, event: ReindexProgressEvent) {
        let line = match &event {
            ReindexProgressEvent::Connecting => "reindex  connecting to primary store...\n".to_string(),
            ReindexProgressEvent::Counting => "reindex  counting records...\n".to_string(),
            ReindexProgressEvent::Indexing { processed, total } => format!(
                "reindex  indexing  {} / {} records ({:.0}%)\n",
                format_number(*processed),
                format_number(*total),
                percent(*processed, *total)
            ),
            ReindexProgressEvent::Swapped { generation } => {
                format!("reindex  swapped in {}\n", generation)
            }
            ReindexProgressEvent::Completed { processed, elapsed } => format!(
                "reindex  done  {} records in {:.1}s\n",
                format_number(*processed),
                elapsed.as_secs_f64()
            ),
            ReindexProgressEvent::Failed { error } => format!("reindex  failed: {}\n", error),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ReindexProgressReporter for JsonProgress {
    fn report(&self, event: ReindexProgressEvent) {
        let obj = match &event {
            ReindexProgressEvent::Connecting => {
                serde_json::json!({"event": "progress", "phase": "connecting"})
            }
            ReindexProgressEvent::Counting => {
                serde_json::json!({"event": "progress", "phase": "counting"})
            }
            ReindexProgressEvent::Indexing { processed, total } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "processed": processed,
                "total": total,
                "percent": percent(*processed, *total),
            }),
            ReindexProgressEvent::Swapped { generation } => serde_json::json!({
                "event": "swapped",
                "generation": generation,
            }),
            ReindexProgressEvent::Completed { processed, elapsed } => serde_json::json!({
                "event": "completed",
                "processed": processed,
                "elapsed_ms": elapsed.as_millis() as u64,
            }),
            ReindexProgressEvent::Failed { error } => serde_json::json!({
                "event": "failed",
                "error": error,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ReindexProgressReporter for NoProgress {
    fn report(&self, _event: ReindexProgressEvent) {}
}

/// `processed / total` as a percentage in `[0, 100]`.
pub fn percent(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (processed as f64 / total as f64 * 100.0).min(100.0)
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ReindexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
