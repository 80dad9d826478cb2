//! JSONL backfill.
//!
//! `rsearch ingest <FILE>` reads one record per line and writes each
//! through [`Relay::save_event`], so backfilled records are enriched and
//! indexed exactly like live writes. Blank lines are skipped; a line that
//! does not parse is counted and reported but does not stop the run.
//! Records without an `id` get the NIP-01 identifier computed from their
//! fields.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::warn;

use relay_search_core::models::Record;

use crate::config::Config;
use crate::relay::Relay;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub lines: u64,
    pub parsed: u64,
    pub invalid: u64,
    pub saved: u64,
    pub duplicates: u64,
}

/// Parses one JSONL line; `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<Record>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let mut record: Record = serde_json::from_str(line)?;
    if record.id.is_empty() {
        record.id = record.compute_id();
    }
    Ok(Some(record))
}

/// Feeds every record of `reader` to `relay`; with `None` only parses.
pub async fn ingest_reader<R>(relay: Option<&Relay>, reader: R) -> Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        summary.lines += 1;
        let record = match parse_line(&line) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                warn!(line = summary.lines, error = %e, "skipping unparseable record");
                summary.invalid += 1;
                continue;
            }
        };
        summary.parsed += 1;

        if let Some(relay) = relay {
            if relay.save_event(record).await? {
                summary.saved += 1;
            } else {
                summary.duplicates += 1;
            }
        }
    }
    Ok(summary)
}

pub async fn run_ingest(config: &Config, path: &Path, dry_run: bool) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    if dry_run {
        let summary = ingest_reader(None, reader).await?;
        println!("ingest {} (dry-run)", path.display());
        println!("  lines: {}", summary.lines);
        println!("  records: {}", summary.parsed);
        println!("  invalid: {}", summary.invalid);
        return Ok(());
    }

    let relay = Relay::open(config).await?;
    let result = ingest_reader(Some(&relay), reader).await;
    relay.close().await;
    let summary = result?;

    println!("ingest {}", path.display());
    println!("  lines: {}", summary.lines);
    println!("  saved: {}", summary.saved);
    println!("  duplicates: {}", summary.duplicates);
    println!("  invalid: {}", summary.invalid);
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexLayout;
    use relay_search_core::models::Filter;
    use relay_search_core::store::memory::InMemoryEventStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    const LINES: &str = r#"{"id":"a","pubkey":"pk","created_at":1,"kind":31237,"tags":[["name","Jazz Radio"]],"content":"","sig":"s"}

not json
{"pubkey":"pk","created_at":2,"kind":31237,"tags":[["name","Blues"]],"content":"","sig":"s"}
{"id":"a","pubkey":"pk","created_at":1,"kind":31237,"tags":[],"content":"","sig":"s"}
"#;

    #[test]
    fn test_parse_line_computes_missing_id() {
        assert!(parse_line("   ").unwrap().is_none());
        let record = parse_line(r#"{"pubkey":"pk","created_at":2,"kind":1,"tags":[],"content":"hi","sig":"s"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(record.id.len(), 64);
        assert_eq!(record.id, record.compute_id());
        assert!(parse_line("{").is_err());
    }

    #[tokio::test]
    async fn test_dry_run_only_counts() {
        let summary = ingest_reader(None, LINES.as_bytes()).await.unwrap();
        assert_eq!(summary.lines, 5);
        assert_eq!(summary.parsed, 3);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.saved, 0);
    }

    #[tokio::test]
    async fn test_ingest_saves_and_indexes() {
        let tmp = TempDir::new().unwrap();
        let config: Config = toml::from_str(&format!(
            "[db]\npath = \"{}\"\n[index]\nroot = \"{}\"\nwriter_heap_bytes = 15000000\n",
            tmp.path().join("relay.sqlite").display(),
            tmp.path().join("search").display()
        ))
        .unwrap();
        let live = IndexLayout::new(&config.index.root)
            .open_or_create(config.index.writer_heap_bytes)
            .unwrap();
        let relay = Relay::new(&config, Arc::new(InMemoryEventStore::new()), Some(live));

        let summary = ingest_reader(Some(&relay), LINES.as_bytes()).await.unwrap();
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.duplicates, 1);

        let found = relay
            .query(&Filter::new().with_search("blues"))
            .await
            .unwrap()
            .collect_all()
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tag_value("name"), Some("Blues"));
    }
}
