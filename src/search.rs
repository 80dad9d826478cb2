//! Search pipeline.
//!
//! [`search_stream`] wires three concurrent tasks into one [`RecordStream`]:
//!
//! ```text
//!   exact-match scan ──▶ exact hits ───┐
//!                                      ├──▶ Materializer::merge ──▶ RecordStream
//!   ranked search ─────▶ general hits ─┘
//! ```
//!
//! The ranked search over-fetches by the exact-match cap so that
//! de-duplication against exact hits cannot starve the requested limit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use relay_search_core::models::{kind_name, Filter, Record};
use relay_search_core::query::CompiledQuery;
use relay_search_core::store::EventStore;

use crate::config::{Config, ResultOrder, SearchConfig};
use crate::exact::exact_matches;
use crate::index::SearchIndex;
use crate::materialize::{forward_hits, Materializer, RecordStream};
use crate::relay::Relay;

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub exact_match_cap: usize,
    pub resolve_timeout: Duration,
    pub order: ResultOrder,
    pub channel_capacity: usize,
}

impl SearchSettings {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            exact_match_cap: config.exact_match_cap,
            resolve_timeout: config.resolve_timeout(),
            order: config.order,
            channel_capacity: config.channel_capacity,
        }
    }
}

/// Runs `compiled` against `index` and streams at most `limit` records.
///
/// Must be called from within a tokio runtime.
pub fn search_stream(
    index: Arc<SearchIndex>,
    store: Arc<dyn EventStore>,
    compiled: CompiledQuery,
    limit: usize,
    settings: &SearchSettings,
) -> RecordStream {
    let (sink, stream) = RecordStream::channel(settings.channel_capacity);
    let cap = settings.exact_match_cap;
    let (exact_tx, exact_rx) = mpsc::channel(cap.max(1));
    let (general_tx, general_rx) = mpsc::channel(settings.channel_capacity.max(1));

    if compiled.is_degenerate() || cap == 0 {
        drop(exact_tx);
    } else {
        let index = Arc::clone(&index);
        let structural = compiled.structural_root();
        let needle = compiled.normalized.clone();
        let cancel = sink.token().clone();
        tokio::spawn(async move {
            match exact_matches(index, structural, needle, cap).await {
                Ok(hits) => {
                    debug!(count = hits.len(), "exact-match pre-pass");
                    forward_hits(hits, exact_tx, cancel).await;
                }
                Err(e) => warn!(error = %format!("{e:#}"), "exact-match pre-pass failed"),
            }
        });
    }

    {
        let root = compiled.root.clone();
        let order = settings.order;
        let fetch = limit.saturating_add(cap);
        let cancel = sink.token().clone();
        tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || index.search(&root, fetch, order)).await {
                Ok(Ok(hits)) => {
                    debug!(count = hits.len(), "ranked search");
                    forward_hits(hits, general_tx, cancel).await;
                }
                Ok(Err(e)) => warn!(error = %e, "ranked search failed"),
                Err(e) => warn!(error = %e, "ranked search task failed"),
            }
        });
    }

    let materializer = Materializer::new(store, settings.resolve_timeout);
    tokio::spawn(async move {
        materializer.merge(exact_rx, general_rx, limit, sink).await;
    });

    stream
}

/// `rsearch search`: runs the full pipeline read-only and prints results.
pub async fn run_search(
    config: &Config,
    text: &str,
    kinds: Vec<u32>,
    authors: Vec<String>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let relay = Relay::open_read_only(config).await?;

    let mut filter = Filter::new().with_search(text);
    if !kinds.is_empty() {
        filter = filter.with_kinds(kinds);
    }
    if !authors.is_empty() {
        filter = filter.with_authors(authors);
    }
    if let Some(limit) = limit {
        filter = filter.with_limit(limit);
    }

    let records = relay.query(&filter).await?.collect_all().await;
    relay.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, record) in records.iter().enumerate() {
        let name = record.tag_value("name").unwrap_or("(unnamed)");
        let date = chrono::DateTime::from_timestamp(record.created_at, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        println!("{}. {} / {}", i + 1, kind_name(record.kind), name);
        println!("    created: {}", date);
        println!("    author: {}", record.author);
        let excerpt = excerpt(record);
        if !excerpt.is_empty() {
            println!("    excerpt: \"{}\"", excerpt);
        }
        println!("    id: {}", record.id);
        println!();
    }
    Ok(())
}

const EXCERPT_CHARS: usize = 120;

fn excerpt(record: &Record) -> String {
    let source = record
        .tag_value("description")
        .unwrap_or(record.content.as_str());
    let flat = source.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= EXCERPT_CHARS {
        flat.to_string()
    } else {
        let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
        format!("{}…", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_search_core::enrich::enrich;
    use relay_search_core::query::{compile, CompileOptions};
    use relay_search_core::store::memory::InMemoryEventStore;
    use tempfile::TempDir;

    fn station(id: &str, name: &str, created_at: i64) -> Record {
        Record {
            id: id.into(),
            author: "pk".into(),
            created_at,
            kind: 31237,
            tags: vec![vec!["name".into(), name.into()]],
            content: format!(r#"{{"description":"{name} on air"}}"#),
            signature: "sig".into(),
        }
    }

    fn settings() -> SearchSettings {
        SearchSettings::from_config(&SearchConfig::default())
    }

    async fn fixture(tmp: &TempDir, records: &[Record]) -> (Arc<SearchIndex>, Arc<InMemoryEventStore>) {
        let index = SearchIndex::create(&tmp.path().join("gen"), 15_000_000).unwrap();
        let store = Arc::new(InMemoryEventStore::new());
        for record in records {
            let record = enrich(record.clone());
            store.save(&record).await.unwrap();
            index.upsert(&record).unwrap();
        }
        index.commit().unwrap();
        (Arc::new(index), store)
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_exact_name_leads_without_duplicates() {
        let tmp = TempDir::new().unwrap();
        let (index, store) = fixture(
            &tmp,
            &[
                station("fm", "Jazz Radio FM", 30),
                station("jr", "Jazz Radio", 10),
                station("smooth", "Smooth Jazz", 20),
            ],
        )
        .await;
        let compiled = compile("jazz radio", &Filter::new(), &CompileOptions::default());

        let records = search_stream(index, store, compiled, 10, &settings())
            .collect_all()
            .await;
        let found = ids(&records);
        assert_eq!(&found[..2], &["jr", "fm"]);
        assert!(found.contains(&"smooth"));
        let mut unique = found.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), found.len());
    }

    #[tokio::test]
    async fn test_limit_counts_exact_hits() {
        let tmp = TempDir::new().unwrap();
        let records: Vec<Record> = (0..8)
            .map(|i| station(&format!("s{i}"), &format!("Jazz {i}"), i))
            .collect();
        let (index, store) = fixture(&tmp, &records).await;
        let compiled = compile("jazz", &Filter::new(), &CompileOptions::default());

        let found = search_stream(index, store, compiled, 3, &settings())
            .collect_all()
            .await;
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn test_huge_limit_is_bounded_by_index_size() {
        let tmp = TempDir::new().unwrap();
        let (index, store) = fixture(&tmp, &[station("a", "Jazz", 1), station("b", "Jazz Hour", 2)]).await;
        let compiled = compile("jazz", &Filter::new(), &CompileOptions::default());

        let found = search_stream(index, store, compiled, usize::MAX, &settings())
            .collect_all()
            .await;
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_exact_pass_disabled_with_zero_cap() {
        let tmp = TempDir::new().unwrap();
        let (index, store) = fixture(&tmp, &[station("a", "Blues", 1)]).await;
        let compiled = compile("blues", &Filter::new(), &CompileOptions::default());
        let settings = SearchSettings {
            exact_match_cap: 0,
            ..settings()
        };

        let found = search_stream(index, store, compiled, 10, &settings)
            .collect_all()
            .await;
        assert_eq!(ids(&found), vec!["a"]);
    }

    #[test]
    fn test_excerpt_prefers_description() {
        let mut record = station("a", "Jazz", 1);
        assert_eq!(excerpt(&record), r#"{"description":"Jazz on air"}"#);
        record = enrich(record);
        assert_eq!(excerpt(&record), "Jazz on air");

        record.tags.clear();
        record.content = "x".repeat(300);
        assert_eq!(excerpt(&record).chars().count(), EXCERPT_CHARS + 1);
    }
}
