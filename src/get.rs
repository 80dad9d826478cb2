//! Record retrieval by id.
//!
//! Used by `rsearch get` and `GET /events/{id}`.

use anyhow::{anyhow, Result};
use serde::Serialize;

use relay_search_core::models::{kind_name, Record};
use relay_search_core::store::EventStore;

use crate::config::Config;
use crate::relay::Relay;

/// A record plus display helpers, as returned over HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct RecordResponse {
    #[serde(flatten)]
    pub record: Record,
    pub kind_name: &'static str,
    pub created_at_iso: String,
}

impl From<Record> for RecordResponse {
    fn from(record: Record) -> Self {
        Self {
            kind_name: kind_name(record.kind),
            created_at_iso: format_ts_iso(record.created_at),
            record,
        }
    }
}

/// Fetches one record from the primary store. `Ok(None)` when the id is
/// unknown; store failures are errors.
pub async fn get_record(store: &dyn EventStore, id: &str) -> Result<Option<RecordResponse>> {
    let found = store.query_by_ids(&[id.to_string()]).await?;
    Ok(found.into_iter().find(|r| r.id == id).map(RecordResponse::from))
}

/// CLI entry point: prints the record to stdout.
pub async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let relay = Relay::open_read_only(config).await?;
    let result = get_record(relay.store().as_ref(), id).await;
    relay.close().await;
    let response = result?.ok_or_else(|| anyhow!("record not found: {}", id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response.record)?);
        return Ok(());
    }

    let record = &response.record;
    println!("--- Record ---");
    println!("id:         {}", record.id);
    println!("kind:       {} ({})", record.kind, response.kind_name);
    println!("author:     {}", record.author);
    println!("created_at: {}", response.created_at_iso);
    if let Some(name) = record.tag_value("name") {
        println!("name:       {}", name);
    }
    println!();

    println!("--- Tags ({}) ---", record.tags.len());
    for tag in &record.tags {
        println!("{}", tag.join("  "));
    }
    println!();

    println!("--- Content ---");
    println!("{}", record.content);

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_search_core::store::memory::InMemoryEventStore;

    #[tokio::test]
    async fn test_get_record() {
        let store = InMemoryEventStore::new();
        let record = Record {
            id: "abc".into(),
            author: "pk".into(),
            created_at: 0,
            kind: 31237,
            tags: Vec::new(),
            content: String::new(),
            signature: "sig".into(),
        };
        store.save(&record).await.unwrap();

        let found = get_record(&store, "abc").await.unwrap().unwrap();
        assert_eq!(found.kind_name, "Radio Station");
        assert_eq!(found.created_at_iso, "1970-01-01T00:00:00Z");

        assert!(get_record(&store, "missing").await.unwrap().is_none());
    }
}
