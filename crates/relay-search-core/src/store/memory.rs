//! In-memory [`EventStore`] for tests and embedding.
//!
//! Records live in a `HashMap` behind `std::sync::RwLock`; every query is a
//! linear scan.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Filter, Record};

use super::{EventStore, PageCursor};

#[derive(Default)]
pub struct InMemoryEventStore {
    records: RwLock<HashMap<String, Record>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matching(&self, filter: &Filter) -> Result<Vec<Record>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("record map lock poisoned"))?;
        Ok(records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(&self, record: &Record) -> Result<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow!("record map lock poisoned"))?;
        if records.contains_key(&record.id) {
            return Ok(false);
        }
        records.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow!("record map lock poisoned"))?;
        Ok(records.remove(id).is_some())
    }

    async fn query_by_ids(&self, ids: &[String]) -> Result<Vec<Record>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("record map lock poisoned"))?;
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn query_by_filter(&self, filter: &Filter) -> Result<Vec<Record>> {
        let mut found = self.matching(filter)?;
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn count_by_filter(&self, filter: &Filter) -> Result<u64> {
        Ok(self.matching(filter)?.len() as u64)
    }

    async fn page_by_created_at(
        &self,
        filter: &Filter,
        limit: usize,
        after: Option<&PageCursor>,
    ) -> Result<Vec<Record>> {
        let mut found = self.matching(filter)?;
        found.retain(|r| after.map_or(true, |c| c.precedes(r)));
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        found.truncate(limit);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, created_at: i64, kind: u32) -> Record {
        Record {
            id: id.into(),
            author: "pk".into(),
            created_at,
            kind,
            tags: vec![vec!["t".into(), "jazz".into()]],
            content: String::new(),
            signature: String::new(),
        }
    }

    async fn seeded() -> InMemoryEventStore {
        let store = InMemoryEventStore::new();
        for (id, ts, kind) in [("a", 3, 31237), ("b", 1, 31237), ("c", 2, 1), ("d", 4, 31237)] {
            store.save(&record(id, ts, kind)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let store = InMemoryEventStore::new();
        assert!(store.save(&record("a", 1, 1)).await.unwrap());
        assert!(!store.save(&record("a", 1, 1)).await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_query_by_filter_newest_first() {
        let store = seeded().await;
        let found = store
            .query_by_filter(&Filter::new().with_kinds([31237]).with_limit(2))
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a"]);
    }

    #[tokio::test]
    async fn test_paging_oldest_first() {
        let store = seeded().await;
        let scope = Filter::new().with_kinds([31237]);
        assert_eq!(store.count_by_filter(&scope).await.unwrap(), 3);
        let first = store.page_by_created_at(&scope, 2, None).await.unwrap();
        let cursor = PageCursor::of(&first[1]);
        let second = store
            .page_by_created_at(&scope, 2, Some(&cursor))
            .await
            .unwrap();
        assert_eq!(
            first.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "d");
    }

    #[tokio::test]
    async fn test_paging_survives_delete_behind_cursor() {
        let store = seeded().await;
        let scope = Filter::new().with_kinds([31237]);
        let first = store.page_by_created_at(&scope, 1, None).await.unwrap();
        assert_eq!(first[0].id, "b");
        assert!(store.delete("b").await.unwrap());

        let cursor = PageCursor::of(&first[0]);
        let next = store
            .page_by_created_at(&scope, 1, Some(&cursor))
            .await
            .unwrap();
        assert_eq!(next[0].id, "a");
    }

    #[test]
    fn test_cursor_breaks_ties_by_id() {
        let cursor = PageCursor {
            created_at: 5,
            id: "m".into(),
        };
        let mut r = record("n", 5, 1);
        assert!(cursor.precedes(&r));
        r.id = "m".into();
        assert!(!cursor.precedes(&r));
        r.id = "a".into();
        r.created_at = 6;
        assert!(cursor.precedes(&r));
    }

    #[tokio::test]
    async fn test_query_by_ids_and_delete() {
        let store = seeded().await;
        let found = store
            .query_by_ids(&["a".to_string(), "zz".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.query_by_ids(&["a".to_string()]).await.unwrap().is_empty());
    }
}
