//! SQLite-backed [`EventStore`] implementation.
//!
//! Records live in `events`; each valued tag is mirrored into `event_tags`
//! so tag predicates become indexed `EXISTS` sub-queries. Filters are
//! translated with `sqlx::QueryBuilder` so every value is bound, never
//! interpolated.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use relay_search_core::models::{Filter, Record, Tag};
use relay_search_core::store::{EventStore, PageCursor};

const SELECT_COLUMNS: &str = "SELECT id, pubkey, created_at, kind, tags, content, sig FROM events";

/// SQLite implementation of the [`EventStore`] trait.
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Appends ` WHERE ...` for the structural predicates of `filter`.
fn push_conditions(qb: &mut QueryBuilder<'_, Sqlite>, filter: &Filter) {
    qb.push(" WHERE 1 = 1");

    let ids = filter.id_list();
    if !ids.is_empty() {
        qb.push(" AND id IN (");
        let mut list = qb.separated(", ");
        for id in ids {
            list.push_bind(id.clone());
        }
        list.push_unseparated(")");
    }

    let authors = filter.author_list();
    if !authors.is_empty() {
        qb.push(" AND pubkey IN (");
        let mut list = qb.separated(", ");
        for author in authors {
            list.push_bind(author.clone());
        }
        list.push_unseparated(")");
    }

    let kinds = filter.kind_list();
    if !kinds.is_empty() {
        qb.push(" AND kind IN (");
        let mut list = qb.separated(", ");
        for kind in kinds {
            list.push_bind(i64::from(*kind));
        }
        list.push_unseparated(")");
    }

    if let Some(since) = filter.since {
        qb.push(" AND created_at >= ").push_bind(since);
    }
    if let Some(until) = filter.until {
        qb.push(" AND created_at <= ").push_bind(until);
    }

    for (name, values) in filter.tag_predicates() {
        qb.push(" AND EXISTS (SELECT 1 FROM event_tags t WHERE t.event_id = events.id AND t.name = ")
            .push_bind(name.to_string())
            .push(" AND t.value IN (");
        let mut list = qb.separated(", ");
        for value in values {
            list.push_bind(value.clone());
        }
        list.push_unseparated("))");
    }
}

fn row_to_record(row: &SqliteRow) -> Record {
    let tags_json: String = row.get("tags");
    // Rows with unreadable tags still decode; they just carry none.
    let tags: Vec<Tag> = serde_json::from_str(&tags_json).unwrap_or_default();
    let kind: i64 = row.get("kind");
    Record {
        id: row.get("id"),
        author: row.get("pubkey"),
        created_at: row.get("created_at"),
        kind: u32::try_from(kind).unwrap_or_default(),
        tags,
        content: row.get("content"),
        signature: row.get("sig"),
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn save(&self, record: &Record) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO events (id, pubkey, created_at, kind, tags, content, sig)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.author)
        .bind(record.created_at)
        .bind(i64::from(record.kind))
        .bind(serde_json::to_string(&record.tags)?)
        .bind(&record.content)
        .bind(&record.signature)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            for tag in &record.tags {
                if let [name, value, ..] = tag.as_slice() {
                    sqlx::query("INSERT INTO event_tags (event_id, name, value) VALUES (?, ?, ?)")
                        .bind(&record.id)
                        .bind(name)
                        .bind(value)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM event_tags WHERE event_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn query_by_ids(&self, ids: &[String]) -> Result<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        qb.push(" WHERE id IN (");
        let mut list = qb.separated(", ");
        for id in ids {
            list.push_bind(id.clone());
        }
        list.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn query_by_filter(&self, filter: &Filter) -> Result<Vec<Record>> {
        let mut qb = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        push_conditions(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id ASC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn count_by_filter(&self, filter: &Filter) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM events");
        push_conditions(&mut qb, filter);

        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn page_by_created_at(
        &self,
        filter: &Filter,
        limit: usize,
        after: Option<&PageCursor>,
    ) -> Result<Vec<Record>> {
        let mut qb = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        push_conditions(&mut qb, filter);
        if let Some(cursor) = after {
            qb.push(" AND (created_at > ")
                .push_bind(cursor.created_at)
                .push(" OR (created_at = ")
                .push_bind(cursor.created_at)
                .push(" AND id > ")
                .push_bind(cursor.id.clone())
                .push("))");
        }
        qb.push(" ORDER BY created_at ASC, id ASC LIMIT ")
            .push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> SqliteEventStore {
        let pool = db::connect_path(&tmp.path().join("relay.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        SqliteEventStore::new(pool)
    }

    fn record(id: &str, created_at: i64, kind: u32, tags: &[(&str, &str)]) -> Record {
        Record {
            id: id.into(),
            author: format!("pk-{}", id),
            created_at,
            kind,
            tags: tags
                .iter()
                .map(|(n, v)| vec![n.to_string(), v.to_string()])
                .collect(),
            content: format!("content {}", id),
            signature: "sig".into(),
        }
    }

    #[tokio::test]
    async fn test_save_and_fetch_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let rec = record("a", 10, 31237, &[("name", "Jazz Radio"), ("t", "jazz")]);

        assert!(store.save(&rec).await.unwrap());
        assert!(!store.save(&rec).await.unwrap(), "duplicate ids are ignored");

        let found = store.query_by_ids(&["a".into()]).await.unwrap();
        assert_eq!(found, vec![rec]);
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_filter_predicates() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        store.save(&record("a", 10, 31237, &[("t", "jazz")])).await.unwrap();
        store.save(&record("b", 20, 31237, &[("t", "rock")])).await.unwrap();
        store.save(&record("c", 30, 1, &[("t", "jazz")])).await.unwrap();

        let jazz = store
            .query_by_filter(&Filter::new().with_tag("t", "jazz"))
            .await
            .unwrap();
        assert_eq!(
            jazz.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["c", "a"]
        );

        let mut ranged = Filter::new().with_kinds([31237]);
        ranged.since = Some(15);
        let found = store.query_by_filter(&ranged).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b");

        let by_author = store
            .query_by_filter(&Filter::new().with_authors(["pk-a", "pk-c"]).with_limit(1))
            .await
            .unwrap();
        assert_eq!(by_author.len(), 1);
        assert_eq!(by_author[0].id, "c");

        assert_eq!(
            store
                .count_by_filter(&Filter::new().with_kinds([31237]))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_paging_and_delete() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        for (i, id) in ["x", "y", "z"].iter().enumerate() {
            store
                .save(&record(id, 100 - i as i64, 31237, &[]))
                .await
                .unwrap();
        }
        let scope = Filter::new().with_kinds([31237]);
        let first = store.page_by_created_at(&scope, 2, None).await.unwrap();
        assert_eq!(
            first.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["z", "y"]
        );

        // A delete behind the cursor must not shift the next page.
        assert!(store.delete("z").await.unwrap());
        let cursor = PageCursor::of(&first[1]);
        let rest = store
            .page_by_created_at(&scope, 2, Some(&cursor))
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "x");

        assert!(store.delete("x").await.unwrap());
        assert!(!store.delete("x").await.unwrap());
        assert_eq!(store.count_by_filter(&scope).await.unwrap(), 1);
    }
}
