use anyhow::Result;
use sqlx::SqlitePool;

/// Creates the record tables and their indexes. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            pubkey TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            kind INTEGER NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            content TEXT NOT NULL,
            sig TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per tag with a value; backs tag predicates.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_tags (
            event_id TEXT NOT NULL,
            name TEXT NOT NULL,
            value TEXT NOT NULL,
            FOREIGN KEY (event_id) REFERENCES events(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_events_kind_created ON events(kind, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_events_pubkey ON events(pubkey)",
        "CREATE INDEX IF NOT EXISTS idx_event_tags_name_value ON event_tags(name, value)",
        "CREATE INDEX IF NOT EXISTS idx_event_tags_event ON event_tags(event_id)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("relay.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert!(tables.contains(&"events".to_string()));
        assert!(tables.contains(&"event_tags".to_string()));
    }
}
