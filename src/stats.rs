//! Store and index overview.
//!
//! `rsearch stats` prints record counts per kind from the primary store
//! next to the state of the text index, so a drift between the two (for
//! example after writes made while the index was unavailable) is easy to
//! spot before running `rsearch reindex`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use relay_search_core::models::kind_name;

use crate::config::Config;
use crate::db;
use crate::index::IndexLayout;

/// Per-kind breakdown of the primary store.
struct KindStats {
    kind: u32,
    count: i64,
    newest: Option<i64>,
}

async fn kind_stats(pool: &SqlitePool) -> Result<Vec<KindStats>> {
    let rows = sqlx::query(
        r#"
        SELECT kind, COUNT(*) AS count, MAX(created_at) AS newest
        FROM events
        GROUP BY kind
        ORDER BY count DESC, kind ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| KindStats {
            kind: u32::try_from(row.get::<i64, _>("kind")).unwrap_or_default(),
            count: row.get("count"),
            newest: row.get("newest"),
        })
        .collect())
}

/// Run the stats command: query the store and the index and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    crate::migrate::run_migrations(&pool).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(&pool)
        .await?;
    let kinds = kind_stats(&pool).await?;
    pool.close().await;

    let eligible: i64 = kinds
        .iter()
        .filter(|k| config.index.indexes_kind(k.kind))
        .map(|k| k.count)
        .sum();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Relay Search — Stats");
    println!("====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Records:     {}", total);
    println!("  Indexable:   {}", eligible);
    println!();

    let layout = IndexLayout::new(&config.index.root);
    match layout.open_current_read_only() {
        Ok(Some(index)) => {
            let generation = index
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            println!("  Index:       {}", layout.root().display());
            println!("  Generation:  {}", generation);
            println!(
                "  Indexed:     {} / {}{}",
                index.num_docs(),
                eligible,
                if index.num_docs() as i64 != eligible {
                    "  (out of sync, run `rsearch reindex`)"
                } else {
                    ""
                }
            );
        }
        Ok(None) => println!("  Index:       none (run `rsearch init`)"),
        Err(e) => println!("  Index:       unavailable ({})", e),
    }

    if !kinds.is_empty() {
        println!();
        println!("  By kind:");
        println!(
            "  {:<8} {:<16} {:>8}   {}",
            "KIND", "NAME", "RECORDS", "NEWEST"
        );
        println!("  {}", "-".repeat(56));
        for k in &kinds {
            let newest = k.newest.map(format_ts_relative).unwrap_or_else(|| "-".into());
            println!(
                "  {:<8} {:<16} {:>8}   {}",
                k.kind,
                kind_name(k.kind),
                k.count,
                newest
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
