//! # Relay Search
//!
//! A full-text search overlay and out-of-place reindex pipeline for a
//! nostr relay event store.
//!
//! Records live in a primary store (SQLite); a derived tantivy index makes
//! them searchable. A search request is compiled into a boosted query
//! tree, answered by an exact-name pre-pass plus a ranked index search,
//! and materialized back into authoritative records as a cancellable
//! stream.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   save_event ──▶│   enrich     │──┬──────────────▶ SQLite (events)
//!                 └──────────────┘  │                    │
//!                                   ▼                    │ page_by_created_at
//!                            live index gen  ◀── swap ── Reindexer
//!                                   │
//!   query ──▶ compile ──▶ exact pre-pass ─┐
//!                     └─▶ ranked search ──┴─▶ Materializer ──▶ RecordStream
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rsearch init                        # create database and index
//! rsearch ingest stations.jsonl       # backfill records
//! rsearch search "jazz radio"         # search from the terminal
//! rsearch serve                       # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Primary store on SQLite |
//! | [`index`] | tantivy index engine and generation layout |
//! | [`exact`] | Exact-name pre-pass |
//! | [`materialize`] | Hit resolution, merging and result streams |
//! | [`search`] | Search pipeline wiring and `rsearch search` |
//! | [`reindex`] | Single-flight rebuild job and shared index state |
//! | [`progress`] | Rebuild progress reporting |
//! | [`relay`] | Facade used by the CLI and the HTTP API |
//! | [`server`] | HTTP API |
//! | [`ingest`] | JSONL backfill |
//! | [`get`] | Record retrieval |
//! | [`stats`] | Store and index overview |
//! | [`error`] | Typed index and reindex errors |
//!
//! Pure logic (record model, enrichment, query compilation, name
//! matching, the store trait) lives in `relay-search-core`.

pub mod config;
pub mod db;
pub mod error;
pub mod exact;
pub mod get;
pub mod index;
pub mod ingest;
pub mod materialize;
pub mod migrate;
pub mod progress;
pub mod reindex;
pub mod relay;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
