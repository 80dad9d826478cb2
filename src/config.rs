//! Configuration loading.
//!
//! The relay search overlay reads a single TOML file. Only `[db]` is
//! required; every other section falls back to the defaults below.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_search_core::query::{CompileOptions, TermPolicy};

/// Smallest writer heap tantivy accepts for a single indexing thread.
pub const MIN_WRITER_HEAP_BYTES: usize = 15_000_000;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub reindex: ReindexConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_root")]
    pub root: PathBuf,
    #[serde(default = "default_writer_heap")]
    pub writer_heap_bytes: usize,
    /// Kinds written to the text index. Empty means every kind.
    #[serde(default = "default_kinds")]
    pub kinds: Vec<u32>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_index_root(),
            writer_heap_bytes: default_writer_heap(),
            kinds: default_kinds(),
        }
    }
}

impl IndexConfig {
    pub fn indexes_kind(&self, kind: u32) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

fn default_index_root() -> PathBuf {
    PathBuf::from("./data/search")
}
fn default_writer_heap() -> usize {
    50_000_000
}
fn default_kinds() -> Vec<u32> {
    vec![31237]
}

/// Result ordering of the general (non exact-match) stream.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultOrder {
    #[default]
    Relevance,
    Recency,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Kinds applied to a search filter that names none. Empty disables scoping.
    #[serde(default = "default_kinds")]
    pub default_kinds: Vec<u32>,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Upper bound for a client-supplied search limit.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_exact_match_cap")]
    pub exact_match_cap: usize,
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    #[serde(default)]
    pub term_policy: TermPolicy,
    #[serde(default)]
    pub order: ResultOrder,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_kinds: default_kinds(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            exact_match_cap: default_exact_match_cap(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
            term_policy: TermPolicy::default(),
            order: ResultOrder::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl SearchConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    /// Requested limit, or the default, clamped to `max_limit`.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            term_policy: self.term_policy,
        }
    }
}

fn default_limit() -> usize {
    100
}
fn default_max_limit() -> usize {
    1_000
}
fn default_exact_match_cap() -> usize {
    relay_search_core::prioritize::EXACT_MATCH_CAP
}
fn default_resolve_timeout_ms() -> u64 {
    200
}
fn default_channel_capacity() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReindexConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            pause_ms: default_pause_ms(),
        }
    }
}

impl ReindexConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

fn default_batch_size() -> usize {
    500
}
fn default_pause_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7447".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.index.writer_heap_bytes < MIN_WRITER_HEAP_BYTES {
        anyhow::bail!(
            "index.writer_heap_bytes must be >= {}",
            MIN_WRITER_HEAP_BYTES
        );
    }

    if config.search.default_limit == 0 {
        anyhow::bail!("search.default_limit must be >= 1");
    }
    if config.search.max_limit < config.search.default_limit {
        anyhow::bail!("search.max_limit must be >= search.default_limit");
    }
    if config.search.exact_match_cap == 0 {
        anyhow::bail!("search.exact_match_cap must be >= 1");
    }
    if config.search.exact_match_cap > config.search.default_limit {
        anyhow::bail!("search.exact_match_cap must not exceed search.default_limit");
    }
    if config.search.channel_capacity == 0 {
        anyhow::bail!("search.channel_capacity must be >= 1");
    }

    if config.reindex.batch_size == 0 {
        anyhow::bail!("reindex.batch_size must be > 0");
    }

    Ok(())
}
