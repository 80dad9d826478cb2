//! Record and filter models shared by every layer of the relay.
//!
//! A [`Record`] is the immutable, signed unit stored by the relay. A
//! [`Filter`] is the per-request query value: structural predicates plus
//! optional free text.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A tag: a name followed by one or more values, e.g. `["t", "jazz"]`.
pub type Tag = Vec<String>;

/// An immutable, signed, tagged content item keyed by its content hash.
///
/// Serialized with the nostr wire names (`pubkey`, `sig`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "pubkey")]
    pub author: String,
    pub created_at: i64,
    pub kind: u32,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "sig", default)]
    pub signature: String,
}

impl Record {
    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// First value of every tag named `name`, in tag order.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// Whether any tag carries `name`, with or without a value.
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags
            .iter()
            .any(|tag| tag.first().map(String::as_str) == Some(name))
    }

    /// NIP-01 identifier: hex SHA-256 of
    /// `[0, pubkey, created_at, kind, tags, content]` serialized as compact JSON.
    pub fn compute_id(&self) -> String {
        let canonical = serde_json::json!([
            0,
            self.author,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Structural predicates plus optional search text for one request.
///
/// Empty predicate lists are treated the same as absent ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Tag name to the set of acceptable first values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn with_authors<S: Into<String>>(mut self, authors: impl IntoIterator<Item = S>) -> Self {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.entry(name.into()).or_default().insert(value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Search text, if present and not blank.
    pub fn search_text(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    /// The same filter with the search text dropped.
    pub fn without_search(&self) -> Filter {
        Filter {
            search: None,
            ..self.clone()
        }
    }

    /// Fills in `kinds` when the filter does not name any.
    pub fn with_default_kinds(mut self, defaults: &[u32]) -> Self {
        if self.kind_list().is_empty() && !defaults.is_empty() {
            self.kinds = Some(defaults.to_vec());
        }
        self
    }

    pub fn id_list(&self) -> &[String] {
        self.ids.as_deref().unwrap_or_default()
    }

    pub fn author_list(&self) -> &[String] {
        self.authors.as_deref().unwrap_or_default()
    }

    pub fn kind_list(&self) -> &[u32] {
        self.kinds.as_deref().unwrap_or_default()
    }

    /// One-line description for query logs, e.g.
    /// `Kinds:[31237], Limit:20, Search:'jazz', #t:2`.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.id_list().is_empty() {
            parts.push(format!("IDs:{}", self.id_list().len()));
        }
        if !self.author_list().is_empty() {
            parts.push(format!("Authors:{}", self.author_list().len()));
        }
        if !self.kind_list().is_empty() {
            let kinds: Vec<String> = self.kind_list().iter().map(u32::to_string).collect();
            parts.push(format!("Kinds:[{}]", kinds.join(",")));
        }
        if let Some(since) = self.since {
            parts.push(format!("Since:{since}"));
        }
        if let Some(until) = self.until {
            parts.push(format!("Until:{until}"));
        }
        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            parts.push(format!("Limit:{limit}"));
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("Search:'{search}'"));
        }
        for (name, values) in self.tag_predicates() {
            parts.push(format!("#{name}:{}", values.len()));
        }
        if parts.is_empty() {
            "empty filter".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Tag predicates with at least one acceptable value.
    pub fn tag_predicates(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.tags
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| (name.as_str(), values))
    }

    /// Evaluates the structural predicates against a record. Search text is ignored.
    pub fn matches(&self, record: &Record) -> bool {
        let ids = self.id_list();
        if !ids.is_empty() && !ids.iter().any(|id| *id == record.id) {
            return false;
        }
        let authors = self.author_list();
        if !authors.is_empty() && !authors.iter().any(|a| *a == record.author) {
            return false;
        }
        let kinds = self.kind_list();
        if !kinds.is_empty() && !kinds.contains(&record.kind) {
            return false;
        }
        if self.since.is_some_and(|since| record.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| record.created_at > until) {
            return false;
        }
        self.tag_predicates().all(|(name, values)| {
            record
                .tag_values(name)
                .any(|value| values.contains(value))
        })
    }
}

/// Radio station listing, the kind this relay enriches and indexes by default.
pub const RADIO_STATION_KIND: u32 = 31237;

/// Human-readable name for the kinds this relay commonly carries, falling
/// back to the NIP-01 kind ranges.
pub fn kind_name(kind: u32) -> &'static str {
    match kind {
        0 => "Metadata",
        1 => "Note",
        3 => "Contacts",
        7 => "Reaction",
        1111 => "Comment",
        1311 => "Live Chat",
        9735 => "Zap",
        10002 => "Relay List",
        30078 => "App Data",
        RADIO_STATION_KIND => "Radio Station",
        31989 => "Handler Recommendation",
        31990 => "Handler Info",
        10_000..=19_999 => "Replaceable",
        20_000..=29_999 => "Ephemeral",
        30_000..=39_999 => "Parameterized Replaceable",
        _ => "Unknown",
    }
}
