//! Enrichment pipeline.
//!
//! Runs on every record before it reaches the primary store or the text
//! index. The only derived attribute today is the `description` tag,
//! lifted out of the JSON object content of radio station records
//! (kind 31237); other kinds pass through untouched:
//!
//! ```text
//! content: {"description":"smooth jazz", ...}
//!        ──▶ tags += ["description", "smooth jazz"]   (unless already tagged)
//! ```
//!
//! [`enrich`] is pure and idempotent: a record that already carries a
//! `description` tag is returned untouched.

use serde_json::Value;

use crate::models::{Record, RADIO_STATION_KIND};

pub const DESCRIPTION_TAG: &str = "description";

/// Derives searchable tags from the record content.
pub fn enrich(mut record: Record) -> Record {
    if record.kind == RADIO_STATION_KIND && !record.has_tag(DESCRIPTION_TAG) {
        if let Some(description) = description_from_content(&record.content) {
            record
                .tags
                .push(vec![DESCRIPTION_TAG.to_string(), description]);
        }
    }
    record
}

/// The non-empty `description` string of JSON object content, verbatim.
///
/// Anything else (plain text, malformed JSON, arrays, non-string values)
/// yields `None`.
pub fn description_from_content(content: &str) -> Option<String> {
    let trimmed = content.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map
            .get(DESCRIPTION_TAG)
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content: &str, tags: Vec<Vec<&str>>) -> Record {
        Record {
            id: "id".into(),
            author: "pk".into(),
            created_at: 1,
            kind: 31237,
            tags: tags
                .into_iter()
                .map(|t| t.into_iter().map(String::from).collect())
                .collect(),
            content: content.into(),
            signature: String::new(),
        }
    }

    #[test]
    fn test_adds_description_from_json_content() {
        let enriched = enrich(record(
            r#"{"description":"smooth jazz","streams":[]}"#,
            vec![vec!["name", "Jazz Radio"]],
        ));
        assert_eq!(enriched.tag_value("description"), Some("smooth jazz"));
        assert_eq!(enriched.tags.len(), 2);
    }

    #[test]
    fn test_enrich_is_idempotent() {
        let once = enrich(record(r#"{"description":"late night"}"#, vec![]));
        let twice = enrich(once.clone());
        assert_eq!(once.tags, twice.tags);
        assert_eq!(twice.tag_values("description").count(), 1);
    }

    #[test]
    fn test_existing_description_tag_wins() {
        let enriched = enrich(record(
            r#"{"description":"from content"}"#,
            vec![vec!["description", "from tag"]],
        ));
        assert_eq!(enriched.tag_value("description"), Some("from tag"));
        assert_eq!(enriched.tags.len(), 1);
    }

    #[test]
    fn test_only_stations_are_enriched() {
        let mut note = record(r#"{"description":"not a station"}"#, vec![]);
        note.kind = 1;
        assert!(enrich(note).tags.is_empty());
    }

    #[test]
    fn test_description_kept_verbatim() {
        let enriched = enrich(record(r#"{"description":"  padded  "}"#, vec![]));
        assert_eq!(enriched.tag_value("description"), Some("  padded  "));
    }

    #[test]
    fn test_malformed_or_non_object_content_is_ignored() {
        for content in [
            "{not json",
            "just words",
            r#"["description","x"]"#,
            r#"{"description": 42}"#,
            r#"{"description": ""}"#,
            "",
        ] {
            let enriched = enrich(record(content, vec![]));
            assert!(enriched.tags.is_empty(), "content {content:?} produced tags");
        }
    }
}
