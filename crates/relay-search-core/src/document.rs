//! Index document projection.
//!
//! [`IndexDocument::from_record`] turns an (enriched) record into the flat
//! set of named fields the text index stores. Multi-valued fields are
//! sorted and deduplicated so the projection does not depend on tag order
//! across names; re-deriving from the same record yields identical values.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::models::Record;

/// How a field is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Indexed verbatim, matched exactly.
    Keyword,
    /// Tokenized and lowercased.
    Text,
    /// Signed integer, range-queryable and sortable.
    Int,
}

/// Every field of the text index schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexField {
    Id,
    Author,
    CreatedAt,
    Kind,
    Content,
    Description,
    Name,
    NameNormalized,
    NameText,
    Genre,
    GenreText,
    Language,
    Location,
    CountryCode,
    Website,
    Domain,
    Tags,
}

impl IndexField {
    pub const ALL: [IndexField; 17] = [
        IndexField::Id,
        IndexField::Author,
        IndexField::CreatedAt,
        IndexField::Kind,
        IndexField::Content,
        IndexField::Description,
        IndexField::Name,
        IndexField::NameNormalized,
        IndexField::NameText,
        IndexField::Genre,
        IndexField::GenreText,
        IndexField::Language,
        IndexField::Location,
        IndexField::CountryCode,
        IndexField::Website,
        IndexField::Domain,
        IndexField::Tags,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IndexField::Id => "id",
            IndexField::Author => "author",
            IndexField::CreatedAt => "created_at",
            IndexField::Kind => "kind",
            IndexField::Content => "content",
            IndexField::Description => "description",
            IndexField::Name => "name",
            IndexField::NameNormalized => "name_normalized",
            IndexField::NameText => "name_text",
            IndexField::Genre => "genre",
            IndexField::GenreText => "genre_text",
            IndexField::Language => "language",
            IndexField::Location => "location",
            IndexField::CountryCode => "country_code",
            IndexField::Website => "website",
            IndexField::Domain => "domain",
            IndexField::Tags => "tags",
        }
    }

    pub fn field_type(self) -> FieldType {
        match self {
            IndexField::CreatedAt | IndexField::Kind => FieldType::Int,
            IndexField::Content
            | IndexField::Description
            | IndexField::NameText
            | IndexField::GenreText
            | IndexField::Location => FieldType::Text,
            _ => FieldType::Keyword,
        }
    }
}

/// Separator between tag name and value in the `tags` keyword field.
pub const TAG_SEPARATOR: char = '\u{1f}';

/// Keyword token for a `(name, value)` tag pair.
pub fn tag_token(name: &str, value: &str) -> String {
    format!("{name}{TAG_SEPARATOR}{value}")
}

/// Derived, per-record projection stored in the text index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDocument {
    pub id: String,
    pub author: String,
    pub created_at: i64,
    pub kind: u32,
    pub content: String,
    pub name: Option<String>,
    pub name_normalized: Option<String>,
    pub description: Option<String>,
    pub genres: Vec<String>,
    pub languages: Vec<String>,
    pub location: Option<String>,
    pub country_code: Option<String>,
    pub website: Option<String>,
    pub domain: Option<String>,
    pub tags: Vec<(String, String)>,
}

impl IndexDocument {
    pub fn from_record(record: &Record) -> Self {
        let name = non_blank(record.tag_value("name"));
        let languages: BTreeSet<String> = record
            .tag_values("l")
            .chain(record.tag_values("language"))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_lowercase)
            .collect();
        let genres: BTreeSet<String> = record
            .tag_values("t")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        let tags: BTreeSet<(String, String)> = record
            .tags
            .iter()
            .filter_map(|tag| match tag.as_slice() {
                [name, value, ..] if !name.is_empty() => Some((name.clone(), value.clone())),
                _ => None,
            })
            .collect();

        IndexDocument {
            id: record.id.clone(),
            author: record.author.clone(),
            created_at: record.created_at,
            kind: record.kind,
            content: record.content.clone(),
            name_normalized: name.as_ref().map(|n| n.to_lowercase()),
            name,
            description: non_blank(record.tag_value("description")),
            genres: genres.into_iter().collect(),
            languages: languages.into_iter().collect(),
            location: non_blank(record.tag_value("location")),
            country_code: non_blank(record.tag_value("countryCode")),
            website: non_blank(record.tag_value("website")),
            domain: record.tag_value("nip05").and_then(nip05_domain),
            tags: tags.into_iter().collect(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Host part of a NIP-05 identifier (`user@host` or `_@host`), lowercased.
pub fn nip05_domain(nip05: &str) -> Option<String> {
    let host = match nip05.trim().rsplit_once('@') {
        Some((_, host)) => host,
        None => nip05.trim(),
    };
    let host = host.trim().trim_end_matches('.');
    if host.is_empty() || !host.contains('.') {
        return None;
    }
    Some(host.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&[&str]]) -> Vec<Vec<String>> {
        list.iter()
            .map(|t| t.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    fn station(tag_list: &[&[&str]]) -> Record {
        Record {
            id: "abc".into(),
            author: "pk".into(),
            created_at: 1_700_000_000,
            kind: 31237,
            tags: tags(tag_list),
            content: "{}".into(),
            signature: "sig".into(),
        }
    }

    #[test]
    fn test_projection_fields() {
        let doc = IndexDocument::from_record(&station(&[
            &["name", "Jazz Radio"],
            &["t", "jazz"],
            &["t", "blues"],
            &["l", "EN"],
            &["location", "New Orleans"],
            &["countryCode", "US"],
            &["nip05", "_@JazzRadio.example"],
            &["description", "smooth jazz"],
        ]));
        assert_eq!(doc.name.as_deref(), Some("Jazz Radio"));
        assert_eq!(doc.name_normalized.as_deref(), Some("jazz radio"));
        assert_eq!(doc.genres, vec!["blues", "jazz"]);
        assert_eq!(doc.languages, vec!["en"]);
        assert_eq!(doc.location.as_deref(), Some("New Orleans"));
        assert_eq!(doc.country_code.as_deref(), Some("US"));
        assert_eq!(doc.domain.as_deref(), Some("jazzradio.example"));
        assert_eq!(doc.description.as_deref(), Some("smooth jazz"));
        assert!(doc
            .tags
            .contains(&("t".to_string(), "jazz".to_string())));
    }

    #[test]
    fn test_projection_is_order_independent() {
        let a = IndexDocument::from_record(&station(&[
            &["t", "jazz"],
            &["name", "X"],
            &["t", "blues"],
            &["language", "fr"],
        ]));
        let b = IndexDocument::from_record(&station(&[
            &["language", "fr"],
            &["t", "blues"],
            &["name", "X"],
            &["t", "jazz"],
        ]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_valueless_tags_are_skipped() {
        let doc = IndexDocument::from_record(&station(&[&["t"], &["", "orphan"], &["name", "  "]]));
        assert!(doc.tags.is_empty());
        assert!(doc.genres.is_empty());
        assert_eq!(doc.name, None);
    }

    #[test]
    fn test_nip05_domain() {
        assert_eq!(nip05_domain("bob@Example.com").as_deref(), Some("example.com"));
        assert_eq!(nip05_domain("_@radio.example.").as_deref(), Some("radio.example"));
        assert_eq!(nip05_domain("example.org").as_deref(), Some("example.org"));
        assert_eq!(nip05_domain("bob@localhost"), None);
        assert_eq!(nip05_domain(""), None);
    }

    #[test]
    fn test_field_catalogue() {
        assert_eq!(IndexField::NameText.field_type(), FieldType::Text);
        assert_eq!(IndexField::CreatedAt.field_type(), FieldType::Int);
        assert_eq!(IndexField::Domain.field_type(), FieldType::Keyword);
        let names: BTreeSet<_> = IndexField::ALL.iter().map(|f| f.as_str()).collect();
        assert_eq!(names.len(), IndexField::ALL.len());
        assert_eq!(tag_token("t", "jazz"), "t\u{1f}jazz");
    }
}
