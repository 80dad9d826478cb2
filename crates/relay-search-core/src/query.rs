//! Query compiler.
//!
//! Turns raw search text plus the structural predicates of a [`Filter`]
//! into an engine-neutral [`QueryNode`] tree. The index layer lowers the
//! tree onto its own query primitives.
//!
//! # Pipeline
//!
//! ```text
//! "Jazz radio domain:example.com"
//!      │
//!      ├─ extension extraction ──▶ {domain: example.com}  ──▶ Keyword(domain)
//!      ├─ sanitization         ──▶ "Jazz radio"
//!      ├─ lowercased terms     ──▶ ["jazz", "radio"]
//!      │      └─ per term: OR over ranked fields, each field an OR of
//!      │         exact ×1.5 │ analyzed ×1.0 │ prefix ×1.2 │ contains ×0.8 │ fuzzy(1) ×0.7
//!      └─ structural predicates (ids, authors, kinds, since/until, tags) ── AND
//! ```
//!
//! Terms are combined with OR by default ([`TermPolicy::Any`]); the
//! [`TermPolicy::All`] policy requires every term instead.
//!
//! A search string that sanitizes to nothing is *degenerate*: its text
//! part compiles to [`QueryNode::All`] and only the structural predicates
//! constrain the result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::IndexField;
use crate::models::Filter;

/// Characters the index query language treats as operators.
pub const OPERATOR_CHARS: &[char] = &[
    '\\', '(', ')', '[', ']', '{', '}', '^', '~', ':', '!', '&', '|',
];

/// Searchable text fields and their ranking boosts, highest first.
pub const TEXT_FIELDS: [(IndexField, f32); 5] = [
    (IndexField::NameText, 2.0),
    (IndexField::Content, 1.5),
    (IndexField::Description, 1.5),
    (IndexField::GenreText, 1.2),
    (IndexField::Location, 1.0),
];

pub const EXACT_WEIGHT: f32 = 1.5;
pub const ANALYZED_WEIGHT: f32 = 1.0;
pub const PREFIX_WEIGHT: f32 = 1.2;
pub const CONTAINS_WEIGHT: f32 = 0.8;
pub const FUZZY_WEIGHT: f32 = 0.7;
pub const FUZZY_DISTANCE: u8 = 1;

/// How multiple free-text terms combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermPolicy {
    /// Any term may match; documents matching more terms score higher.
    #[default]
    Any,
    /// Every term must match somewhere.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WildcardPattern {
    /// `term*`
    Prefix,
    /// `*term*`
    Contains,
}

/// Engine-neutral query tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum QueryNode {
    /// Matches every document.
    All,
    /// Un-analyzed term on a text field.
    Term {
        field: IndexField,
        value: String,
        boost: f32,
    },
    /// Text analyzed with the field's tokenizer; any resulting token matches.
    Match {
        field: IndexField,
        text: String,
        boost: f32,
    },
    Wildcard {
        field: IndexField,
        term: String,
        pattern: WildcardPattern,
        boost: f32,
    },
    Fuzzy {
        field: IndexField,
        term: String,
        distance: u8,
        boost: f32,
    },
    /// Exact value of a keyword field.
    Keyword { field: IndexField, value: String },
    /// Exact value of an integer field.
    Int { field: IndexField, value: i64 },
    /// Inclusive integer range; `None` bounds are open.
    IntRange {
        field: IndexField,
        lower: Option<i64>,
        upper: Option<i64>,
    },
    /// A `(name, value)` tag pair.
    Tag { name: String, value: String },
    Or(Vec<QueryNode>),
    And(Vec<QueryNode>),
}

impl QueryNode {
    /// `And` of the given clauses, collapsing the trivial cases.
    pub fn and(mut clauses: Vec<QueryNode>) -> QueryNode {
        match clauses.len() {
            0 => QueryNode::All,
            1 => clauses.remove(0),
            _ => QueryNode::And(clauses),
        }
    }

    /// `Or` of the given clauses; a single clause stands alone.
    pub fn or(mut clauses: Vec<QueryNode>) -> QueryNode {
        if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            QueryNode::Or(clauses)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub term_policy: TermPolicy,
}

/// Output of [`compile`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    /// Text part AND structural predicates.
    pub root: QueryNode,
    /// Structural and extension predicates only.
    pub structural: Vec<QueryNode>,
    /// Sanitized free text (extensions removed), lowercased.
    pub normalized: String,
    /// Lowercased free-text terms.
    pub terms: Vec<String>,
    /// Every `key:value` extension seen, recognized or not.
    pub extensions: BTreeMap<String, String>,
}

impl CompiledQuery {
    /// True when no free text survived sanitization.
    pub fn is_degenerate(&self) -> bool {
        self.terms.is_empty()
    }

    /// True when some extension maps onto an index field.
    pub fn has_field_extensions(&self) -> bool {
        self.extensions.keys().any(|k| extension_field(k).is_some())
    }

    /// Query over the structural predicates alone.
    pub fn structural_root(&self) -> QueryNode {
        QueryNode::and(self.structural.clone())
    }
}

/// Replaces operator characters with spaces, collapses whitespace, trims.
pub fn sanitize(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if OPERATOR_CHARS.contains(&c) { ' ' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits raw input into free text and `key:value` extensions.
///
/// Keys are lowercased ASCII words; values are sanitized and lowercased.
/// A token whose value sanitizes to nothing stays in the free text.
pub fn extract_extensions(raw: &str) -> (String, BTreeMap<String, String>) {
    let mut free = Vec::new();
    let mut extensions = BTreeMap::new();
    for token in raw.split_whitespace() {
        match token.split_once(':') {
            Some((key, value)) if is_extension_key(key) => {
                let value = sanitize(value).to_lowercase();
                if value.is_empty() {
                    free.push(token);
                } else {
                    extensions.insert(key.to_ascii_lowercase(), value);
                }
            }
            _ => free.push(token),
        }
    }
    (free.join(" "), extensions)
}

fn is_extension_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Field an extension key restricts, if it is one the index understands.
pub fn extension_field(key: &str) -> Option<IndexField> {
    match key {
        "domain" => Some(IndexField::Domain),
        "language" | "lang" => Some(IndexField::Language),
        _ => None,
    }
}

/// Compiles search text and the filter's structural predicates.
pub fn compile(search: &str, filter: &Filter, options: &CompileOptions) -> CompiledQuery {
    let (free, extensions) = extract_extensions(search);
    let normalized = sanitize(&free).to_lowercase();
    let terms: Vec<String> = normalized.split_whitespace().map(str::to_string).collect();

    let mut structural = structural_predicates(filter);
    for (key, value) in &extensions {
        if let Some(field) = extension_field(key) {
            structural.push(QueryNode::Keyword {
                field,
                value: value.clone(),
            });
        }
    }

    let text = if terms.is_empty() {
        QueryNode::All
    } else {
        let per_term: Vec<QueryNode> = terms.iter().map(|t| term_node(t)).collect();
        match options.term_policy {
            TermPolicy::Any => QueryNode::or(per_term),
            TermPolicy::All => QueryNode::and(per_term),
        }
    };

    let mut clauses = Vec::with_capacity(structural.len() + 1);
    if text != QueryNode::All || structural.is_empty() {
        clauses.push(text);
    }
    clauses.extend(structural.iter().cloned());

    CompiledQuery {
        root: QueryNode::and(clauses),
        structural,
        normalized,
        terms,
        extensions,
    }
}

/// Disjunction of every match strategy over every searchable field.
pub fn term_node(term: &str) -> QueryNode {
    let mut alternatives = Vec::with_capacity(TEXT_FIELDS.len());
    for (field, boost) in TEXT_FIELDS {
        alternatives.push(QueryNode::Or(vec![
            QueryNode::Term {
                field,
                value: term.to_string(),
                boost: boost * EXACT_WEIGHT,
            },
            QueryNode::Match {
                field,
                text: term.to_string(),
                boost: boost * ANALYZED_WEIGHT,
            },
            QueryNode::Wildcard {
                field,
                term: term.to_string(),
                pattern: WildcardPattern::Prefix,
                boost: boost * PREFIX_WEIGHT,
            },
            QueryNode::Wildcard {
                field,
                term: term.to_string(),
                pattern: WildcardPattern::Contains,
                boost: boost * CONTAINS_WEIGHT,
            },
            QueryNode::Fuzzy {
                field,
                term: term.to_string(),
                distance: FUZZY_DISTANCE,
                boost: boost * FUZZY_WEIGHT,
            },
        ]));
    }
    QueryNode::Or(alternatives)
}

/// AND-able predicates for ids, authors, kinds, time range and tags.
pub fn structural_predicates(filter: &Filter) -> Vec<QueryNode> {
    let mut out = Vec::new();

    let ids = filter.id_list();
    if !ids.is_empty() {
        out.push(QueryNode::or(
            ids.iter()
                .map(|id| QueryNode::Keyword {
                    field: IndexField::Id,
                    value: id.clone(),
                })
                .collect(),
        ));
    }

    let authors = filter.author_list();
    if !authors.is_empty() {
        out.push(QueryNode::or(
            authors
                .iter()
                .map(|a| QueryNode::Keyword {
                    field: IndexField::Author,
                    value: a.clone(),
                })
                .collect(),
        ));
    }

    let kinds = filter.kind_list();
    if !kinds.is_empty() {
        out.push(QueryNode::or(
            kinds
                .iter()
                .map(|k| QueryNode::Int {
                    field: IndexField::Kind,
                    value: i64::from(*k),
                })
                .collect(),
        ));
    }

    if filter.since.is_some() || filter.until.is_some() {
        out.push(QueryNode::IntRange {
            field: IndexField::CreatedAt,
            lower: filter.since,
            upper: filter.until,
        });
    }

    for (name, values) in filter.tag_predicates() {
        out.push(QueryNode::or(
            values
                .iter()
                .map(|v| QueryNode::Tag {
                    name: name.to_string(),
                    value: v.clone(),
                })
                .collect(),
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any() -> CompileOptions {
        CompileOptions::default()
    }

    #[test]
    fn test_sanitize_strips_operators() {
        assert_eq!(sanitize("((()))"), "");
        assert_eq!(sanitize("  jazz   (radio)  "), "jazz radio");
        assert_eq!(sanitize(r"a\b!c&d|e^f~g:h"), "a b c d e f g h");
        assert_eq!(sanitize("[{}]"), "");
    }

    #[test]
    fn test_extensions_are_pulled_out() {
        let (free, ext) = extract_extensions("jazz domain:Example.COM include:spam radio");
        assert_eq!(free, "jazz radio");
        assert_eq!(ext.get("domain").map(String::as_str), Some("example.com"));
        assert_eq!(ext.get("include").map(String::as_str), Some("spam"));
    }

    #[test]
    fn test_recognized_extension_becomes_predicate() {
        let compiled = compile("jazz language:EN nsfw:true", &Filter::new(), &any());
        assert_eq!(compiled.terms, vec!["jazz"]);
        assert!(compiled.structural.contains(&QueryNode::Keyword {
            field: IndexField::Language,
            value: "en".into(),
        }));
        // nsfw is recorded but adds nothing.
        assert_eq!(compiled.structural.len(), 1);
        assert_eq!(compiled.extensions.len(), 2);
        assert!(compiled.has_field_extensions());
        assert!(!compile("jazz nsfw:true", &Filter::new(), &any()).has_field_extensions());
    }

    #[test]
    fn test_degenerate_query_is_match_all_with_structure() {
        let filter = Filter::new().with_kinds([31237]);
        let compiled = compile("((()))", &filter, &any());
        assert!(compiled.is_degenerate());
        assert_eq!(
            compiled.root,
            QueryNode::Int {
                field: IndexField::Kind,
                value: 31237
            }
        );

        let bare = compile("  ", &Filter::new(), &any());
        assert_eq!(bare.root, QueryNode::All);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let filter = Filter::new()
            .with_kinds([31237, 1])
            .with_authors(["pk"])
            .with_tag("t", "jazz");
        let a = compile("Jazz Radio domain:x.org", &filter, &any());
        let b = compile("Jazz Radio domain:x.org", &filter, &any());
        assert_eq!(a, b);
    }

    #[test]
    fn test_term_node_field_order_and_boosts() {
        let QueryNode::Or(fields) = term_node("jazz") else {
            panic!("expected a disjunction");
        };
        assert_eq!(fields.len(), TEXT_FIELDS.len());
        let QueryNode::Or(strategies) = &fields[0] else {
            panic!("expected per-field disjunction");
        };
        assert_eq!(strategies.len(), 5);
        assert_eq!(
            strategies[0],
            QueryNode::Term {
                field: IndexField::NameText,
                value: "jazz".into(),
                boost: 3.0,
            }
        );
        match &strategies[4] {
            QueryNode::Fuzzy { distance, boost, .. } => {
                assert_eq!(*distance, 1);
                assert!((boost - 1.4).abs() < 1e-6);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_term_policy() {
        let or = compile("jazz blues", &Filter::new(), &any());
        assert!(matches!(&or.root, QueryNode::Or(terms) if terms.len() == 2));

        let all = compile(
            "jazz blues",
            &Filter::new(),
            &CompileOptions {
                term_policy: TermPolicy::All,
            },
        );
        assert!(matches!(&all.root, QueryNode::And(terms) if terms.len() == 2));
    }

    #[test]
    fn test_structural_predicates_are_anded() {
        let mut filter = Filter::new().with_authors(["a", "b"]).with_tag("l", "en");
        filter.since = Some(10);
        let compiled = compile("jazz", &filter, &any());
        let QueryNode::And(clauses) = &compiled.root else {
            panic!("expected conjunction");
        };
        assert_eq!(clauses.len(), 4);
        assert!(clauses.contains(&QueryNode::IntRange {
            field: IndexField::CreatedAt,
            lower: Some(10),
            upper: None,
        }));
        assert!(clauses.contains(&QueryNode::Tag {
            name: "l".into(),
            value: "en".into(),
        }));
    }

    #[test]
    fn test_normalized_text_drops_extensions() {
        let compiled = compile("Jazz Radio!! lang:fr", &Filter::new(), &any());
        assert_eq!(compiled.normalized, "jazz radio");
    }
}
