//! Text index engine adapter (tantivy).
//!
//! [`SearchIndex`] wraps one tantivy index directory: it owns the schema
//! handles, the single writer, and a manually reloaded reader. Records are
//! projected through [`IndexDocument`] and written keyed by id, so an
//! upsert is a delete-by-id followed by an add.
//!
//! Compiled [`QueryNode`] trees are lowered here onto tantivy primitives:
//!
//! | Node | tantivy query |
//! |------|---------------|
//! | `All` | `AllQuery` |
//! | `Term` / `Keyword` / `Int` / `Tag` | `TermQuery` |
//! | `Match` | field tokenizer, then `TermQuery` per token (`Should`) |
//! | `Wildcard` | `RegexQuery` (`term.*` / `.*term.*`) |
//! | `Fuzzy` | `FuzzyTermQuery` |
//! | `IntRange` | `RangeQuery` over the fast field |
//! | `Or` / `And` | `BooleanQuery` with `Should` / `Must` |
//!
//! # Generations
//!
//! [`IndexLayout`] manages the index root on disk:
//!
//! ```text
//! <root>/
//!   CURRENT                      ← name of the live generation
//!   gen-20240101T120000Z-1a2b3c4d/
//!   gen-20240102T090000Z-5e6f7a8b/   ← built by a reindex, then promoted
//! ```
//!
//! Rebuilds never write into the live generation.

use std::fs;
use std::io::ErrorKind;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use tantivy::collector::TopDocs;
use tantivy::query::{
    AllQuery, BooleanQuery, BoostQuery, EmptyQuery, FuzzyTermQuery, Occur, Query, RangeQuery,
    RegexQuery, TermQuery,
};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, Value, FAST, INDEXED, STORED, STRING, TEXT,
};
use tantivy::tokenizer::TokenStream;
use tantivy::{
    DocAddress, Index, IndexReader, IndexWriter, Order, ReloadPolicy, Searcher, TantivyDocument,
    Term,
};
use tracing::{debug, info, warn};

use relay_search_core::document::{tag_token, FieldType, IndexDocument, IndexField};
use relay_search_core::models::Record;
use relay_search_core::query::{QueryNode, WildcardPattern};

use crate::config::ResultOrder;
use crate::error::IndexError;

pub const CURRENT_FILE: &str = "CURRENT";
const GENERATION_PREFIX: &str = "gen-";

/// Schema field handles, addressable by [`IndexField`].
#[derive(Clone)]
pub struct Fields {
    handles: Vec<Field>,
}

impl Fields {
    pub fn get(&self, field: IndexField) -> Field {
        self.handles[field as usize]
    }
}

pub fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let handles = IndexField::ALL
        .iter()
        .map(|field| match field.field_type() {
            FieldType::Keyword => builder.add_text_field(field.as_str(), STRING | STORED),
            FieldType::Text => builder.add_text_field(field.as_str(), TEXT | STORED),
            FieldType::Int => builder.add_i64_field(field.as_str(), INDEXED | STORED | FAST),
        })
        .collect();
    (builder.build(), Fields { handles })
}

fn fields_from_schema(schema: &Schema, path: &Path) -> Result<Fields, IndexError> {
    let mut handles = Vec::with_capacity(IndexField::ALL.len());
    for field in IndexField::ALL {
        let handle = schema
            .get_field(field.as_str())
            .map_err(|_| IndexError::SchemaMismatch {
                path: path.display().to_string(),
                field: field.as_str(),
            })?;
        handles.push(handle);
    }
    Ok(Fields { handles })
}

/// A ranked match with the stored fields needed for materialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexHit {
    pub id: String,
    pub author: Option<String>,
    pub created_at: Option<i64>,
    pub kind: Option<u32>,
    pub content: Option<String>,
    pub name: Option<String>,
    pub name_normalized: Option<String>,
    pub description: Option<String>,
    pub genres: Vec<String>,
    /// Relevance score; absent when ordered by recency.
    pub score: Option<f32>,
}

impl IndexHit {
    /// Best-effort record from stored fields: empty signature, no tags.
    ///
    /// Returns `None` unless both content and author were stored.
    pub fn to_partial_record(&self) -> Option<Record> {
        let author = self.author.as_deref().filter(|a| !a.is_empty())?;
        let content = self.content.as_deref().filter(|c| !c.is_empty())?;
        Some(Record {
            id: self.id.clone(),
            author: author.to_string(),
            created_at: self.created_at.unwrap_or_default(),
            kind: self.kind.unwrap_or_default(),
            tags: Vec::new(),
            content: content.to_string(),
            signature: String::new(),
        })
    }
}

/// One on-disk tantivy index and its writer.
pub struct SearchIndex {
    index: Index,
    fields: Fields,
    reader: IndexReader,
    writer: Mutex<Option<IndexWriter>>,
    read_only: bool,
    path: PathBuf,
}

impl SearchIndex {
    /// Creates a new, empty index at `path`. The directory must not hold an index.
    pub fn create(path: &Path, writer_heap_bytes: usize) -> Result<Self, IndexError> {
        fs::create_dir_all(path)?;
        let (schema, fields) = build_schema();
        let index = Index::create_in_dir(path, schema)?;
        info!(path = %path.display(), "created search index");
        Self::assemble(index, fields, Some(writer_heap_bytes), path)
    }

    /// Opens an existing index for reading and writing.
    pub fn open(path: &Path, writer_heap_bytes: usize) -> Result<Self, IndexError> {
        let index = Index::open_in_dir(path)?;
        let fields = fields_from_schema(&index.schema(), path)?;
        Self::assemble(index, fields, Some(writer_heap_bytes), path)
    }

    /// Opens an existing index without taking the writer lock.
    pub fn open_read_only(path: &Path) -> Result<Self, IndexError> {
        let index = Index::open_in_dir(path)?;
        let fields = fields_from_schema(&index.schema(), path)?;
        Self::assemble(index, fields, None, path)
    }

    fn assemble(
        index: Index,
        fields: Fields,
        writer_heap_bytes: Option<usize>,
        path: &Path,
    ) -> Result<Self, IndexError> {
        let writer = match writer_heap_bytes {
            Some(heap) => {
                let writer: IndexWriter = index.writer_with_num_threads(1, heap)?;
                Some(writer)
            }
            None => None,
        };
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            fields,
            reader,
            read_only: writer.is_none(),
            writer: Mutex::new(writer),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn field(&self, field: IndexField) -> Field {
        self.fields.get(field)
    }

    fn writer_unavailable(&self) -> IndexError {
        if self.read_only {
            IndexError::ReadOnly(self.path.display().to_string())
        } else {
            IndexError::Closed
        }
    }

    /// Stages the projection of `record`, replacing any document with the same id.
    pub fn upsert(&self, record: &Record) -> Result<(), IndexError> {
        let projected = IndexDocument::from_record(record);
        let document = self.to_document(&projected);
        let guard = self.writer.lock();
        let writer = guard.as_ref().ok_or_else(|| self.writer_unavailable())?;
        writer.delete_term(Term::from_field_text(self.field(IndexField::Id), &projected.id));
        writer.add_document(document)?;
        Ok(())
    }

    /// Stages removal of the document with `id`.
    pub fn delete(&self, id: &str) -> Result<(), IndexError> {
        let guard = self.writer.lock();
        let writer = guard.as_ref().ok_or_else(|| self.writer_unavailable())?;
        writer.delete_term(Term::from_field_text(self.field(IndexField::Id), id));
        Ok(())
    }

    /// Commits staged changes and makes them visible to new searches.
    pub fn commit(&self) -> Result<(), IndexError> {
        {
            let mut guard = self.writer.lock();
            let writer = guard.as_mut().ok_or_else(|| self.writer_unavailable())?;
            writer.commit()?;
        }
        self.reader.reload()?;
        Ok(())
    }

    /// Releases the writer (and its directory lock). Searches keep working.
    pub fn close(&self) -> Result<(), IndexError> {
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            writer.wait_merging_threads()?;
            debug!(path = %self.path.display(), "closed index writer");
        }
        Ok(())
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Runs `query`, returning at most `limit` hits in the requested order.
    pub fn search(
        &self,
        query: &QueryNode,
        limit: usize,
        order: ResultOrder,
    ) -> Result<Vec<IndexHit>, IndexError> {
        let searcher = self.reader.searcher();
        // The collector preallocates for `limit`; it can never return more
        // than the live documents.
        let limit = limit.min(usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX));
        if limit == 0 {
            return Ok(Vec::new());
        }
        let lowered = self.lower(query)?;

        let addresses: Vec<(Option<f32>, DocAddress)> = match order {
            ResultOrder::Relevance => searcher
                .search(lowered.as_ref(), &TopDocs::with_limit(limit))?
                .into_iter()
                .map(|(score, address)| (Some(score), address))
                .collect(),
            ResultOrder::Recency => searcher
                .search(
                    lowered.as_ref(),
                    &TopDocs::with_limit(limit)
                        .order_by_fast_field::<i64>(IndexField::CreatedAt.as_str(), Order::Desc),
                )?
                .into_iter()
                .map(|(_, address)| (None, address))
                .collect(),
        };

        let mut hits = Vec::with_capacity(addresses.len());
        for (score, address) in addresses {
            let hit = self.read_hit(&searcher, address, score)?;
            if !hit.id.is_empty() {
                hits.push(hit);
            }
        }
        Ok(hits)
    }

    fn read_hit(
        &self,
        searcher: &Searcher,
        address: DocAddress,
        score: Option<f32>,
    ) -> Result<IndexHit, IndexError> {
        let doc: TantivyDocument = searcher.doc(address)?;
        let text = |field: IndexField| {
            doc.get_first(self.field(field))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let int = |field: IndexField| doc.get_first(self.field(field)).and_then(|v| v.as_i64());

        Ok(IndexHit {
            id: text(IndexField::Id).unwrap_or_default(),
            author: text(IndexField::Author),
            created_at: int(IndexField::CreatedAt),
            kind: int(IndexField::Kind).and_then(|k| u32::try_from(k).ok()),
            content: text(IndexField::Content),
            name: text(IndexField::Name),
            name_normalized: text(IndexField::NameNormalized),
            description: text(IndexField::Description),
            genres: doc
                .get_all(self.field(IndexField::Genre))
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            score,
        })
    }

    fn to_document(&self, projected: &IndexDocument) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.field(IndexField::Id), &projected.id);
        doc.add_text(self.field(IndexField::Author), &projected.author);
        doc.add_i64(self.field(IndexField::CreatedAt), projected.created_at);
        doc.add_i64(self.field(IndexField::Kind), i64::from(projected.kind));
        doc.add_text(self.field(IndexField::Content), &projected.content);

        if let Some(name) = &projected.name {
            doc.add_text(self.field(IndexField::Name), name);
            doc.add_text(self.field(IndexField::NameText), name);
        }
        let optional = [
            (IndexField::NameNormalized, &projected.name_normalized),
            (IndexField::Description, &projected.description),
            (IndexField::Location, &projected.location),
            (IndexField::CountryCode, &projected.country_code),
            (IndexField::Website, &projected.website),
            (IndexField::Domain, &projected.domain),
        ];
        for (field, value) in optional {
            if let Some(value) = value {
                doc.add_text(self.field(field), value);
            }
        }
        for genre in &projected.genres {
            doc.add_text(self.field(IndexField::Genre), genre);
            doc.add_text(self.field(IndexField::GenreText), genre);
        }
        for language in &projected.languages {
            doc.add_text(self.field(IndexField::Language), language);
        }
        for (name, value) in &projected.tags {
            doc.add_text(self.field(IndexField::Tags), tag_token(name, value));
        }
        doc
    }

    /// Tokens `text` produces under the field's analyzer.
    fn analyze(&self, field: IndexField, text: &str) -> Result<Vec<Term>, IndexError> {
        let handle = self.field(field);
        let mut analyzer = self.index.tokenizer_for_field(handle)?;
        let mut stream = analyzer.token_stream(text);
        let mut terms = Vec::new();
        stream.process(&mut |token| terms.push(Term::from_field_text(handle, &token.text)));
        Ok(terms)
    }

    fn lower(&self, node: &QueryNode) -> Result<Box<dyn Query>, IndexError> {
        let query: Box<dyn Query> = match node {
            QueryNode::All => Box::new(AllQuery),
            QueryNode::Term { field, value, boost } => boosted(
                Box::new(TermQuery::new(
                    Term::from_field_text(self.field(*field), value),
                    IndexRecordOption::WithFreqs,
                )),
                *boost,
            ),
            QueryNode::Match { field, text, boost } => {
                let mut terms = self.analyze(*field, text)?;
                let inner: Box<dyn Query> = match terms.len() {
                    0 => Box::new(EmptyQuery),
                    1 => Box::new(TermQuery::new(
                        terms.remove(0),
                        IndexRecordOption::WithFreqs,
                    )),
                    _ => Box::new(BooleanQuery::new(
                        terms
                            .into_iter()
                            .map(|term| {
                                let q: Box<dyn Query> = Box::new(TermQuery::new(
                                    term,
                                    IndexRecordOption::WithFreqs,
                                ));
                                (Occur::Should, q)
                            })
                            .collect(),
                    )),
                };
                boosted(inner, *boost)
            }
            QueryNode::Wildcard {
                field,
                term,
                pattern,
                boost,
            } => {
                let escaped = regex::escape(term);
                let regex = match pattern {
                    WildcardPattern::Prefix => format!("{escaped}.*"),
                    WildcardPattern::Contains => format!(".*{escaped}.*"),
                };
                boosted(
                    Box::new(RegexQuery::from_pattern(&regex, self.field(*field))?),
                    *boost,
                )
            }
            QueryNode::Fuzzy {
                field,
                term,
                distance,
                boost,
            } => boosted(
                Box::new(FuzzyTermQuery::new(
                    Term::from_field_text(self.field(*field), term),
                    *distance,
                    true,
                )),
                *boost,
            ),
            QueryNode::Keyword { field, value } => Box::new(TermQuery::new(
                Term::from_field_text(self.field(*field), value),
                IndexRecordOption::Basic,
            )),
            QueryNode::Int { field, value } => Box::new(TermQuery::new(
                Term::from_field_i64(self.field(*field), *value),
                IndexRecordOption::Basic,
            )),
            QueryNode::IntRange {
                field,
                lower,
                upper,
            } => Box::new(RangeQuery::new_i64_bounds(
                field.as_str().to_string(),
                lower.map_or(Bound::Unbounded, Bound::Included),
                upper.map_or(Bound::Unbounded, Bound::Included),
            )),
            QueryNode::Tag { name, value } => Box::new(TermQuery::new(
                Term::from_field_text(self.field(IndexField::Tags), &tag_token(name, value)),
                IndexRecordOption::Basic,
            )),
            QueryNode::Or(children) => Box::new(BooleanQuery::new(
                self.lower_children(children, Occur::Should)?,
            )),
            QueryNode::And(children) => Box::new(BooleanQuery::new(
                self.lower_children(children, Occur::Must)?,
            )),
        };
        Ok(query)
    }

    fn lower_children(
        &self,
        children: &[QueryNode],
        occur: Occur,
    ) -> Result<Vec<(Occur, Box<dyn Query>)>, IndexError> {
        children
            .iter()
            .map(|child| Ok((occur, self.lower(child)?)))
            .collect()
    }
}

fn boosted(query: Box<dyn Query>, boost: f32) -> Box<dyn Query> {
    if (boost - 1.0).abs() < f32::EPSILON {
        query
    } else {
        Box::new(BoostQuery::new(query, boost))
    }
}

/// Generation directories plus the `CURRENT` pointer under one root.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    root: PathBuf,
}

impl IndexLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory named by `CURRENT`, if any.
    pub fn current(&self) -> Result<Option<PathBuf>, IndexError> {
        match fs::read_to_string(self.root.join(CURRENT_FILE)) {
            Ok(name) => {
                let name = name.trim();
                Ok((!name.is_empty()).then(|| self.root.join(name)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A fresh, not yet existing generation directory.
    pub fn new_generation(&self) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.root
            .join(format!("{GENERATION_PREFIX}{stamp}-{}", &suffix[..8]))
    }

    /// Points `CURRENT` at `dir` (temp file + rename).
    pub fn promote(&self, dir: &Path) -> Result<(), IndexError> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                IndexError::Io(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("not a generation directory: {}", dir.display()),
                ))
            })?;
        fs::create_dir_all(&self.root)?;
        let tmp = self.root.join(format!("{CURRENT_FILE}.tmp"));
        fs::write(&tmp, format!("{name}\n"))?;
        fs::rename(&tmp, self.root.join(CURRENT_FILE))?;
        info!(generation = name, "promoted search index generation");
        Ok(())
    }

    /// Removes generation directories other than the current one.
    pub fn prune_stale(&self) -> Result<usize, IndexError> {
        let current = self.current()?;
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let is_generation = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(GENERATION_PREFIX));
            if !is_generation || !path.is_dir() || current.as_deref() == Some(path.as_path()) {
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale generation"),
            }
        }
        Ok(removed)
    }

    /// Opens the current generation, creating and promoting an empty one if needed.
    pub fn open_or_create(&self, writer_heap_bytes: usize) -> Result<SearchIndex, IndexError> {
        fs::create_dir_all(&self.root)?;
        if let Some(dir) = self.current()? {
            if dir.is_dir() {
                return SearchIndex::open(&dir, writer_heap_bytes);
            }
            warn!(path = %dir.display(), "CURRENT names a missing generation, starting empty");
        }
        let dir = self.new_generation();
        let index = SearchIndex::create(&dir, writer_heap_bytes)?;
        self.promote(&dir)?;
        Ok(index)
    }

    /// Opens the current generation read-only; `None` when there is none.
    pub fn open_current_read_only(&self) -> Result<Option<SearchIndex>, IndexError> {
        match self.current()? {
            Some(dir) if dir.is_dir() => SearchIndex::open_read_only(&dir).map(Some),
            _ => Ok(None),
        }
    }
}
