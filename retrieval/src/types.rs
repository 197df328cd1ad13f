//! Core types for the retrieval crate.

use paperdex_core::Embedding;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IndexError;

/// Opaque, store-assigned identifier of a record.
///
/// Identifiers are allocated once per `external_id` and never reused for another key, so every
/// cross-reference (identity map, lexical postings) uses this type instead of the natural key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(u64);

impl DocId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The mutable content of a catalogue entry, keyed by `external_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Natural key, typically the paper's source URL.
    pub external_id: String,
    /// Paper title.
    pub title: String,
    /// Author list as a single display string.
    pub authors: String,
    /// Optional keywords, indexed lexically when present.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Unit-length embedding of [`Document::text_for_embedding`], if one was obtained.
    #[serde(default)]
    pub embedding: Option<Embedding>,
}

impl Document {
    /// Creates a document without keywords or embedding.
    #[must_use]
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        authors: impl Into<String>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            authors: authors.into(),
            keywords: Vec::new(),
            embedding: None,
        }
    }

    /// Attaches keywords.
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches an embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Text handed to the embedding pipeline: the title, followed by ` | authors` when known.
    #[must_use]
    pub fn text_for_embedding(&self) -> String {
        if self.authors.is_empty() {
            self.title.clone()
        } else {
            format!("{} | {}", self.title, self.authors)
        }
    }
}

/// A stored document together with its internal identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned identifier.
    pub id: DocId,
    /// Stored content.
    #[serde(flatten)]
    pub document: Document,
}

impl Record {
    /// Creates a record.
    #[must_use]
    pub const fn new(id: DocId, document: Document) -> Self {
        Self { id, document }
    }
}

/// A record returned by the query router along with its relevance score.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoredRecord {
    /// The resolved record.
    pub record: Record,
    /// BM25 relevance for lexical queries, inner-product similarity for semantic ones.
    pub score: f32,
}

/// A raw row produced by the source feed, before validation.
///
/// Deserializes from the scraper's `papers.json` rows, where the external key is called `link`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Natural key. Rows without one are rejected.
    #[serde(default, alias = "link")]
    pub external_id: Option<String>,
    /// Paper title.
    #[serde(default)]
    pub title: String,
    /// Author list.
    #[serde(default)]
    pub authors: String,
    /// Optional keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl SourceRecord {
    /// Creates a source row with an external id.
    #[must_use]
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        authors: impl Into<String>,
    ) -> Self {
        Self {
            external_id: Some(external_id.into()),
            title: title.into(),
            authors: authors.into(),
            keywords: Vec::new(),
        }
    }

    /// Converts the row into a [`Document`], rejecting rows without a usable external id.
    ///
    /// # Errors
    /// Returns [`IndexError::InvalidRecord`] when `external_id` is missing or blank.
    pub fn into_document(self) -> Result<Document, IndexError> {
        let external_id = match self.external_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => {
                return Err(IndexError::InvalidRecord(format!(
                    "missing external_id for record titled {:?}",
                    self.title
                )));
            }
        };
        Ok(Document {
            external_id,
            title: self.title,
            authors: self.authors,
            keywords: self.keywords,
            embedding: None,
        })
    }
}

/// Search path selected by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// BM25 keyword search over the lexical view.
    Lexical,
    /// Nearest-neighbour search over the vector view.
    Semantic,
}

impl SearchMode {
    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Semantic => "semantic",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lexical" | "exact" => Ok(Self::Lexical),
            "semantic" => Ok(Self::Semantic),
            _ => Err(IndexError::InvalidMode(s.to_string())),
        }
    }
}

/// Text fields that feed the lexical view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LexicalField {
    /// [`Document::title`].
    Title,
    /// [`Document::authors`].
    Authors,
    /// [`Document::keywords`], space-joined.
    Keywords,
}

impl LexicalField {
    /// Every field, in indexing order.
    pub const ALL: [Self; 3] = [Self::Title, Self::Authors, Self::Keywords];

    pub(crate) fn extract(self, document: &Document) -> String {
        match self {
            Self::Title => document.title.clone(),
            Self::Authors => document.authors.clone(),
            Self::Keywords => document.keywords.join(" "),
        }
    }
}
