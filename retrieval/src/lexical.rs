//! BM25 keyword search over stored records.
//!
//! This module wraps the [`bm25`](https://crates.io/crates/bm25) crate. Each record is indexed
//! as the space-joined concatenation of its configured [`LexicalField`]s; tokenization, case
//! folding, stop words and stemming are those of the crate's English tokenizer.
//!
//! Relevance ties are broken by ascending [`DocId`], so an unchanged index returns the same
//! order for the same query every time.

use bm25::{Document as Bm25Document, Language, SearchEngine, SearchEngineBuilder};
use ordered_float::OrderedFloat;
use std::collections::BTreeMap;

use crate::error::{IndexError, Result};
use crate::types::{DocId, LexicalField, Record};

/// Keyword index derived from the document store.
pub struct LexicalIndex {
    fields: Vec<LexicalField>,
    texts: BTreeMap<DocId, String>,
    engine: SearchEngine<u64>,
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("fields", &self.fields)
            .field("len", &self.texts.len())
            .finish_non_exhaustive()
    }
}

impl LexicalIndex {
    /// Creates an empty index over `fields`.
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = LexicalField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            texts: BTreeMap::new(),
            engine: Self::engine_for(&BTreeMap::new()),
        }
    }

    /// Builds an index over `records` in one pass.
    #[must_use]
    pub fn from_records<'a>(
        fields: impl IntoIterator<Item = LexicalField>,
        records: impl IntoIterator<Item = &'a Record>,
    ) -> Self {
        let mut index = Self::new(fields);
        index.rebuild_or_update(records);
        index
    }

    fn engine_for(texts: &BTreeMap<DocId, String>) -> SearchEngine<u64> {
        let documents: Vec<Bm25Document<u64>> = texts
            .iter()
            .map(|(id, text)| Bm25Document {
                id: id.as_u64(),
                contents: text.clone(),
            })
            .collect();
        SearchEngineBuilder::<u64>::with_documents(Language::English, documents).build()
    }

    fn indexed_text(&self, record: &Record) -> String {
        self.fields
            .iter()
            .map(|field| field.extract(&record.document))
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Indexes `records`, replacing the text of any record already present.
    ///
    /// A record whose configured fields are all empty is dropped from the index: it stays
    /// reachable by identifier but never matches a keyword query. Corpus statistics are
    /// recomputed over the merged contents.
    pub fn rebuild_or_update<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) {
        for record in records {
            let text = self.indexed_text(record);
            if text.is_empty() {
                self.texts.remove(&record.id);
            } else {
                self.texts.insert(record.id, text);
            }
        }
        self.engine = Self::engine_for(&self.texts);
    }

    /// Returns up to `limit` matching records, most relevant first.
    ///
    /// # Errors
    /// Returns [`IndexError::InvalidQuery`] if `query` is empty or whitespace.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<(DocId, f32)>> {
        if query.trim().is_empty() {
            return Err(IndexError::InvalidQuery);
        }
        if limit == 0 || self.texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<(DocId, f32)> = self
            .engine
            .search(query, self.texts.len())
            .into_iter()
            .map(|result| (DocId::from_u64(result.document.id), result.score))
            .collect();

        hits.sort_unstable_by(|(a_id, a_score), (b_id, b_score)| {
            OrderedFloat(*b_score)
                .cmp(&OrderedFloat(*a_score))
                .then_with(|| a_id.cmp(b_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Returns `true` if `id` has indexed text.
    #[must_use]
    pub fn contains(&self, id: DocId) -> bool {
        self.texts.contains_key(&id)
    }

    /// Returns the indexed fields.
    #[must_use]
    pub fn fields(&self) -> &[LexicalField] {
        &self.fields
    }

    /// Returns the number of indexed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    /// Returns `true` if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new(LexicalField::ALL)
    }
}
