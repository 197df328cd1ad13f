//! Immutable published view of the derived indexes.

use std::sync::Arc;

use crate::index::VectorIndex;
use crate::lexical::LexicalIndex;
use crate::types::LexicalField;

/// The pair of search views readers query against.
///
/// A snapshot is never mutated. A build publishes a new one with a single pointer swap, and a
/// reader that loaded the old one keeps using it until its query completes.
#[derive(Debug, Clone)]
pub struct Snapshot {
    vectors: Arc<VectorIndex>,
    lexical: Arc<LexicalIndex>,
}

impl Snapshot {
    /// Creates a snapshot from its two views.
    #[must_use]
    pub const fn new(vectors: Arc<VectorIndex>, lexical: Arc<LexicalIndex>) -> Self {
        Self { vectors, lexical }
    }

    /// A snapshot with nothing indexed.
    #[must_use]
    pub fn empty(dimension: usize, fields: impl IntoIterator<Item = LexicalField>) -> Self {
        Self::new(
            Arc::new(VectorIndex::empty(dimension)),
            Arc::new(LexicalIndex::new(fields)),
        )
    }

    /// Returns a copy of this snapshot with the vector view replaced.
    #[must_use]
    pub fn with_vectors(&self, vectors: Arc<VectorIndex>) -> Self {
        Self::new(vectors, Arc::clone(&self.lexical))
    }

    /// The vector index and identity map.
    #[must_use]
    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    /// The keyword index.
    #[must_use]
    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }
}
