//! Vector index for semantic search.
//!
//! This module provides the immutable [`VectorIndex`] and the [`IdentityMap`] that ties each of
//! its rows back to a stored record. The two are built together and swapped together: a row
//! position is only meaningful inside the index it came from.

mod flat;

pub use flat::VectorIndex;

use crate::types::DocId;

/// Mapping from vector row position to record identifier.
///
/// Position `i` names the record whose embedding occupies row `i` of the owning
/// [`VectorIndex`]. Identifiers are unique within one map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityMap {
    ids: Vec<DocId>,
}

impl IdentityMap {
    pub(crate) const fn from_vec(ids: Vec<DocId>) -> Self {
        Self { ids }
    }

    /// Returns the identifier stored at row `position`.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<DocId> {
        self.ids.get(position).copied()
    }

    /// Returns the row position of `id`, if it is indexed.
    #[must_use]
    pub fn position(&self, id: DocId) -> Option<usize> {
        self.ids.iter().position(|&candidate| candidate == id)
    }

    /// Returns every identifier in row order.
    #[must_use]
    pub fn as_slice(&self) -> &[DocId] {
        &self.ids
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if the map has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A nearest-neighbour hit: record identifier plus inner-product similarity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VectorHit {
    /// Identifier resolved through the identity map.
    pub id: DocId,
    /// Inner product with the query, in `[-1, 1]` for unit vectors.
    pub score: f32,
}
