//! Exact brute-force vector index.

use ordered_float::OrderedFloat;
use paperdex_core::{Embedding, vector};
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::types::DocId;

use super::{IdentityMap, VectorHit};

/// Immutable flat index of unit vectors with its identity map.
///
/// Vectors are stored row-major in one contiguous buffer. Search computes the inner product
/// against every row in parallel and ranks by true similarity, breaking ties by ascending
/// identifier. The index is never mutated after construction; a rebuild produces a new one.
///
/// # Example
///
/// ```rust
/// use paperdex_retrieval::DocId;
/// use paperdex_retrieval::index::VectorIndex;
///
/// let index = VectorIndex::build(
///     2,
///     vec![
///         (DocId::from_u64(1), vec![1.0, 0.0]),
///         (DocId::from_u64(2), vec![0.0, 3.0]),
///     ],
///     1e-3,
/// )
/// .unwrap();
///
/// let hits = index.search(&[0.0, 1.0], 1).unwrap();
/// assert_eq!(hits[0].id, DocId::from_u64(2));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
    ids: IdentityMap,
}

impl VectorIndex {
    /// Creates an index with no vectors.
    #[must_use]
    pub const fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
            ids: IdentityMap::from_vec(Vec::new()),
        }
    }

    /// Builds an index from `(identifier, vector)` pairs, preserving their order.
    ///
    /// Vectors within `tolerance` of unit norm are stored as given. Vectors further off are
    /// normalized and logged rather than rejected. `tolerance` is never tighter than
    /// [`vector::rounding_slack`] for `dimension`, so a vector that already went through
    /// [`vector::normalize`] is stored bit-for-bit.
    ///
    /// # Errors
    /// - [`IndexError::DimensionMismatch`] if any vector's length differs from `dimension`.
    /// - [`IndexError::NotNormalized`] if a vector has zero or non-finite norm.
    /// - [`IndexError::InvalidRecord`] if an identifier appears twice.
    pub fn build<I>(dimension: usize, pairs: I, tolerance: f32) -> Result<Self>
    where
        I: IntoIterator<Item = (DocId, Embedding)>,
    {
        let tolerance = tolerance.max(vector::rounding_slack(dimension));
        let pairs = pairs.into_iter();
        let (lower, _) = pairs.size_hint();
        let mut data = Vec::with_capacity(lower * dimension);
        let mut ids = Vec::with_capacity(lower);
        let mut seen = HashSet::with_capacity(lower);

        for (id, mut embedding) in pairs {
            if embedding.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }
            if !seen.insert(id) {
                return Err(IndexError::InvalidRecord(format!(
                    "identifier {id} appears twice in one build"
                )));
            }
            let norm = vector::l2_norm(&embedding);
            if norm == 0.0 || !norm.is_finite() {
                return Err(IndexError::NotNormalized { norm });
            }
            if !vector::is_unit(norm, tolerance) {
                vector::normalize(&mut embedding);
                debug!(%id, norm, "renormalized vector outside tolerance");
            }
            data.extend_from_slice(&embedding);
            ids.push(id);
        }

        Ok(Self {
            dimension,
            data,
            ids: IdentityMap::from_vec(ids),
        })
    }

    /// Reassembles an index from persisted halves.
    ///
    /// # Errors
    /// Returns [`IndexError::CorruptIndex`] if the halves disagree in length.
    pub fn from_parts(dimension: usize, ids: Vec<DocId>, data: Vec<f32>) -> Result<Self> {
        if dimension == 0 && !ids.is_empty() {
            return Err(IndexError::CorruptIndex(
                "vectors of dimension 0 cannot be indexed".into(),
            ));
        }
        if data.len() != ids.len() * dimension {
            return Err(IndexError::CorruptIndex(format!(
                "identity map has {} entries but vector data holds {} floats of dimension {}",
                ids.len(),
                data.len(),
                dimension
            )));
        }
        let unique: HashSet<DocId> = ids.iter().copied().collect();
        if unique.len() != ids.len() {
            return Err(IndexError::CorruptIndex(
                "identity map contains duplicate identifiers".into(),
            ));
        }
        Ok(Self {
            dimension,
            data,
            ids: IdentityMap::from_vec(ids),
        })
    }

    /// Returns the `k` rows most similar to `query`.
    ///
    /// `query` must already be unit length; the result is ordered by descending inner product,
    /// then ascending identifier.
    ///
    /// # Errors
    /// - [`IndexError::DimensionMismatch`] if `query` has the wrong length.
    /// - [`IndexError::IndexEmpty`] if the index holds no vectors.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if self.is_empty() {
            return Err(IndexError::IndexEmpty);
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<VectorHit> = self
            .data
            .par_chunks_exact(self.dimension)
            .zip(self.ids.as_slice().par_iter())
            .map(|(row, &id)| VectorHit {
                id,
                score: vector::dot(row, query),
            })
            .collect();

        hits.sort_unstable_by(|a, b| {
            OrderedFloat(b.score)
                .cmp(&OrderedFloat(a.score))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Returns the stored vector at row `position`.
    #[must_use]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Returns the stored vector for `id`, if it is indexed.
    #[must_use]
    pub fn vector_of(&self, id: DocId) -> Option<&[f32]> {
        self.ids.position(id).and_then(|position| self.vector(position))
    }

    /// Returns the identity map.
    #[must_use]
    pub const fn identity(&self) -> &IdentityMap {
        &self.ids
    }

    /// Returns the raw row-major vector data.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns the vector dimension.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the number of indexed vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if the index holds no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
