//! # Embedding pipeline
//!
//! An embedding model turns a piece of text into a fixed-length vector whose direction captures
//! its meaning. Paperdex uses it twice: the index builder embeds every catalogue record, and the
//! query router embeds the incoming query so both land in the same vector space.
//!
//! The dimension reported by [`EmbeddingModel::dim`] is fixed for the lifetime of an index. The
//! builder and the router must be handed models that agree on it, otherwise every query fails
//! with a dimension mismatch.
//!
//! ```rust
//! use paperdex_core::EmbeddingModel;
//!
//! async fn describe<T: EmbeddingModel>(model: &T) -> paperdex_core::Result {
//!     let vector = model.embed("Denoising diffusion probabilistic models").await?;
//!     assert_eq!(vector.len(), model.dim());
//!     Ok(())
//! }
//! ```

use core::future::Future;
use std::sync::Arc;

/// A dense embedding vector of 32-bit floats.
pub type Embedding = Vec<f32>;

/// Converts text to vector representations.
///
/// Implementations are expected to return unit-length vectors of length [`dim`](Self::dim), but
/// consumers in this workspace do not rely on it: they validate the length and renormalize.
///
/// Failures (network errors, rate limits, a model that refuses the input) are reported through
/// the returned [`crate::Result`]. Callers decide whether a failure is fatal; the index builder,
/// for instance, only drops the affected record.
///
/// # Example
///
/// ```rust
/// use paperdex_core::EmbeddingModel;
///
/// struct Constant;
///
/// impl EmbeddingModel for Constant {
///     fn dim(&self) -> usize {
///         3
///     }
///
///     async fn embed(&self, _text: &str) -> paperdex_core::Result<Vec<f32>> {
///         Ok(vec![1.0, 0.0, 0.0])
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let vector = Constant.embed("anything").await.unwrap();
/// assert_eq!(vector.len(), 3);
/// # });
/// ```
pub trait EmbeddingModel: Send + Sync {
    /// Returns the embedding vector dimension.
    fn dim(&self) -> usize;

    /// Converts text to an embedding vector of length [`Self::dim`].
    fn embed(&self, text: &str) -> impl Future<Output = crate::Result<Embedding>> + Send;
}

impl<T: EmbeddingModel> EmbeddingModel for Arc<T> {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn embed(&self, text: &str) -> impl Future<Output = crate::Result<Embedding>> + Send {
        (**self).embed(text)
    }
}
