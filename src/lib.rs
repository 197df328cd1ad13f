//! # paperdex
//!
//! Façade crate that re-exports [`paperdex_core`] and, with the default `retrieval` feature,
//! the hybrid index in [`retrieval`]. Pull this crate into a binary to embed papers, keep them
//! in a canonical store, and answer keyword or semantic queries over them.
//!
//! ## Example
//!
//! ```rust,no_run
//! use paperdex::retrieval::{IndexConfig, SearchContext, SourceRecord};
//! use paperdex::EmbeddingModel;
//!
//! async fn demo(model: impl EmbeddingModel + 'static) -> paperdex::retrieval::Result<()> {
//!     let ctx = SearchContext::open(IndexConfig::in_dir("./paperdex-data"), model).await?;
//!
//!     let rows = vec![SourceRecord::new(
//!         "https://arxiv.org/abs/2006.11239",
//!         "Denoising Diffusion Probabilistic Models",
//!         "Ho, Jain, Abbeel",
//!     )];
//!     ctx.builder().rebuild(&rows).await?;
//!
//!     for record in ctx.router().search("diffusion", "lexical", 5).await? {
//!         println!("{} {}", record.id, record.document.title);
//!     }
//!     ctx.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`paperdex_core::embedding`]: the pluggable text-to-vector pipeline.
//! - [`paperdex_core::vector`]: unit-vector helpers.
//! - [`retrieval`]: document store, lexical and vector views, builder and router.

pub use paperdex_core::*;

#[cfg(feature = "retrieval")]
#[doc(inline)]
pub use paperdex_retrieval as retrieval;
