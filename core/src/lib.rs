//! # paperdex-core
//!
//! Collaborator traits shared by the paperdex workspace.
//!
//! The retrieval index never computes embeddings itself. It consumes any type implementing
//! [`EmbeddingModel`], whether that is a remote service, a local model, or a test stub, and
//! treats every vector it receives with suspicion: vectors are checked for dimension and
//! normalized again with the helpers in [`vector`] before they enter an index.
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │  Index Builder  │───▶│  EmbeddingModel  │◀───│   Providers     │
//! │  Query Router   │    │   (this crate)   │    │                 │
//! │                 │    │                  │    │ - remote API    │
//! │                 │    │ - dim()          │    │ - local model   │
//! │                 │    │ - embed(text)    │    │ - hashing stub  │
//! └─────────────────┘    └──────────────────┘    └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`embedding`]: the pluggable text-to-vector pipeline.
//! - [`vector`]: norms, inner products and defensive normalization.

/// Text embeddings.
pub mod embedding;
/// Unit-vector arithmetic.
pub mod vector;

#[doc(inline)]
pub use embedding::{Embedding, EmbeddingModel};

/// Result type used throughout the crate.
///
/// Type alias for [`anyhow::Result<T>`](anyhow::Result) with `()` as default success type.
pub type Result<T = ()> = anyhow::Result<T>;

pub use anyhow::Error;
