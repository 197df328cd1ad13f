//! Hybrid retrieval index for a paper catalogue.
//!
//! The [`SearchContext`] glues any [`EmbeddingModel`](paperdex_core::EmbeddingModel) to a
//! canonical document store and two derived search views, exposing a small API surface:
//! - [`IndexBuilder::rebuild`] – load source rows, embed them, upsert them and publish fresh
//!   views in one atomic swap.
//! - [`QueryRouter::search`] – run a `lexical` (BM25) or `semantic` (exact inner-product)
//!   query and return ranked, dereferenced records.
//!
//! ```text
//! ┌──────────────┐   upsert    ┌────────────────┐   all()   ┌─────────────────────────┐
//! │ IndexBuilder │────────────▶│ DocumentStore  │──────────▶│ Snapshot (ArcSwap)      │
//! │              │             │ (redb / memory)│           │  - LexicalIndex (bm25)  │
//! │              │──embed()──▶ EmbeddingModel   │           │  - VectorIndex + ids    │
//! └──────────────┘             └────────────────┘           └─────────────────────────┘
//!                                      ▲  get()                          ▲ load
//!                                      └──────────── QueryRouter ────────┘
//! ```
//!
//! The vector index and its identity map are built together from one pass over the store and
//! published together. Readers pin the snapshot they start with, so they see either the old
//! pair or the new one, never a mix.

mod blocking;
mod builder;
pub mod checksum;
pub mod cleaning;
pub mod config;
mod context;
pub mod error;
pub mod index;
pub mod lexical;
pub mod persistence;
mod router;
mod snapshot;
pub mod source;
pub mod store;
#[cfg(test)]
mod test_support;
pub mod types;

pub use blocking::Deadline;
pub use builder::{BuildProgress, BuildReport, BuildStage, BuildState, IndexBuilder};
pub use cleaning::{BasicCleaner, Cleaner};
pub use config::{IndexConfig, IndexConfigBuilder};
pub use context::SearchContext;
pub use error::{IndexError, Result};
pub use index::{IdentityMap, VectorHit, VectorIndex};
pub use lexical::LexicalIndex;
pub use persistence::IndexBundle;
pub use router::{QueryRouter, parse_request};
pub use snapshot::Snapshot;
pub use source::{JsonFileSource, RecordSource};
pub use store::{DocumentStore, MemoryDocumentStore, RedbDocumentStore};
pub use types::{
    DocId, Document, LexicalField, Record, ScoredRecord, SearchMode, SourceRecord,
};
