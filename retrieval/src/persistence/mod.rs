//! Durable storage for the vector index.
//!
//! The vector index and its identity map are persisted together as an [`IndexBundle`] and
//! restored together; there is no way to load one half on its own.

mod bundle;

pub use bundle::IndexBundle;
