//! Configuration for the retrieval index.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::LexicalField;

/// Configuration for a [`SearchContext`](crate::SearchContext).
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// redb file backing the document store. `None` keeps documents in memory.
    pub store_path: Option<PathBuf>,
    /// Directory holding the persisted vector index bundle. `None` disables persistence.
    pub bundle_dir: Option<PathBuf>,
    /// Upper bound for a single embedding call.
    pub embed_timeout: Duration,
    /// Upper bound for a single storage or persistence call.
    pub storage_timeout: Duration,
    /// Accepted deviation from unit norm before a vector is reported as renormalized.
    pub norm_tolerance: f32,
    /// Maximum number of embedding calls in flight during a build.
    pub embed_concurrency: usize,
    /// Text fields indexed by the lexical view.
    pub lexical_fields: Vec<LexicalField>,
    /// Result count used when a caller does not pass one.
    pub default_limit: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            bundle_dir: None,
            embed_timeout: Duration::from_secs(30),
            storage_timeout: Duration::from_secs(10),
            norm_tolerance: 1e-3,
            embed_concurrency: 8,
            lexical_fields: LexicalField::ALL.to_vec(),
            default_limit: 10,
        }
    }
}

impl IndexConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> IndexConfigBuilder {
        IndexConfigBuilder::new()
    }

    /// Places the document store and the bundle under one data directory.
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self::builder()
            .store_path(dir.join("documents.redb"))
            .bundle_dir(dir.join("vectors"))
            .build()
    }
}

/// Builder for [`IndexConfig`].
#[derive(Debug, Default)]
pub struct IndexConfigBuilder {
    config: IndexConfig,
}

impl IndexConfigBuilder {
    /// Creates a new configuration builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: IndexConfig::default(),
        }
    }

    /// Sets the document store path.
    #[must_use]
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = Some(path.into());
        self
    }

    /// Sets the bundle directory.
    #[must_use]
    pub fn bundle_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.bundle_dir = Some(dir.into());
        self
    }

    /// Sets the per-call embedding timeout.
    #[must_use]
    pub const fn embed_timeout(mut self, timeout: Duration) -> Self {
        self.config.embed_timeout = timeout;
        self
    }

    /// Sets the per-call storage timeout.
    #[must_use]
    pub const fn storage_timeout(mut self, timeout: Duration) -> Self {
        self.config.storage_timeout = timeout;
        self
    }

    /// Sets the unit-norm tolerance.
    #[must_use]
    pub const fn norm_tolerance(mut self, tolerance: f32) -> Self {
        self.config.norm_tolerance = tolerance;
        self
    }

    /// Sets the number of concurrent embedding calls. Zero is treated as one.
    #[must_use]
    pub const fn embed_concurrency(mut self, concurrency: usize) -> Self {
        self.config.embed_concurrency = if concurrency == 0 { 1 } else { concurrency };
        self
    }

    /// Sets the lexically indexed fields.
    #[must_use]
    pub fn lexical_fields(mut self, fields: impl IntoIterator<Item = LexicalField>) -> Self {
        self.config.lexical_fields = fields.into_iter().collect();
        self
    }

    /// Sets the default result count.
    #[must_use]
    pub const fn default_limit(mut self, limit: usize) -> Self {
        self.config.default_limit = limit;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> IndexConfig {
        self.config
    }
}
