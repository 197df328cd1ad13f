//! Process-wide retrieval context.

use arc_swap::ArcSwap;
use paperdex_core::EmbeddingModel;
use std::sync::Arc;
use tracing::{info, warn};

use crate::blocking::run_blocking;
use crate::builder::{BuildState, IndexBuilder};
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::VectorIndex;
use crate::lexical::LexicalIndex;
use crate::persistence::IndexBundle;
use crate::router::QueryRouter;
use crate::snapshot::Snapshot;
use crate::store::{DocumentStore, MemoryDocumentStore, RedbDocumentStore};
use crate::types::Record;

pub(crate) struct ContextInner<M> {
    pub(crate) config: IndexConfig,
    pub(crate) embedder: Arc<M>,
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) snapshot: ArcSwap<Snapshot>,
    pub(crate) bundle: Option<IndexBundle>,
    // Held for the whole of a build run.
    pub(crate) build_lock: async_lock::Mutex<()>,
    pub(crate) state: parking_lot::Mutex<BuildState>,
}

/// Owns the document store, the published search snapshot and the build pipeline.
///
/// A context is created once at startup and handed to whoever needs to build or query. It is
/// cheap to clone; clones share the same state. Independent contexts share nothing, so tests
/// can run side by side.
///
/// ```rust,no_run
/// use paperdex_retrieval::{IndexConfig, JsonFileSource, SearchContext};
/// # async fn run<M: paperdex_core::EmbeddingModel + 'static>(embedder: M) -> paperdex_retrieval::Result<()> {
/// let ctx = SearchContext::open(IndexConfig::in_dir("./data"), embedder).await?;
/// ctx.builder().rebuild(&JsonFileSource::new("papers.json")).await?;
/// let hits = ctx.router().search("diffusion", "lexical", 10).await?;
/// ctx.close().await;
/// # Ok(())
/// # }
/// ```
pub struct SearchContext<M> {
    inner: Arc<ContextInner<M>>,
}

impl<M> Clone for SearchContext<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> std::fmt::Debug for SearchContext<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.inner.snapshot.load();
        f.debug_struct("SearchContext")
            .field("config", &self.inner.config)
            .field("vectors", &snapshot.vectors().len())
            .field("lexical", &snapshot.lexical().len())
            .field("state", &*self.inner.state.lock())
            .finish_non_exhaustive()
    }
}

impl<M> SearchContext<M>
where
    M: EmbeddingModel + 'static,
{
    /// Opens the configured document store and restores any persisted index.
    ///
    /// Documents live in redb when [`IndexConfig::store_path`] is set and in memory otherwise.
    ///
    /// # Errors
    /// Fails if the store cannot be opened or a persisted bundle is corrupt or was built with a
    /// different embedding dimension.
    pub async fn open(config: IndexConfig, embedder: M) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = match config.store_path.clone() {
            Some(path) => {
                let store = run_blocking("document store open", config.storage_timeout, move || {
                    RedbDocumentStore::open(path)
                })
                .await?;
                Arc::new(store)
            }
            None => Arc::new(MemoryDocumentStore::new()),
        };
        Self::with_store(config, embedder, store).await
    }

    /// Creates a context over an existing document store.
    ///
    /// # Errors
    /// See [`SearchContext::open`].
    pub async fn with_store(
        config: IndexConfig,
        embedder: M,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self> {
        let dimension = embedder.dim();
        let bundle = config.bundle_dir.clone().map(IndexBundle::new);

        let vectors = match &bundle {
            Some(bundle) => load_bundle(bundle, dimension, &config).await?,
            None => None,
        }
        .unwrap_or_else(|| VectorIndex::empty(dimension));

        let lexical = {
            let store = Arc::clone(&store);
            let fields = config.lexical_fields.clone();
            run_blocking("lexical index build", config.storage_timeout, move || {
                let records = store.all().collect::<Result<Vec<Record>>>()?;
                Ok(LexicalIndex::from_records(fields, &records))
            })
            .await?
        };

        info!(
            vectors = vectors.len(),
            lexical = lexical.len(),
            dimension,
            "search context ready"
        );

        let snapshot = Snapshot::new(Arc::new(vectors), Arc::new(lexical));
        Ok(Self {
            inner: Arc::new(ContextInner {
                config,
                embedder: Arc::new(embedder),
                store,
                snapshot: ArcSwap::from_pointee(snapshot),
                bundle,
                build_lock: async_lock::Mutex::new(()),
                state: parking_lot::Mutex::new(BuildState::Idle),
            }),
        })
    }

    /// Re-reads the persisted bundle and publishes it.
    ///
    /// Returns `false` when no bundle is configured or none exists on disk; the published
    /// snapshot is left as it is. On error the published snapshot is also left untouched.
    ///
    /// # Errors
    /// - [`IndexError::BuildInProgress`] while a build run holds the pipeline.
    /// - [`IndexError::CorruptIndex`] or [`IndexError::DimensionMismatch`] for a bad bundle.
    pub async fn reload_bundle(&self) -> Result<bool> {
        let Some(_guard) = self.inner.build_lock.try_lock() else {
            return Err(IndexError::BuildInProgress);
        };
        let Some(bundle) = &self.inner.bundle else {
            return Ok(false);
        };

        let loaded = load_bundle(bundle, self.inner.embedder.dim(), &self.inner.config).await;
        match loaded {
            Ok(Some(vectors)) => {
                let current = self.inner.snapshot.load_full();
                self.inner
                    .snapshot
                    .store(Arc::new(current.with_vectors(Arc::new(vectors))));
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(err) => {
                warn!(error = %err, "keeping current index after failed bundle reload");
                Err(err)
            }
        }
    }

    /// Waits for any in-flight build to finish, then releases this handle.
    pub async fn close(self) {
        let _guard = self.inner.build_lock.lock().await;
        info!("search context closed");
    }

    /// Returns the index builder for this context.
    #[must_use]
    pub fn builder(&self) -> IndexBuilder<M> {
        IndexBuilder::new(Arc::clone(&self.inner))
    }

    /// Returns the query router for this context.
    #[must_use]
    pub fn router(&self) -> QueryRouter<M> {
        QueryRouter::new(Arc::clone(&self.inner))
    }
}

impl<M> SearchContext<M> {
    /// Returns the currently published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.load_full()
    }

    /// Returns the document store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    /// Returns the current build state.
    #[must_use]
    pub fn state(&self) -> BuildState {
        self.inner.state.lock().clone()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.inner.config
    }

    /// Returns the embedding model.
    #[must_use]
    pub fn embedder(&self) -> &M {
        &self.inner.embedder
    }
}

async fn load_bundle(
    bundle: &IndexBundle,
    dimension: usize,
    config: &IndexConfig,
) -> Result<Option<VectorIndex>> {
    let bundle = bundle.clone();
    let loaded = run_blocking("index bundle load", config.storage_timeout, move || {
        bundle.load()
    })
    .await?;

    match loaded {
        Some(index) if index.dimension() != dimension => Err(IndexError::DimensionMismatch {
            expected: dimension,
            actual: index.dimension(),
        }),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{KeyedEmbedder, paper};
    use tempfile::tempdir;

    #[tokio::test]
    async fn in_memory_context_starts_empty() {
        let ctx = SearchContext::open(IndexConfig::new(), KeyedEmbedder::new(4))
            .await
            .unwrap();
        assert!(ctx.store().is_empty().unwrap());
        assert!(ctx.snapshot().vectors().is_empty());
        assert_eq!(ctx.snapshot().vectors().dimension(), 4);
        assert_eq!(ctx.state(), BuildState::Idle);
    }

    #[tokio::test]
    async fn reopen_restores_persisted_index() {
        let dir = tempdir().unwrap();
        let config = IndexConfig::in_dir(dir.path());

        let ctx = SearchContext::open(config.clone(), KeyedEmbedder::new(4))
            .await
            .unwrap();
        ctx.builder()
            .rebuild(&vec![
                paper("a", "diffusion models"),
                paper("b", "graph neural networks"),
            ])
            .await
            .unwrap();
        let before = ctx.snapshot();
        ctx.close().await;

        let reopened = SearchContext::open(config, KeyedEmbedder::new(4))
            .await
            .unwrap();
        let after = reopened.snapshot();
        assert_eq!(after.vectors(), before.vectors());
        assert_eq!(after.lexical().len(), 2);
    }

    #[tokio::test]
    async fn reopen_with_other_dimension_fails() {
        let dir = tempdir().unwrap();
        let config = IndexConfig::in_dir(dir.path());

        let ctx = SearchContext::open(config.clone(), KeyedEmbedder::new(4))
            .await
            .unwrap();
        ctx.builder()
            .rebuild(&vec![paper("a", "diffusion models")])
            .await
            .unwrap();
        ctx.close().await;

        let err = SearchContext::open(config, KeyedEmbedder::new(8))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 8,
                actual: 4
            }
        ));
    }

    #[tokio::test]
    async fn corrupt_reload_keeps_published_index() {
        let dir = tempdir().unwrap();
        let config = IndexConfig::in_dir(dir.path());
        let ctx = SearchContext::open(config.clone(), KeyedEmbedder::new(4))
            .await
            .unwrap();
        ctx.builder()
            .rebuild(&vec![paper("a", "diffusion models"), paper("b", "graphs")])
            .await
            .unwrap();
        let before = ctx.snapshot();

        let bundle = IndexBundle::new(config.bundle_dir.clone().unwrap());
        let generation = bundle.current_generation().unwrap().unwrap();
        std::fs::remove_file(generation.join(IndexBundle::ID_MAP_FILE)).unwrap();

        let err = ctx.reload_bundle().await.unwrap_err();
        assert!(matches!(err, IndexError::CorruptIndex(_)));
        assert!(Arc::ptr_eq(&before, &ctx.snapshot()));
    }

    #[tokio::test]
    async fn reload_without_bundle_is_a_no_op() {
        let ctx = SearchContext::open(IndexConfig::new(), KeyedEmbedder::new(4))
            .await
            .unwrap();
        let before = ctx.snapshot();
        assert!(!ctx.reload_bundle().await.unwrap());
        assert!(Arc::ptr_eq(&before, &ctx.snapshot()));
    }

    #[tokio::test]
    async fn independent_contexts_share_nothing() {
        let first = SearchContext::open(IndexConfig::new(), KeyedEmbedder::new(4))
            .await
            .unwrap();
        let second = SearchContext::open(IndexConfig::new(), KeyedEmbedder::new(4))
            .await
            .unwrap();
        first
            .builder()
            .rebuild(&vec![paper("a", "diffusion models")])
            .await
            .unwrap();
        assert_eq!(first.store().len().unwrap(), 1);
        assert!(second.store().is_empty().unwrap());
    }
}
