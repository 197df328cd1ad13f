//! Build pipeline: load, embed, upsert, swap.

use futures::{StreamExt, stream};
use paperdex_core::{Embedding, EmbeddingModel, vector};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::blocking::{run_blocking, run_blocking_write};
use crate::cleaning::{BasicCleaner, Cleaner};
use crate::context::ContextInner;
use crate::error::{IndexError, Result};
use crate::index::VectorIndex;
use crate::lexical::LexicalIndex;
use crate::snapshot::Snapshot;
use crate::source::RecordSource;
use crate::types::{DocId, Document, Record, SourceRecord};

/// Where the build pipeline currently is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BuildState {
    /// No build is running.
    #[default]
    Idle,
    /// Pulling rows from the source feed.
    Loading,
    /// Calling the embedding model.
    Embedding,
    /// Writing records to the document store.
    Upserting,
    /// Building and publishing the new snapshot.
    Swapping,
    /// The last run failed.
    Failed(String),
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Loading => f.write_str("loading"),
            Self::Embedding => f.write_str("embedding"),
            Self::Upserting => f.write_str("upserting"),
            Self::Swapping => f.write_str("swapping"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Progress update during a build run.
#[derive(Debug, Clone)]
pub struct BuildProgress {
    /// Number of records processed in the current stage.
    pub processed: usize,
    /// Number of records in the run.
    pub total: usize,
    /// Current stage.
    pub stage: BuildStage,
}

impl BuildProgress {
    /// Creates a new progress update.
    #[must_use]
    pub const fn new(processed: usize, total: usize, stage: BuildStage) -> Self {
        Self {
            processed,
            total,
            stage,
        }
    }
}

/// Stages reported through [`BuildProgress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStage {
    /// Reading the source feed.
    Loading,
    /// Embedding started.
    Embedding,
    /// One record received an embedding.
    Embedded,
    /// One record was kept without an embedding.
    Skipped {
        /// Reason the embedding was dropped.
        reason: String,
    },
    /// Writing records to the document store.
    Upserting,
    /// Rebuilding the search views.
    Swapping,
    /// Saving the index bundle to disk.
    Persisting,
    /// The run completed.
    Done,
}

/// Summary of a successful build run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Rows read from the source.
    pub loaded: usize,
    /// Rows rejected before indexing, such as rows without an external id.
    pub rejected: usize,
    /// Records that received an embedding.
    pub embedded: usize,
    /// Records stored without an embedding.
    pub skipped: usize,
    /// Records written to the document store.
    pub upserted: usize,
    /// Vectors in the published index.
    pub vectors: usize,
}

/// Marks the run failed if it is dropped before finishing.
struct StateGuard<'a> {
    state: &'a parking_lot::Mutex<BuildState>,
    finished: bool,
}

impl<'a> StateGuard<'a> {
    fn new(state: &'a parking_lot::Mutex<BuildState>) -> Self {
        Self {
            state,
            finished: false,
        }
    }

    fn enter(&self, next: BuildState) {
        debug!(state = %next, "build state");
        *self.state.lock() = next;
    }

    fn finish(mut self, last: BuildState) {
        self.finished = true;
        *self.state.lock() = last;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("build run dropped before completion");
            *self.state.lock() = BuildState::Failed("cancelled".into());
        }
    }
}

/// Runs full rebuilds of the search views.
///
/// Only one run may be in flight per context; a second concurrent call fails with
/// [`IndexError::BuildInProgress`]. A run that fails leaves the published snapshot exactly as
/// it was.
pub struct IndexBuilder<M> {
    ctx: Arc<ContextInner<M>>,
    cleaner: Arc<dyn Cleaner>,
}

impl<M> fmt::Debug for IndexBuilder<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("cleaner", &self.cleaner.name())
            .finish_non_exhaustive()
    }
}

impl<M> IndexBuilder<M>
where
    M: EmbeddingModel + 'static,
{
    pub(crate) fn new(ctx: Arc<ContextInner<M>>) -> Self {
        Self {
            ctx,
            cleaner: Arc::new(BasicCleaner),
        }
    }

    /// Replaces the row cleaner.
    #[must_use]
    pub fn with_cleaner(mut self, cleaner: impl Cleaner + 'static) -> Self {
        self.cleaner = Arc::new(cleaner);
        self
    }

    /// Rebuilds every view from `source`.
    ///
    /// # Errors
    /// - [`IndexError::BuildInProgress`] if another run holds the pipeline.
    /// - [`IndexError::NoInput`] if the source yields no usable rows.
    /// - [`IndexError::Failed`] if the source, the document store or persistence fails.
    pub async fn rebuild<S: RecordSource>(&self, source: &S) -> Result<BuildReport> {
        self.rebuild_with_progress(source, |_| {}).await
    }

    /// Rebuilds every view from `source`, reporting progress along the way.
    ///
    /// # Errors
    /// See [`IndexBuilder::rebuild`].
    pub async fn rebuild_with_progress<S, F>(
        &self,
        source: &S,
        mut on_progress: F,
    ) -> Result<BuildReport>
    where
        S: RecordSource,
        F: FnMut(BuildProgress),
    {
        let Some(_lock) = self.ctx.build_lock.try_lock() else {
            return Err(IndexError::BuildInProgress);
        };
        let guard = StateGuard::new(&self.ctx.state);

        match self.run(source, &guard, &mut on_progress).await {
            Ok(report) => {
                guard.finish(BuildState::Idle);
                info!(
                    loaded = report.loaded,
                    rejected = report.rejected,
                    embedded = report.embedded,
                    skipped = report.skipped,
                    vectors = report.vectors,
                    "index build complete"
                );
                Ok(report)
            }
            Err(err) => {
                error!(error = %err, "index build failed");
                guard.finish(BuildState::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn run<S, F>(
        &self,
        source: &S,
        guard: &StateGuard<'_>,
        on_progress: &mut F,
    ) -> Result<BuildReport>
    where
        S: RecordSource,
        F: FnMut(BuildProgress),
    {
        let config = &self.ctx.config;
        let mut report = BuildReport::default();

        guard.enter(BuildState::Loading);
        on_progress(BuildProgress::new(0, 0, BuildStage::Loading));
        let rows = match tokio::time::timeout(config.storage_timeout, source.load()).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(err)) => return Err(IndexError::failed(format!("loading: {err}"))),
            Err(_) => {
                return Err(IndexError::failed(format!(
                    "loading: source feed timed out after {:?}",
                    config.storage_timeout
                )));
            }
        };
        report.loaded = rows.len();

        let documents = self.prepare(rows, &mut report);
        if documents.is_empty() {
            return Err(IndexError::NoInput);
        }
        let total = documents.len();

        guard.enter(BuildState::Embedding);
        on_progress(BuildProgress::new(0, total, BuildStage::Embedding));
        let documents = self.embed_all(documents, &mut report, on_progress).await;

        guard.enter(BuildState::Upserting);
        on_progress(BuildProgress::new(0, total, BuildStage::Upserting));
        let embeddings: Vec<Option<Embedding>> =
            documents.iter().map(|d| d.embedding.clone()).collect();
        let store = Arc::clone(&self.ctx.store);
        let ids = run_blocking_write(
            "document store upsert",
            config.storage_timeout,
            move |deadline| store.upsert_batch_within(documents, &deadline),
        )
        .await
        .map_err(|err| IndexError::failed(format!("upserting: {err}")))?;
        report.upserted = ids.len();
        on_progress(BuildProgress::new(ids.len(), total, BuildStage::Upserting));

        guard.enter(BuildState::Swapping);
        on_progress(BuildProgress::new(0, total, BuildStage::Swapping));
        let pairs: Vec<(DocId, Embedding)> = ids
            .into_iter()
            .zip(embeddings)
            .filter_map(|(id, embedding)| embedding.map(|e| (id, e)))
            .collect();
        let snapshot = self
            .build_snapshot(pairs)
            .await
            .map_err(|err| IndexError::failed(format!("swapping: {err}")))?;
        report.vectors = snapshot.vectors().len();

        if let Some(bundle) = self.ctx.bundle.clone() {
            on_progress(BuildProgress::new(0, total, BuildStage::Persisting));
            let snapshot = Arc::clone(&snapshot);
            run_blocking_write("index bundle save", config.storage_timeout, move |deadline| {
                bundle.save_within(snapshot.vectors(), &deadline)
            })
            .await
            .map_err(|err| IndexError::failed(format!("persisting: {err}")))?;
        }

        self.ctx.snapshot.store(snapshot);
        on_progress(BuildProgress::new(total, total, BuildStage::Done));
        Ok(report)
    }

    /// Cleans and validates rows, keeping the last row for each external id.
    fn prepare(
        &self,
        rows: Vec<SourceRecord>,
        report: &mut BuildReport,
    ) -> Vec<Document> {
        let mut documents: Vec<Document> = Vec::with_capacity(rows.len());
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(rows.len());

        for row in rows {
            let row = self.cleaner.clean(row);
            match row.into_document() {
                Ok(document) => {
                    if let Some(&position) = positions.get(&document.external_id) {
                        debug!(external_id = %document.external_id, "duplicate source row replaces earlier one");
                        documents[position] = document;
                    } else {
                        positions.insert(document.external_id.clone(), documents.len());
                        documents.push(document);
                    }
                }
                Err(err) => {
                    report.rejected += 1;
                    warn!(error = %err, "rejected source row");
                }
            }
        }
        documents
    }

    async fn embed_all<F>(
        &self,
        documents: Vec<Document>,
        report: &mut BuildReport,
        on_progress: &mut F,
    ) -> Vec<Document>
    where
        F: FnMut(BuildProgress),
    {
        let config = &self.ctx.config;
        let embedder = &*self.ctx.embedder;
        let dimension = embedder.dim();
        let total = documents.len();

        let mut results = stream::iter(documents)
            .map(|document| async move {
                let text = document.text_for_embedding();
                let outcome = embed_one(embedder, &text, dimension, config.embed_timeout).await;
                (document, outcome)
            })
            .buffered(config.embed_concurrency.max(1));

        let mut embedded = Vec::with_capacity(total);
        while let Some((mut document, outcome)) = results.next().await {
            let stage = match outcome {
                Ok(embedding) => {
                    document.embedding = Some(embedding);
                    report.embedded += 1;
                    BuildStage::Embedded
                }
                Err(err) => {
                    warn!(
                        external_id = %document.external_id,
                        error = %err,
                        "embedding failed; record stays keyword-searchable only"
                    );
                    document.embedding = None;
                    report.skipped += 1;
                    BuildStage::Skipped {
                        reason: err.to_string(),
                    }
                }
            };
            embedded.push(document);
            on_progress(BuildProgress::new(embedded.len(), total, stage));
        }
        embedded
    }

    async fn build_snapshot(&self, pairs: Vec<(DocId, Embedding)>) -> Result<Arc<Snapshot>> {
        let config = &self.ctx.config;
        let store = Arc::clone(&self.ctx.store);
        let fields = config.lexical_fields.clone();
        let dimension = self.ctx.embedder.dim();
        let tolerance = config.norm_tolerance;

        run_blocking("snapshot build", config.storage_timeout, move || {
            let vectors = VectorIndex::build(dimension, pairs, tolerance)?;
            let records = store.all().collect::<Result<Vec<Record>>>()?;
            let lexical = LexicalIndex::from_records(fields, &records);
            Ok(Arc::new(Snapshot::new(Arc::new(vectors), Arc::new(lexical))))
        })
        .await
    }
}

async fn embed_one<M: EmbeddingModel>(
    embedder: &M,
    text: &str,
    dimension: usize,
    timeout: Duration,
) -> Result<Embedding> {
    let mut embedding = match tokio::time::timeout(timeout, embedder.embed(text)).await {
        Ok(Ok(embedding)) => embedding,
        Ok(Err(err)) => return Err(IndexError::EmbeddingUnavailable(err)),
        Err(_) => {
            return Err(IndexError::Timeout {
                operation: "embedding",
                after: timeout,
            });
        }
    };
    if embedding.len() != dimension {
        return Err(IndexError::DimensionMismatch {
            expected: dimension,
            actual: embedding.len(),
        });
    }
    if vector::normalize(&mut embedding).is_none() {
        return Err(IndexError::NotNormalized {
            norm: vector::l2_norm(&embedding),
        });
    }
    Ok(embedding)
}
