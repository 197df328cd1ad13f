//! Query dispatch and result resolution.

use anyhow::anyhow;
use paperdex_core::{Embedding, EmbeddingModel, vector};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::blocking::run_blocking;
use crate::context::ContextInner;
use crate::error::{IndexError, Result};
use crate::snapshot::Snapshot;
use crate::types::{DocId, Record, ScoredRecord, SearchMode};

/// Answers keyword and semantic queries against the published snapshot.
///
/// Each query pins the snapshot it starts with, so a build that publishes mid-query never
/// mixes old and new results. Candidates are resolved through the document store; an
/// identifier whose record has since been removed is skipped and the router fetches further
/// candidates to fill the requested limit.
pub struct QueryRouter<M> {
    ctx: Arc<ContextInner<M>>,
}

impl<M> std::fmt::Debug for QueryRouter<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRouter").finish_non_exhaustive()
    }
}

impl<M> QueryRouter<M>
where
    M: EmbeddingModel + 'static,
{
    pub(crate) const fn new(ctx: Arc<ContextInner<M>>) -> Self {
        Self { ctx }
    }

    /// Searches with caller-supplied, unvalidated parameters.
    ///
    /// `mode` is `lexical` (alias `exact`) or `semantic`, case-insensitive.
    ///
    /// # Errors
    /// - [`IndexError::InvalidQuery`] for an empty query.
    /// - [`IndexError::InvalidMode`] for an unknown mode.
    /// - [`IndexError::InvalidLimit`] for `limit <= 0`.
    /// - Any error of [`QueryRouter::search_scored`].
    pub async fn search(&self, query: &str, mode: &str, limit: i64) -> Result<Vec<Record>> {
        let (mode, limit) = parse_request(query, mode, limit)?;
        let hits = self.search_scored(query, mode, limit).await?;
        Ok(hits.into_iter().map(|hit| hit.record).collect())
    }

    /// Searches and returns each record with its score, best first.
    ///
    /// # Errors
    /// - [`IndexError::InvalidQuery`] / [`IndexError::InvalidLimit`] for bad input.
    /// - [`IndexError::IndexEmpty`] for a semantic query with no vectors loaded.
    /// - [`IndexError::EmbeddingUnavailable`] if the query cannot be embedded in time.
    /// - [`IndexError::DimensionMismatch`] / [`IndexError::NotNormalized`] for a bad query
    ///   embedding.
    /// - [`IndexError::Timeout`] if the document store does not answer in time.
    pub async fn search_scored(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if query.trim().is_empty() {
            return Err(IndexError::InvalidQuery);
        }
        if limit == 0 {
            return Err(IndexError::InvalidLimit(0));
        }

        let snapshot = self.ctx.snapshot.load_full();
        let query_vector = match mode {
            SearchMode::Lexical => None,
            SearchMode::Semantic => Some(self.embed_query(query, &snapshot).await?),
        };

        let mut fetch = limit;
        let mut resolved = 0;
        let mut results = Vec::new();
        loop {
            let candidates = match &query_vector {
                None => snapshot.lexical().search(query, fetch)?,
                Some(q) => snapshot
                    .vectors()
                    .search(q, fetch)?
                    .into_iter()
                    .map(|hit| (hit.id, hit.score))
                    .collect(),
            };

            let fresh = &candidates[resolved.min(candidates.len())..];
            for hit in self.resolve(fresh).await? {
                if results.len() == limit {
                    break;
                }
                results.push(hit);
            }
            resolved = candidates.len();

            if results.len() >= limit || candidates.len() < fetch {
                break;
            }
            fetch = fetch.saturating_mul(2);
            debug!(
                %mode,
                fetch,
                found = results.len(),
                limit,
                "dangling candidates skipped; fetching more"
            );
        }

        Ok(results)
    }

    async fn embed_query(&self, query: &str, snapshot: &Snapshot) -> Result<Embedding> {
        let vectors = snapshot.vectors();
        if vectors.is_empty() {
            return Err(IndexError::IndexEmpty);
        }

        let timeout = self.ctx.config.embed_timeout;
        let mut embedding = match tokio::time::timeout(timeout, self.ctx.embedder.embed(query)).await
        {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(err)) => return Err(IndexError::EmbeddingUnavailable(err)),
            Err(_) => {
                return Err(IndexError::EmbeddingUnavailable(anyhow!(
                    "query embedding timed out after {timeout:?}"
                )));
            }
        };

        if embedding.len() != vectors.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: vectors.dimension(),
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

    /// Looks up candidates in order, dropping identifiers with no current record.
    async fn resolve(&self, candidates: &[(DocId, f32)]) -> Result<Vec<ScoredRecord>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<DocId> = candidates.iter().map(|(id, _)| *id).collect();
        let store = Arc::clone(&self.ctx.store);
        let records = run_blocking(
            "document store lookup",
            self.ctx.config.storage_timeout,
            move || store.get_many(&ids),
        )
        .await?;

        let mut by_id: HashMap<DocId, Record> =
            records.into_iter().map(|record| (record.id, record)).collect();
        Ok(candidates
            .iter()
            .filter_map(|&(id, score)| {
                let record = by_id.remove(&id);
                if record.is_none() {
                    debug!(%id, "skipping candidate with no stored record");
                }
                record.map(|record| ScoredRecord { record, score })
            })
            .collect())
    }
}

/// Validates raw request parameters in the order the router checks them: query, then mode,
/// then limit.
///
/// # Errors
/// [`IndexError::InvalidQuery`], [`IndexError::InvalidMode`] or [`IndexError::InvalidLimit`].
pub fn parse_request(query: &str, mode: &str, limit: i64) -> Result<(SearchMode, usize)> {
    if query.trim().is_empty() {
        return Err(IndexError::InvalidQuery);
    }
    let mode: SearchMode = mode.parse()?;
    if limit <= 0 {
        return Err(IndexError::InvalidLimit(limit));
    }
    Ok((mode, usize::try_from(limit).unwrap_or(usize::MAX)))
}
