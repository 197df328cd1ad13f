//! Shared fixtures for unit tests.

use paperdex_core::{Embedding, EmbeddingModel};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use xxhash_rust::xxh3::xxh3_64;

use crate::blocking::Deadline;
use crate::error::Result;
use crate::store::{DocumentStore, MemoryDocumentStore, RecordIter};
use crate::types::{DocId, Document, Record, SourceRecord};

/// A source row keyed under `https://papers.example/`.
pub(crate) fn paper(key: &str, title: &str) -> SourceRecord {
    SourceRecord::new(format!("https://papers.example/{key}"), title, "")
}

/// Deterministic bag-of-words embedder with scripted misbehaviour.
///
/// Output is deliberately left unnormalized so callers' normalization is exercised. Texts
/// containing a configured trigger fail, sleep, stop at a gate, or come back one component
/// short.
#[derive(Clone, Debug)]
pub(crate) struct KeyedEmbedder {
    dim: usize,
    failing: Vec<String>,
    short: Vec<String>,
    slow: Vec<(String, Duration)>,
    gate: Option<Gate>,
    calls: Arc<AtomicUsize>,
}

#[derive(Clone, Debug)]
struct Gate {
    trigger: String,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl KeyedEmbedder {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            dim,
            failing: Vec::new(),
            short: Vec::new(),
            slow: Vec::new(),
            gate: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn failing_on(mut self, trigger: &str) -> Self {
        self.failing.push(trigger.to_lowercase());
        self
    }

    pub(crate) fn wrong_dimension_on(mut self, trigger: &str) -> Self {
        self.short.push(trigger.to_lowercase());
        self
    }

    pub(crate) fn slow_on(mut self, trigger: &str, delay: Duration) -> Self {
        self.slow.push((trigger.to_lowercase(), delay));
        self
    }

    /// Texts containing `trigger` signal `entered`, then wait for `release` before embedding.
    pub(crate) fn gated_on(
        mut self,
        trigger: &str,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    ) -> Self {
        self.gate = Some(Gate {
            trigger: trigger.to_lowercase(),
            entered,
            release,
        });
        self
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl EmbeddingModel for KeyedEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> paperdex_core::Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();

        if let Some((_, delay)) = self.slow.iter().find(|(t, _)| lower.contains(t.as_str())) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(gate) = self.gate.as_ref().filter(|g| lower.contains(g.trigger.as_str())) {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.failing.iter().any(|t| lower.contains(t.as_str())) {
            anyhow::bail!("embedding service rejected {text:?}");
        }

        let dim = if self.short.iter().any(|t| lower.contains(t.as_str())) {
            self.dim - 1
        } else {
            self.dim
        };
        let mut vector = vec![0.0; dim];
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (xxh3_64(token.as_bytes()) % dim as u64) as usize;
            vector[bucket] += 2.0;
        }
        Ok(vector)
    }
}

/// In-memory store whose batch writes and full scans can be slowed down on demand.
#[derive(Debug, Default)]
pub(crate) struct SlowStore {
    inner: MemoryDocumentStore,
    upsert_delay_ms: AtomicU64,
    scan_delay_ms: AtomicU64,
}

impl SlowStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn delay_upserts(&self, delay: Duration) {
        self.upsert_delay_ms.store(millis(delay), Ordering::SeqCst);
    }

    pub(crate) fn delay_scans(&self, delay: Duration) {
        self.scan_delay_ms.store(millis(delay), Ordering::SeqCst);
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

fn pause(delay_ms: &AtomicU64) {
    let ms = delay_ms.load(Ordering::SeqCst);
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

impl DocumentStore for SlowStore {
    fn upsert(&self, document: Document) -> Result<DocId> {
        self.inner.upsert(document)
    }

    fn upsert_batch_within(
        &self,
        documents: Vec<Document>,
        deadline: &Deadline,
    ) -> Result<Vec<DocId>> {
        pause(&self.upsert_delay_ms);
        self.inner.upsert_batch_within(documents, deadline)
    }

    fn get(&self, id: DocId) -> Result<Option<Record>> {
        self.inner.get(id)
    }

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Record>> {
        self.inner.find_by_external_id(external_id)
    }

    fn all(&self) -> RecordIter<'_> {
        pause(&self.scan_delay_ms);
        self.inner.all()
    }

    fn remove(&self, id: DocId) -> Result<bool> {
        self.inner.remove(id)
    }

    fn len(&self) -> Result<usize> {
        self.inner.len()
    }
}
