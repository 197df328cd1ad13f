//! Canonical document store.
//!
//! This module provides the [`DocumentStore`] trait and two implementations: an in-memory
//! [`MemoryDocumentStore`] for tests and short-lived processes, and the durable
//! [`RedbDocumentStore`].
//!
//! Every implementation upholds the same contract:
//! - `external_id` is unique across live records; upserting an existing key overwrites the
//!   record in place and returns its existing [`DocId`].
//! - identifiers are allocated monotonically and never reused, so iteration in identifier order
//!   is also insertion order.

mod redb_store;

pub use redb_store::RedbDocumentStore;

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use crate::blocking::Deadline;
use crate::error::Result;
use crate::types::{DocId, Document, Record};

/// Lazy sequence of stored records in ascending identifier order.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Record>> + Send + 'a>;

/// Trait for document store backends.
pub trait DocumentStore: Send + Sync {
    /// Inserts or overwrites the record keyed by `document.external_id`.
    ///
    /// Returns the record's identifier, which is stable across repeated upserts of the same key.
    fn upsert(&self, document: Document) -> Result<DocId>;

    /// Upserts every document as one unit: either all writes land or none do.
    ///
    /// Returned identifiers are in input order.
    fn upsert_batch(&self, documents: Vec<Document>) -> Result<Vec<DocId>> {
        self.upsert_batch_within(documents, &Deadline::never())
    }

    /// Like [`DocumentStore::upsert_batch`], but checks `deadline` immediately before the batch
    /// becomes visible and writes nothing if it has passed.
    ///
    /// # Errors
    /// The error of [`Deadline::check`] when the batch was abandoned, or a storage error.
    fn upsert_batch_within(
        &self,
        documents: Vec<Document>,
        deadline: &Deadline,
    ) -> Result<Vec<DocId>>;

    /// Retrieves a record by identifier.
    ///
    /// Returns `Ok(None)` if the record doesn't exist.
    fn get(&self, id: DocId) -> Result<Option<Record>>;

    /// Retrieves several records, skipping identifiers with no record.
    ///
    /// Output preserves the order of `ids`.
    fn get_many(&self, ids: &[DocId]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(record) = self.get(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Looks up a record by its natural key.
    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Record>>;

    /// Iterates over all records in ascending identifier order.
    ///
    /// The sequence reflects at least every upsert that completed before the call.
    fn all(&self) -> RecordIter<'_>;

    /// Removes a record. Returns `true` if something was removed.
    fn remove(&self, id: DocId) -> Result<bool>;

    /// Returns the number of live records.
    fn len(&self) -> Result<usize>;

    /// Returns `true` if the store holds no records.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<DocId, Record>,
    by_external_id: HashMap<String, DocId>,
    next_id: u64,
}

impl MemoryState {
    fn upsert(&mut self, document: Document) -> DocId {
        let id = if let Some(&id) = self.by_external_id.get(&document.external_id) {
            id
        } else {
            self.next_id += 1;
            let id = DocId::from_u64(self.next_id);
            self.by_external_id.insert(document.external_id.clone(), id);
            id
        };
        self.records.insert(id, Record::new(id, document));
        id
    }
}

/// Document store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    state: RwLock<MemoryState>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn upsert(&self, document: Document) -> Result<DocId> {
        Ok(self.state.write().upsert(document))
    }

    fn upsert_batch_within(
        &self,
        documents: Vec<Document>,
        deadline: &Deadline,
    ) -> Result<Vec<DocId>> {
        let mut state = self.state.write();
        deadline.check()?;
        Ok(documents
            .into_iter()
            .map(|document| state.upsert(document))
            .collect())
    }

    fn get(&self, id: DocId) -> Result<Option<Record>> {
        Ok(self.state.read().records.get(&id).cloned())
    }

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Record>> {
        let state = self.state.read();
        Ok(state
            .by_external_id
            .get(external_id)
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    fn all(&self) -> RecordIter<'_> {
        let records: Vec<Record> = self.state.read().records.values().cloned().collect();
        Box::new(records.into_iter().map(Ok))
    }

    fn remove(&self, id: DocId) -> Result<bool> {
        let mut state = self.state.write();
        let Some(record) = state.records.remove(&id) else {
            return Ok(false);
        };
        state.by_external_id.remove(&record.document.external_id);
        Ok(true)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.state.read().records.len())
    }
}
