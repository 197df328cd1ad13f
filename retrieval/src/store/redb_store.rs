//! redb-backed document store.

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::blocking::Deadline;
use crate::error::Result;
use crate::types::{DocId, Document, Record};

use super::{DocumentStore, RecordIter};

const RECORDS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("records");
const EMBEDDINGS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("embeddings");
const EXTERNAL_IDS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("external_ids");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_ID_KEY: &str = "next_id";
const PAGE_SIZE: usize = 256;

/// Durable document store using redb.
///
/// Record fields are stored as JSON keyed by identifier; embeddings live in a separate table as
/// packed little-endian `f32` so they round-trip bit-exactly. A secondary table maps
/// `external_id` to identifier and enforces key uniqueness.
///
/// # Example
///
/// ```rust,no_run
/// use paperdex_retrieval::store::{DocumentStore, RedbDocumentStore};
/// use paperdex_retrieval::Document;
///
/// let store = RedbDocumentStore::open("./documents.redb").unwrap();
/// let id = store.upsert(Document::new("https://papers.example/1", "Title", "Author")).unwrap();
/// assert!(store.get(id).unwrap().is_some());
/// ```
#[derive(Clone)]
pub struct RedbDocumentStore {
    path: PathBuf,
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbDocumentStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbDocumentStore {
    /// Opens or creates the database and its tables.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path)?;

        let write_txn = db.begin_write()?;
        write_txn.open_table(RECORDS_TABLE)?;
        write_txn.open_table(EMBEDDINGS_TABLE)?;
        write_txn.open_table(EXTERNAL_IDS_TABLE)?;
        write_txn.open_table(META_TABLE)?;
        write_txn.commit()?;

        Ok(Self {
            path,
            db: Arc::new(db),
        })
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(embedding.len() * 4);
        for &val in embedding {
            bytes.extend_from_slice(&val.to_le_bytes());
        }
        bytes
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn write_documents(txn: &WriteTransaction, documents: Vec<Document>) -> Result<Vec<DocId>> {
        let mut records = txn.open_table(RECORDS_TABLE)?;
        let mut embeddings = txn.open_table(EMBEDDINGS_TABLE)?;
        let mut external_ids = txn.open_table(EXTERNAL_IDS_TABLE)?;
        let mut meta = txn.open_table(META_TABLE)?;

        let mut next_id = meta.get(NEXT_ID_KEY)?.map_or(0, |v| v.value());
        let mut ids = Vec::with_capacity(documents.len());

        for mut document in documents {
            let existing = external_ids
                .get(document.external_id.as_str())?
                .map(|v| v.value());
            let id = if let Some(id) = existing {
                id
            } else {
                next_id += 1;
                external_ids.insert(document.external_id.as_str(), next_id)?;
                next_id
            };

            match document.embedding.take() {
                Some(embedding) => {
                    let bytes = Self::serialize_embedding(&embedding);
                    embeddings.insert(id, bytes.as_slice())?;
                }
                None => {
                    embeddings.remove(id)?;
                }
            }

            let payload = serde_json::to_vec(&document)?;
            records.insert(id, payload.as_slice())?;
            ids.push(DocId::from_u64(id));
        }

        meta.insert(NEXT_ID_KEY, next_id)?;
        Ok(ids)
    }

    fn read_record(&self, id: u64) -> Result<Option<Record>> {
        let read_txn = self.db.begin_read()?;
        let records = read_txn.open_table(RECORDS_TABLE)?;
        let Some(payload) = records.get(id)? else {
            return Ok(None);
        };
        let mut document: Document = serde_json::from_slice(payload.value())?;

        let embeddings = read_txn.open_table(EMBEDDINGS_TABLE)?;
        document.embedding = embeddings
            .get(id)?
            .map(|bytes| Self::deserialize_embedding(bytes.value()));

        Ok(Some(Record::new(DocId::from_u64(id), document)))
    }

    fn read_page(&self, start: u64) -> Result<Vec<Record>> {
        let read_txn = self.db.begin_read()?;
        let records = read_txn.open_table(RECORDS_TABLE)?;
        let embeddings = read_txn.open_table(EMBEDDINGS_TABLE)?;

        let mut page = Vec::with_capacity(PAGE_SIZE);
        for entry in records.range(start..)?.take(PAGE_SIZE) {
            let (key, payload) = entry?;
            let id = key.value();
            let mut document: Document = serde_json::from_slice(payload.value())?;
            document.embedding = embeddings
                .get(id)?
                .map(|bytes| Self::deserialize_embedding(bytes.value()));
            page.push(Record::new(DocId::from_u64(id), document));
        }
        Ok(page)
    }
}

/// Pages through the records table, one short read transaction per page.
struct PagedRecords<'a> {
    store: &'a RedbDocumentStore,
    next_key: u64,
    buffer: VecDeque<Record>,
    exhausted: bool,
}

impl Iterator for PagedRecords<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.store.read_page(self.next_key) {
                Ok(page) => {
                    self.exhausted = page.len() < PAGE_SIZE;
                    if let Some(last) = page.last() {
                        self.next_key = last.id.as_u64() + 1;
                    }
                    self.buffer.extend(page);
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl DocumentStore for RedbDocumentStore {
    fn upsert(&self, document: Document) -> Result<DocId> {
        let ids = self.upsert_batch(vec![document])?;
        Ok(ids[0])
    }

    fn upsert_batch_within(
        &self,
        documents: Vec<Document>,
        deadline: &Deadline,
    ) -> Result<Vec<DocId>> {
        let write_txn = self.db.begin_write()?;
        let ids = Self::write_documents(&write_txn, documents)?;
        if let Err(err) = deadline.check() {
            write_txn.abort()?;
            return Err(err);
        }
        write_txn.commit()?;
        Ok(ids)
    }

    fn get(&self, id: DocId) -> Result<Option<Record>> {
        self.read_record(id.as_u64())
    }

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Record>> {
        let id = {
            let read_txn = self.db.begin_read()?;
            let external_ids = read_txn.open_table(EXTERNAL_IDS_TABLE)?;
            external_ids.get(external_id)?.map(|v| v.value())
        };
        match id {
            Some(id) => self.read_record(id),
            None => Ok(None),
        }
    }

    fn all(&self) -> RecordIter<'_> {
        Box::new(PagedRecords {
            store: self,
            next_key: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    fn remove(&self, id: DocId) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut records = write_txn.open_table(RECORDS_TABLE)?;
            let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;
            let mut external_ids = write_txn.open_table(EXTERNAL_IDS_TABLE)?;

            let document = records
                .remove(id.as_u64())?
                .map(|payload| serde_json::from_slice::<Document>(payload.value()))
                .transpose()?;
            embeddings.remove(id.as_u64())?;
            if let Some(document) = &document {
                external_ids.remove(document.external_id.as_str())?;
            }
            document.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn len(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let records = read_txn.open_table(RECORDS_TABLE)?;
        let count = records.len()?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{exercise_abandoned_batch, exercise_batch, exercise_upsert_contract};
    use tempfile::tempdir;

    #[test]
    fn upsert_contract() {
        let dir = tempdir().unwrap();
        let store = RedbDocumentStore::open(dir.path().join("docs.redb")).unwrap();
        exercise_upsert_contract(&store);
    }

    #[test]
    fn batch_upsert() {
        let dir = tempdir().unwrap();
        let store = RedbDocumentStore::open(dir.path().join("docs.redb")).unwrap();
        exercise_batch(&store);
    }

    #[test]
    fn abandoned_batch_is_rolled_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docs.redb");
        {
            let store = RedbDocumentStore::open(&path).unwrap();
            exercise_abandoned_batch(&store);
        }

        let store = RedbDocumentStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.find_by_external_id("k1").unwrap().is_none());
    }

    #[test]
    fn embeddings_round_trip_exactly() {
        let dir = tempdir().unwrap();
        let store = RedbDocumentStore::open(dir.path().join("docs.redb")).unwrap();
        let embedding = vec![0.1_f32, -0.333_333_34, 0.9, 1e-7];
        let id = store
            .upsert(Document::new("k", "T", "").with_embedding(embedding.clone()))
            .unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().document.embedding, Some(embedding));

        store.upsert(Document::new("k", "T", "")).unwrap();
        assert!(store.get(id).unwrap().unwrap().document.embedding.is_none());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("docs.redb");

        let id = {
            let store = RedbDocumentStore::open(&path).unwrap();
            store.upsert(Document::new("k1", "Persisted", "")).unwrap()
        };

        let store = RedbDocumentStore::open(&path).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().document.title, "Persisted");
        let next = store.upsert(Document::new("k2", "Fresh", "")).unwrap();
        assert!(next > id);
    }

    #[test]
    fn iterates_across_pages() {
        let dir = tempdir().unwrap();
        let store = RedbDocumentStore::open(dir.path().join("docs.redb")).unwrap();
        let documents: Vec<Document> = (0..PAGE_SIZE * 2 + 3)
            .map(|i| Document::new(format!("k{i}"), format!("Title {i}"), ""))
            .collect();
        store.upsert_batch(documents).unwrap();

        let ids: Vec<u64> = store.all().map(|r| r.unwrap().id.as_u64()).collect();
        assert_eq!(ids.len(), PAGE_SIZE * 2 + 3);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(store.len().unwrap(), PAGE_SIZE * 2 + 3);
    }
}
