//! In-memory stores
//!
//! Both stores hold their contents behind a `RwLock` and clone on read and
//! write. They implement the same contracts as the persistent backends and
//! are what the repository tests run against.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use tracing::debug;

use crate::error::{StashError, StashResult};
use crate::ids::{BlobHandle, DocumentId};
use crate::query::{self, Filter, Projection};
use crate::storage::traits::{ensure_persistable, BlobStore, DocumentStore, ReturnDocument};
use crate::storage::{apply_set, upserted_document, with_identity};
use crate::value::{Document, Value};

/// In-memory document collection
///
/// Documents are kept in insertion order; replacing a document keeps its
/// position.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<Vec<(DocumentId, Document)>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a document by identity, bypassing filters
    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.documents
            .read()
            .expect("lock poisoned")
            .iter()
            .find(|(doc_id, _)| doc_id == id)
            .map(|(_, doc)| doc.clone())
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn find(&self, filter: &Filter, projection: Option<&Projection>) -> StashResult<Vec<Document>> {
        let documents = self.documents.read().expect("lock poisoned");
        Ok(documents
            .iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(_, doc)| query::project(doc, projection))
            .collect())
    }

    fn find_one_and_update(
        &self,
        filter: &Filter,
        set: &Document,
        upsert: bool,
        return_document: ReturnDocument,
    ) -> StashResult<Option<Document>> {
        ensure_persistable(set)?;
        let mut documents = self.documents.write().expect("lock poisoned");

        if let Some((_, doc)) = documents.iter_mut().find(|(_, doc)| filter.matches(doc)) {
            let before = doc.clone();
            apply_set(doc, set);
            return Ok(Some(match return_document {
                ReturnDocument::Before => before,
                ReturnDocument::After => doc.clone(),
            }));
        }

        if !upsert {
            return Ok(None);
        }

        let (id, doc) = upserted_document(filter, set);
        documents.push((id, doc.clone()));
        Ok(match return_document {
            ReturnDocument::Before => None,
            ReturnDocument::After => Some(doc),
        })
    }

    fn upsert(&self, document: &Document) -> StashResult<DocumentId> {
        ensure_persistable(document)?;
        let (id, doc) = with_identity(document);
        let mut documents = self.documents.write().expect("lock poisoned");

        match documents.iter_mut().find(|(doc_id, _)| *doc_id == id) {
            Some(slot) => slot.1 = doc,
            None => documents.push((id, doc)),
        }
        Ok(id)
    }

    fn delete(&self, id: &DocumentId) -> StashResult<bool> {
        let mut documents = self.documents.write().expect("lock poisoned");
        let before = documents.len();
        documents.retain(|(doc_id, _)| doc_id != id);
        Ok(documents.len() != before)
    }

    fn distinct(&self, path: &str, filter: &Filter) -> StashResult<Vec<Value>> {
        let documents = self.documents.read().expect("lock poisoned");
        Ok(query::distinct_values(
            documents
                .iter()
                .map(|(_, doc)| doc)
                .filter(|doc| filter.matches(doc)),
            path,
        ))
    }
}

impl fmt::Debug for InMemoryDocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDocumentStore")
            .field("document_count", &self.len())
            .finish()
    }
}

/// In-memory blob store
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<BlobHandle, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All handles currently stored, sorted
    pub fn handles(&self) -> Vec<BlobHandle> {
        let mut handles: Vec<BlobHandle> = self
            .blobs
            .read()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect();
        handles.sort();
        handles
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, bytes: &[u8]) -> StashResult<BlobHandle> {
        let handle = BlobHandle::new();
        self.blobs
            .write()
            .expect("lock poisoned")
            .insert(handle, bytes.to_vec());
        debug!(%handle, size = bytes.len(), "Stored blob");
        Ok(handle)
    }

    fn get(&self, handle: &BlobHandle) -> StashResult<Vec<u8>> {
        self.blobs
            .read()
            .expect("lock poisoned")
            .get(handle)
            .cloned()
            .ok_or(StashError::BlobMissing(*handle))
    }

    fn delete(&self, handle: &BlobHandle) -> StashResult<bool> {
        let existed = self
            .blobs
            .write()
            .expect("lock poisoned")
            .remove(handle)
            .is_some();
        debug!(%handle, existed, "Deleted blob");
        Ok(existed)
    }

    fn exists(&self, handle: &BlobHandle) -> StashResult<bool> {
        Ok(self
            .blobs
            .read()
            .expect("lock poisoned")
            .contains_key(handle))
    }

    fn len(&self) -> StashResult<usize> {
        Ok(self.blobs.read().expect("lock poisoned").len())
    }

    fn total_bytes(&self) -> StashResult<u64> {
        Ok(self
            .blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|b| b.len() as u64)
            .sum())
    }
}

impl fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.blobs.read().expect("lock poisoned").len();
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &count)
            .finish()
    }
}
