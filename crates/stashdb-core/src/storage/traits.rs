//! Store contracts
//!
//! The repository talks to two external collaborators through these
//! traits. Implementations take `&self` and provide their own interior
//! synchronization, so one repository can serve concurrent callers.

use crate::error::{StashError, StashResult};
use crate::ids::{BlobHandle, DocumentId};
use crate::query::{Filter, Projection};
use crate::value::{Document, Value};

/// Which image of the document `find_one_and_update` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnDocument {
    /// The document as it was before the update (`None` if it was inserted)
    Before,
    /// The document as it is after the update
    After,
}

/// Document database holding one collection
pub trait DocumentStore: Send + Sync {
    /// All documents matching `filter`, in insertion order
    fn find(&self, filter: &Filter, projection: Option<&Projection>) -> StashResult<Vec<Document>>;

    /// First document matching `filter`
    fn find_one(&self, filter: &Filter) -> StashResult<Option<Document>> {
        Ok(self.find(filter, None)?.into_iter().next())
    }

    /// Overwrite the top-level fields in `set` on the first match
    ///
    /// With `upsert` and no match, inserts a new document built from the
    /// filter's clauses plus `set`, with a fresh identity.
    fn find_one_and_update(
        &self,
        filter: &Filter,
        set: &Document,
        upsert: bool,
        return_document: ReturnDocument,
    ) -> StashResult<Option<Document>>;

    /// Insert when the document has no known identity, replace otherwise
    fn upsert(&self, document: &Document) -> StashResult<DocumentId>;

    /// Remove a document. Returns `true` if it existed.
    fn delete(&self, id: &DocumentId) -> StashResult<bool>;

    /// Unique values at `path` among documents matching `filter`
    fn distinct(&self, path: &str, filter: &Filter) -> StashResult<Vec<Value>>;

    /// Number of documents matching `filter`
    fn count(&self, filter: &Filter) -> StashResult<usize> {
        Ok(self.find(filter, None)?.len())
    }
}

/// Content-blob store
pub trait BlobStore: Send + Sync {
    /// Store a payload under a newly allocated handle
    fn put(&self, bytes: &[u8]) -> StashResult<BlobHandle>;

    /// Read a payload. Fails with [`StashError::BlobMissing`] if absent.
    fn get(&self, handle: &BlobHandle) -> StashResult<Vec<u8>>;

    /// Remove a payload. Deleting an absent handle is not an error;
    /// returns `true` if the blob existed.
    fn delete(&self, handle: &BlobHandle) -> StashResult<bool>;

    fn exists(&self, handle: &BlobHandle) -> StashResult<bool>;

    /// Number of stored blobs
    fn len(&self) -> StashResult<usize>;

    fn is_empty(&self) -> StashResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Total payload bytes across all blobs
    fn total_bytes(&self) -> StashResult<u64>;
}

/// Reject documents that still carry in-memory arrays
///
/// Stores persist only the stashed form; an array here means a caller
/// bypassed the repository.
pub fn ensure_persistable(document: &Document) -> StashResult<()> {
    match document.iter().find(|(_, v)| v.contains_array()) {
        Some((field, _)) => Err(StashError::InvalidDocument(format!(
            "field '{}' holds an in-memory array; save through the repository",
            field
        ))),
        None => Ok(()),
    }
}
