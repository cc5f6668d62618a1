//! Repository facade
//!
//! The [`Repository`] orchestrates saves, loads and deletes over a
//! [`DocumentStore`] and a [`BlobStore`], using [`crate::transform`] to move
//! arrays in and out of blobs.
//!
//! ## Ordering
//!
//! Every write follows the same order: blob puts, then the document write,
//! then blob deletes. A crash between steps can leave unreferenced blobs
//! behind, never a document pointing at a blob that is not there.
//!
//! ## Usage
//!
//! ```
//! use stashdb_core::{doc, Filter, Loaded, NdArray, Repository};
//!
//! let repo = Repository::in_memory();
//! let receipt = repo
//!     .save_one(&doc! { "item" => "A", "measurement" => NdArray::from_vec(vec![1.0f64, 2.0]) })
//!     .unwrap();
//! assert_eq!(receipt.blob_handles.len(), 1);
//!
//! let loaded = repo.load_many(&Filter::new().eq("item", "A"), None, true).unwrap();
//! assert!(matches!(loaded, Loaded::One(_)));
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{StashError, StashResult};
use crate::ids::{BlobHandle, DocumentId};
use crate::query::{Filter, Projection};
use crate::storage::{
    apply_set, BlobStore, DocumentStore, FsBlobStore, InMemoryBlobStore, InMemoryDocumentStore,
    ReturnDocument, SqliteDocumentStore,
};
use crate::transform::{self, reachable_handles};
use crate::value::{fields, Document, Value};

/// Reserved fields written by a successful [`Repository::save_one`]
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReceipt {
    pub id: DocumentId,
    /// The document's new `_npObjectIDs`
    pub blob_handles: Vec<BlobHandle>,
    pub insertion_date: DateTime<Utc>,
}

impl SaveReceipt {
    /// Copy the reserved fields onto the caller's in-memory document
    ///
    /// Arrays in `document` stay in place; only `_id`, `_npObjectIDs` and
    /// `insertion_date` are written.
    pub fn apply_to(&self, document: &mut Document) {
        document.set_id(self.id);
        document.set_np_object_ids(&self.blob_handles);
        document.insert(fields::INSERTION_DATE, self.insertion_date);
    }
}

/// Result of a load, by cardinality
///
/// Zero matches, exactly one match and several matches are distinct
/// variants so callers branch on the count explicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    None,
    One(Document),
    Many(Vec<Document>),
}

impl Loaded {
    fn from_vec(mut docs: Vec<Document>) -> Self {
        match docs.len() {
            0 => Loaded::None,
            1 => docs.pop().map_or(Loaded::None, Loaded::One),
            _ => Loaded::Many(docs),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Loaded::None => 0,
            Loaded::One(_) => 1,
            Loaded::Many(docs) => docs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Loaded::None)
    }

    /// The single document, if exactly one matched
    pub fn one(&self) -> Option<&Document> {
        match self {
            Loaded::One(doc) => Some(doc),
            _ => None,
        }
    }

    /// Flatten to a list regardless of cardinality
    pub fn into_vec(self) -> Vec<Document> {
        match self {
            Loaded::None => Vec::new(),
            Loaded::One(doc) => vec![doc],
            Loaded::Many(docs) => docs,
        }
    }
}

impl IntoIterator for Loaded {
    type Item = Document;
    type IntoIter = std::vec::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_vec().into_iter()
    }
}

/// A document left out of a lenient load because it could not be hydrated
#[derive(Debug)]
pub struct HydrateFailure {
    pub id: Option<DocumentId>,
    pub error: StashError,
}

/// Image slot of a single-image-per-item record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpg,
    Tiff,
}

impl ImageKind {
    /// Field holding the image sub-document
    pub fn field(self) -> &'static str {
        match self {
            ImageKind::Jpg => "jpg",
            ImageKind::Tiff => "tiff",
        }
    }
}

/// Kind of source file a record was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Metadata fields
    Xml,
    Image(ImageKind),
}

impl SourceKind {
    /// Map a file extension (`".jpg"` or `"jpg"`, any case)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "xml" => Some(SourceKind::Xml),
            "jpg" => Some(SourceKind::Image(ImageKind::Jpg)),
            "tiff" => Some(SourceKind::Image(ImageKind::Tiff)),
            _ => None,
        }
    }
}

/// Counts for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryStats {
    pub documents: usize,
    pub blobs: usize,
    pub blob_bytes: u64,
}

/// Data-access facade over a document store and a blob store
pub struct Repository<D, B> {
    documents: D,
    blobs: B,
}

impl Repository<SqliteDocumentStore, FsBlobStore> {
    /// Open the SQLite database and blob directory named by `config`
    pub fn open(config: &Config) -> StashResult<Self> {
        let documents = SqliteDocumentStore::open(&config.database_path(), &config.collection)?;
        let blobs = FsBlobStore::open(config.blob_dir())?;
        info!(
            database = ?config.database_path(),
            blobs = ?config.blob_dir(),
            collection = %config.collection,
            "Opened repository"
        );
        Ok(Self::new(documents, blobs))
    }
}

impl Repository<InMemoryDocumentStore, InMemoryBlobStore> {
    /// Repository backed by in-memory stores
    pub fn in_memory() -> Self {
        Self::new(InMemoryDocumentStore::new(), InMemoryBlobStore::new())
    }
}

impl<D: DocumentStore, B: BlobStore> Repository<D, B> {
    pub fn new(documents: D, blobs: B) -> Self {
        Self { documents, blobs }
    }

    pub fn documents(&self) -> &D {
        &self.documents
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    // ==================== Save ====================

    /// Insert or fully replace a document, stashing its arrays
    ///
    /// Only the stored copy decides which blobs the document owned before
    /// this save; `_npObjectIDs` carried by the caller's document is
    /// ignored. Those blobs are deleted once the new version is written,
    /// unless the new version still references them. Handles the document
    /// carries but does not own (copied from another document) are
    /// replaced by handles to fresh copies of their blobs.
    pub fn save_one(&self, document: &Document) -> StashResult<SaveReceipt> {
        let prior = self.stored_handles(document.id())?;
        let document = transform::copy_unowned_blobs(document, &prior, &self.blobs)?;

        let outcome = transform::stash(&document, &prior, &self.blobs)?;

        let insertion_date = Utc::now();
        let mut persisted = outcome.document;
        persisted.set_np_object_ids(&outcome.blob_handles);
        persisted.insert(fields::INSERTION_DATE, insertion_date);
        let id = self.documents.upsert(&persisted)?;

        self.delete_blobs(&outcome.orphaned)?;

        info!(
            id = %id,
            blobs = outcome.blob_handles.len(),
            released = outcome.orphaned.len(),
            "Saved document"
        );

        Ok(SaveReceipt {
            id,
            blob_handles: outcome.blob_handles,
            insertion_date,
        })
    }

    /// Save each document in turn; identities come back in input order
    ///
    /// Stops at the first failure; documents before it stay saved.
    pub fn save_many(&self, documents: &[Document]) -> StashResult<Vec<DocumentId>> {
        documents
            .iter()
            .map(|doc| self.save_one(doc).map(|receipt| receipt.id))
            .collect()
    }

    /// Merge a document's fields into the record matched by `match_key`
    ///
    /// Arrays are written to fresh blobs, then the fields are `$set` onto
    /// the record whose `match_key` equals this document's value (inserting
    /// one if none matches). Blobs reachable only from fields this call
    /// overwrote are deleted afterwards. Returns the record as it was
    /// before the update, or `None` if it was inserted.
    pub fn save_document_field(
        &self,
        document: &Document,
        match_key: &str,
    ) -> StashResult<Option<Document>> {
        let key_value = document.get(match_key).cloned().ok_or_else(|| {
            StashError::InvalidDocument(format!("missing match key '{}'", match_key))
        })?;
        let filter = Filter::new().eq(match_key, key_value);

        let owned = match self.documents.find_one(&filter)? {
            Some(current) => owned_handles(&current),
            None => Vec::new(),
        };
        let document = transform::copy_unowned_blobs(document, &owned, &self.blobs)?;

        let outcome = transform::stash(&document, &[], &self.blobs)?;
        let mut set = outcome.document;
        set.remove(fields::ID);
        set.insert(fields::INSERTION_DATE, Utc::now());

        let previous =
            self.documents
                .find_one_and_update(&filter, &set, true, ReturnDocument::Before)?;

        let mut merged = match &previous {
            Some(before) => before.clone(),
            None => filter.seed_document(),
        };
        apply_set(&mut merged, &set);
        let referenced = reachable_handles(&merged);

        let mut bookkeeping = Document::new();
        bookkeeping.set_np_object_ids(&referenced);
        self.documents
            .find_one_and_update(&filter, &bookkeeping, false, ReturnDocument::After)?;

        let released = match &previous {
            Some(before) => {
                let keep: HashSet<BlobHandle> = referenced.iter().copied().collect();
                let stale: Vec<BlobHandle> = owned_handles(before)
                    .into_iter()
                    .filter(|h| !keep.contains(h))
                    .collect();
                self.delete_blobs(&stale)?;
                stale.len()
            }
            None => 0,
        };

        info!(
            match_key = match_key,
            inserted = previous.is_none(),
            blobs = referenced.len(),
            released,
            "Saved document fields"
        );

        Ok(previous)
    }

    /// Save one image record, replacing any previous image of that kind
    ///
    /// The record is matched on `item`; the image sub-document lives at
    /// `jpg` or `tiff` and must carry its pixels in `data`.
    pub fn save_image(&self, document: &Document, kind: ImageKind) -> StashResult<Option<Document>> {
        let path = format!("{}.{}", kind.field(), fields::IMAGE_DATA);
        if document.get_path(&path).is_none() {
            return Err(StashError::InvalidDocument(format!(
                "image record has no '{}'",
                path
            )));
        }
        self.save_document_field(document, fields::ITEM)
    }

    /// Save a record according to the kind of file it came from
    ///
    /// Returns `false`, writing nothing, for an unsupported extension.
    pub fn save_by_source(&self, document: &Document, extension: &str) -> StashResult<bool> {
        match SourceKind::from_extension(extension) {
            Some(SourceKind::Xml) => {
                self.save_document_field(document, fields::ITEM)?;
            }
            Some(SourceKind::Image(kind)) => {
                self.save_image(document, kind)?;
            }
            None => {
                warn!(extension = extension, "Unsupported source kind, skipping");
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ==================== Load ====================

    /// Documents matching `filter`, optionally with arrays hydrated
    ///
    /// The first document that fails to hydrate fails the whole call.
    pub fn load_many(
        &self,
        filter: &Filter,
        projection: Option<&Projection>,
        hydrate: bool,
    ) -> StashResult<Loaded> {
        let found = self.documents.find(filter, projection)?;
        let docs = if hydrate {
            found
                .iter()
                .map(|doc| transform::hydrate(doc, &self.blobs))
                .collect::<StashResult<Vec<_>>>()?
        } else {
            found
        };
        Ok(Loaded::from_vec(docs))
    }

    /// Like [`Repository::load_many`] with hydration, but a document whose
    /// blobs are missing or corrupt is reported and skipped
    ///
    /// Store failures still abort the call.
    pub fn load_many_lenient(
        &self,
        filter: &Filter,
        projection: Option<&Projection>,
    ) -> StashResult<(Loaded, Vec<HydrateFailure>)> {
        let found = self.documents.find(filter, projection)?;

        let mut docs = Vec::with_capacity(found.len());
        let mut failures = Vec::new();
        for doc in &found {
            match transform::hydrate(doc, &self.blobs) {
                Ok(hydrated) => docs.push(hydrated),
                Err(error @ (StashError::BlobMissing(_) | StashError::Codec(_))) => {
                    let id = doc.id();
                    warn!(id = ?id, error = %error, "Skipping document that failed to hydrate");
                    failures.push(HydrateFailure { id, error });
                }
                Err(e) => return Err(e),
            }
        }

        Ok((Loaded::from_vec(docs), failures))
    }

    /// Look up each identity; not hydrated
    pub fn load_by_ids(&self, ids: &[DocumentId]) -> StashResult<Vec<Option<Document>>> {
        ids.iter()
            .map(|id| self.documents.find_one(&Filter::by_id(*id)))
            .collect()
    }

    /// Unique values of a dotted field path among matching documents
    pub fn distinct(&self, field: &str, filter: &Filter) -> StashResult<Vec<Value>> {
        self.documents.distinct(field, filter)
    }

    // ==================== Delete ====================

    /// Delete a document and every blob it owns
    ///
    /// Returns `false` if no document has this identity.
    pub fn delete_one(&self, id: &DocumentId) -> StashResult<bool> {
        let Some(doc) = self.documents.find_one(&Filter::by_id(*id))? else {
            debug!(id = %id, "Delete of unknown document ignored");
            return Ok(false);
        };

        let handles = owned_handles(&doc);
        self.documents.delete(id)?;
        self.delete_blobs(&handles)?;

        info!(id = %id, blobs = handles.len(), "Deleted document");
        Ok(true)
    }

    // ==================== Status ====================

    pub fn stats(&self) -> StashResult<RepositoryStats> {
        Ok(RepositoryStats {
            documents: self.documents.count(&Filter::new())?,
            blobs: self.blobs.len()?,
            blob_bytes: self.blobs.total_bytes()?,
        })
    }

    /// Handles owned by the stored document with this identity, if any
    fn stored_handles(&self, id: Option<DocumentId>) -> StashResult<Vec<BlobHandle>> {
        let Some(id) = id else {
            return Ok(Vec::new());
        };
        Ok(self
            .documents
            .find_one(&Filter::by_id(id))?
            .map(|stored| owned_handles(&stored))
            .unwrap_or_default())
    }

    fn delete_blobs(&self, handles: &[BlobHandle]) -> StashResult<()> {
        for handle in handles {
            self.blobs.delete(handle)?;
        }
        Ok(())
    }
}

/// Handles a stored document is responsible for: its bookkeeping list
/// plus anything reachable from its fields
fn owned_handles(doc: &Document) -> Vec<BlobHandle> {
    let mut handles = doc.np_object_ids();
    for handle in reachable_handles(doc) {
        if !handles.contains(&handle) {
            handles.push(handle);
        }
    }
    handles
}
