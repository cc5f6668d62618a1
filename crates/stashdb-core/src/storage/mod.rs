//! Storage layer
//!
//! Contracts for the two external stores plus bundled backends:
//!
//! - **In-memory**: `RwLock<HashMap>`/`Vec` backed, for tests and embedding
//! - **SQLite**: documents as JSON rows, one table shared by collections
//! - **Filesystem**: one file per blob, written atomically
//!
//! Backends never interpret array payloads and never see in-memory arrays;
//! the repository stashes them before anything reaches a store.

pub mod blobs;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use blobs::FsBlobStore;
pub use memory::{InMemoryBlobStore, InMemoryDocumentStore};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use sqlite::SqliteDocumentStore;
pub use traits::{ensure_persistable, BlobStore, DocumentStore, ReturnDocument};

use crate::ids::DocumentId;
use crate::query::Filter;
use crate::value::{fields, Document};

/// Apply `$set` semantics: overwrite top-level fields of `target`
///
/// `_id` in `set` is ignored; identity never changes through an update.
pub(crate) fn apply_set(target: &mut Document, set: &Document) {
    for (key, value) in set {
        if key != fields::ID {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// The document an upsert inserts when nothing matched
pub(crate) fn upserted_document(filter: &Filter, set: &Document) -> (DocumentId, Document) {
    let mut doc = filter.seed_document();
    apply_set(&mut doc, set);
    let id = doc.id().unwrap_or_default();
    doc.set_id(id);
    (id, doc)
}

/// Give a document an identity if it lacks one
pub(crate) fn with_identity(document: &Document) -> (DocumentId, Document) {
    let mut doc = document.clone();
    let id = doc.id().unwrap_or_default();
    doc.set_id(id);
    (id, doc)
}
