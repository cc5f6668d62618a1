//! stashdb Core Library
//!
//! Persists structured documents in a document store while offloading
//! large numeric arrays to a blob store, and splices them back in on read.
//!
//! # Architecture
//!
//! - **Documents**: a tree of [`Value`]s; arrays are [`NdArray`]s in memory
//!   and [`BlobHandle`]s once persisted
//! - **Blob store**: holds each array as a self-describing CBOR payload
//! - **`_npObjectIDs`**: every persisted document lists exactly the blob
//!   handles reachable from its fields; the repository keeps this exact
//!   across saves, merges and deletes
//!
//! # Quick Start
//!
//! ```text
//! let repo = Repository::open(&Config::load()?)?;
//!
//! let receipt = repo.save_one(&doc! {
//!     "item" => "A",
//!     "measurement" => NdArray::from_vec(vec![1.0f64, 2.0, 3.0]),
//! })?;
//!
//! let loaded = repo.load_many(&Filter::by_id(receipt.id), None, true)?;
//! ```
//!
//! # Modules
//!
//! - `repository`: save/load/delete facade (main entry point)
//! - `transform`: stash and hydrate walks
//! - `value`, `array`, `ids`: document model
//! - `codec`: array payload encoding
//! - `wire`: JSON form of persisted documents
//! - `query`: equality filters and projections
//! - `storage`: store traits plus in-memory, SQLite and filesystem backends
//! - `config`: Application configuration

pub mod array;
pub mod codec;
pub mod config;
pub mod error;
pub mod ids;
pub mod query;
pub mod repository;
pub mod storage;
pub mod transform;
pub mod value;
pub mod wire;

pub use array::{DType, Element, NdArray};
pub use codec::CodecError;
pub use config::Config;
pub use error::{StashError, StashResult};
pub use ids::{BlobHandle, DocumentId, IdParseError};
pub use query::{Filter, Projection};
pub use repository::{
    HydrateFailure, ImageKind, Loaded, Repository, RepositoryStats, SaveReceipt, SourceKind,
};
pub use storage::{
    BlobStore, DocumentStore, FsBlobStore, InMemoryBlobStore, InMemoryDocumentStore,
    ReturnDocument, SqliteDocumentStore,
};
pub use transform::{copy_unowned_blobs, hydrate, reachable_handles, stash, StashOutcome};
pub use value::{fields, Document, Value};
pub use wire::WireError;
