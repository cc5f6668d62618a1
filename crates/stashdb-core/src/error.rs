//! Error handling
//!
//! Every fallible operation in the core returns [`StashError`]. Store
//! adapter errors propagate unmodified; the only failure swallowed anywhere
//! is deleting a document that does not exist.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;
use crate::ids::BlobHandle;
use crate::wire::WireError;

/// Errors surfaced by the stores, the transformer and the repository
#[derive(Error, Debug)]
pub enum StashError {
    /// Array payload could not be encoded or decoded
    #[error("Array codec error: {0}")]
    Codec(#[from] CodecError),

    /// A referenced blob is absent from the blob store
    #[error("Blob {0} is missing from the blob store")]
    BlobMissing(BlobHandle),

    /// A store could not be reached or opened
    #[error("{store} store unavailable: {details}")]
    StoreUnavailable {
        store: &'static str,
        details: String,
    },

    /// A persisted document could not be read back
    #[error("Malformed persisted document: {0}")]
    Wire(#[from] WireError),

    /// Document rejected before reaching a store
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error("Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again.")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Any other I/O failure
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StashError {
    /// Classify an I/O error with path context
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StashError::PermissionDenied {
                path,
                source: error,
            },
            _ if is_disk_full_error(&error) => StashError::DiskFull {
                path,
                source: error,
            },
            _ => StashError::Io {
                path,
                source: error,
            },
        }
    }

    pub(crate) fn unavailable(store: &'static str, details: impl Into<String>) -> Self {
        StashError::StoreUnavailable {
            store,
            details: details.into(),
        }
    }

    /// Check if the caller can fix the condition and retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StashError::DiskFull { .. }
                | StashError::PermissionDenied { .. }
                | StashError::StoreUnavailable { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StashError::DiskFull { .. } => Some("Free up disk space and try again."),
            StashError::PermissionDenied { .. } => {
                Some("Check file and directory permissions of the data directory.")
            }
            StashError::StoreUnavailable { .. } => {
                Some("Check that the data directory exists and the database is not locked by another process.")
            }
            StashError::BlobMissing(_) => {
                Some("The document references a blob that no longer exists. Re-save the document with its arrays to repair it.")
            }
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for stash operations
pub type StashResult<T> = Result<T, StashError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_classification() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = StashError::from_io(io_err, PathBuf::from("/test/path"));

        assert!(matches!(err, StashError::PermissionDenied { .. }));
        assert!(err.is_recoverable());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_disk_full_detection() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let err = StashError::from_io(io_err, PathBuf::from("/full/disk"));

        assert!(matches!(err, StashError::DiskFull { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_other_io_is_not_recoverable() {
        let io_err = io::Error::new(io::ErrorKind::InvalidData, "bad bytes");
        let err = StashError::from_io(io_err, PathBuf::from("/data/fs/abc"));

        assert!(matches!(err, StashError::Io { .. }));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("/data/fs/abc"));
    }

    #[test]
    fn test_blob_missing_display() {
        let handle = BlobHandle::new();
        let err = StashError::BlobMissing(handle);

        assert!(err.to_string().contains(&handle.to_hex()));
        assert!(!err.is_recoverable());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_codec_error_converts() {
        let err: StashError = CodecError::UnknownDType("c64".to_string()).into();
        assert!(matches!(err, StashError::Codec(_)));
        assert!(err.to_string().contains("c64"));
    }
}
