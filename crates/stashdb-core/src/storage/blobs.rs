//! Filesystem blob store
//!
//! One file per blob, named by the handle's hex form, under a single root
//! directory. Writes go through a temp file and a rename so a blob is
//! either fully present or absent, and a failed write leaves nothing
//! behind.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{StashError, StashResult};
use crate::ids::BlobHandle;
use crate::storage::traits::BlobStore;

/// Blob store rooted at a directory
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) the blob directory at `root`
    pub fn open(root: impl Into<PathBuf>) -> StashResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            StashError::unavailable("blob", format!("cannot create {:?}: {}", root, e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, handle: &BlobHandle) -> PathBuf {
        self.root.join(handle.to_hex())
    }

    /// Stored blob files, skipping temp files and anything foreign
    fn blob_entries(&self) -> StashResult<Vec<(BlobHandle, PathBuf)>> {
        let entries =
            fs::read_dir(&self.root).map_err(|e| StashError::from_io(e, self.root.clone()))?;

        let mut blobs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StashError::from_io(e, self.root.clone()))?;
            let path = entry.path();
            let handle = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse::<BlobHandle>().ok());
            if let Some(handle) = handle {
                blobs.push((handle, path));
            }
        }
        Ok(blobs)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, bytes: &[u8]) -> StashResult<BlobHandle> {
        let handle = BlobHandle::new();
        let path = self.path_for(&handle);
        atomic_write(&path, bytes)?;
        debug!(handle = %handle, bytes = bytes.len(), "Stored blob");
        Ok(handle)
    }

    fn get(&self, handle: &BlobHandle) -> StashResult<Vec<u8>> {
        let path = self.path_for(handle);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StashError::BlobMissing(*handle)),
            Err(e) => Err(StashError::from_io(e, path)),
        }
    }

    fn delete(&self, handle: &BlobHandle) -> StashResult<bool> {
        let path = self.path_for(handle);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(handle = %handle, "Deleted blob");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StashError::from_io(e, path)),
        }
    }

    fn exists(&self, handle: &BlobHandle) -> StashResult<bool> {
        Ok(self.path_for(handle).is_file())
    }

    fn len(&self) -> StashResult<usize> {
        Ok(self.blob_entries()?.len())
    }

    fn total_bytes(&self) -> StashResult<u64> {
        let mut total = 0;
        for (_, path) in self.blob_entries()? {
            let meta = fs::metadata(&path).map_err(|e| StashError::from_io(e, path.clone()))?;
            total += meta.len();
        }
        Ok(total)
    }
}

/// Write data to a file atomically
///
/// Writes a temp file in the same directory, syncs it, then renames it over
/// `path`. On any failure the temp file is removed.
fn atomic_write(path: &Path, data: &[u8]) -> StashResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| StashError::from_io(e, dir.to_path_buf()))?;

    let mut file =
        NamedTempFile::new_in(dir).map_err(|e| StashError::from_io(e, dir.to_path_buf()))?;
    let temp_path = file.path().to_path_buf();
    file.write_all(data)
        .map_err(|e| StashError::from_io(e, temp_path.clone()))?;
    file.as_file()
        .sync_all()
        .map_err(|e| StashError::from_io(e, temp_path.clone()))?;

    // A failed persist hands the temp file back; dropping it deletes it
    file.persist(path)
        .map_err(|e| StashError::from_io(e.error, path.to_path_buf()))?;

    Ok(())
}
