//! Array stashing and hydration
//!
//! [`stash`] rewrites a document for persistence: every in-memory array is
//! encoded and written to the blob store, and the array is replaced by the
//! handle of that blob. [`hydrate`] is the inverse on read.
//!
//! Neither walk mutates its input. Bookkeeping for one walk lives in a
//! [`StashState`] threaded through the recursion, so concurrent saves share
//! nothing but the stores.
//!
//! # Handle reconciliation
//!
//! `stash` receives the handles the document referenced before this save
//! (the prior pool). Each new array is written to a fresh blob; a pooled
//! handle consumed for that field is recorded as replaced, not reused, so
//! every prior handle that the rewritten document no longer reaches is
//! returned in [`StashOutcome::orphaned`] for the caller to delete once the
//! document write has landed. Handles already present in the tree are
//! kept and never orphaned.
//!
//! A blob belongs to exactly one document. Before a handle copied from
//! another document is saved, [`copy_unowned_blobs`] gives the new
//! document its own copy, so deleting either document never strands the
//! other.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::codec;
use crate::error::StashResult;
use crate::ids::BlobHandle;
use crate::storage::BlobStore;
use crate::value::{fields, Document, Value};

/// Result of stashing one document
#[derive(Debug, Clone, PartialEq)]
pub struct StashOutcome {
    /// Persistable document: no in-memory arrays, no reserved bookkeeping
    pub document: Document,
    /// Every handle the rewritten document references, in encounter order
    pub blob_handles: Vec<BlobHandle>,
    /// Prior handles the rewritten document no longer references
    pub orphaned: Vec<BlobHandle>,
}

/// Per-walk accumulator
struct StashState<'a, B: ?Sized> {
    blobs: &'a B,
    pool: VecDeque<BlobHandle>,
    referenced: Vec<BlobHandle>,
    seen: HashSet<BlobHandle>,
    replaced: Vec<BlobHandle>,
}

impl<B: BlobStore + ?Sized> StashState<'_, B> {
    fn reference(&mut self, handle: BlobHandle) {
        if self.seen.insert(handle) {
            self.referenced.push(handle);
        }
    }

    fn stash_value(&mut self, value: &Value) -> StashResult<Value> {
        Ok(match value {
            Value::Array(array) => {
                let payload = codec::encode(array)?;
                let handle = self.blobs.put(&payload)?;
                match self.pool.pop_front() {
                    Some(previous) => {
                        debug!(handle = %handle, replaces = %previous, "Stashed array");
                        self.replaced.push(previous);
                    }
                    None => debug!(handle = %handle, "Stashed array"),
                }
                self.reference(handle);
                Value::Blob(handle)
            }
            Value::Blob(handle) => {
                self.reference(*handle);
                Value::Blob(*handle)
            }
            Value::Document(doc) => Value::Document(self.stash_document(doc)?),
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.stash_value(item))
                    .collect::<StashResult<Vec<_>>>()?,
            ),
            Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::String(_)
            | Value::Binary(_)
            | Value::DateTime(_)
            | Value::Id(_) => value.clone(),
        })
    }

    fn stash_document(&mut self, doc: &Document) -> StashResult<Document> {
        let mut out = Document::new();
        for (key, value) in doc {
            out.insert(key.clone(), self.stash_value(value)?);
        }
        Ok(out)
    }
}

/// Replace every array in `document` with a handle to a freshly written blob
///
/// `prior` is the set of handles the document referenced before this save.
/// The reserved `_npObjectIDs` and `insertion_date` fields are dropped from
/// the output; the caller sets them when it writes the document.
///
/// A failed blob put aborts the walk. Blobs already written by this walk
/// are then unreferenced, which leaves them as harmless leaks rather than
/// dangling references.
pub fn stash<B>(document: &Document, prior: &[BlobHandle], blobs: &B) -> StashResult<StashOutcome>
where
    B: BlobStore + ?Sized,
{
    let body = document.without_reserved();

    // Handles that stay in the tree are never candidates for deletion
    let kept: HashSet<BlobHandle> = reachable_handles(&body).into_iter().collect();
    let mut pool = VecDeque::new();
    for handle in prior {
        if !kept.contains(handle) && !pool.contains(handle) {
            pool.push_back(*handle);
        }
    }

    let mut state = StashState {
        blobs,
        pool,
        referenced: Vec::new(),
        seen: HashSet::new(),
        replaced: Vec::new(),
    };
    let rewritten = state.stash_document(&body)?;

    let StashState {
        pool,
        referenced,
        mut replaced,
        ..
    } = state;
    replaced.extend(pool);

    Ok(StashOutcome {
        document: rewritten,
        blob_handles: referenced,
        orphaned: replaced,
    })
}

/// Every blob handle reachable from the document's field values
///
/// The `_npObjectIDs` bookkeeping list itself is not scanned. Handles are
/// returned once each, in encounter order.
pub fn reachable_handles(document: &Document) -> Vec<BlobHandle> {
    fn collect(value: &Value, out: &mut Vec<BlobHandle>) {
        match value {
            Value::Blob(handle) => {
                if !out.contains(handle) {
                    out.push(*handle);
                }
            }
            Value::Document(doc) => doc.values().for_each(|v| collect(v, out)),
            Value::List(items) => items.iter().for_each(|v| collect(v, out)),
            _ => {}
        }
    }

    let mut out = Vec::new();
    for (key, value) in document {
        if key != fields::NP_OBJECT_IDS {
            collect(value, &mut out);
        }
    }
    out
}

/// Point every handle not in `owned` at a fresh copy of its blob
///
/// Handles listed in `owned` are left alone; any other handle reachable
/// from the fields is read and written back under a new handle. A handle
/// seen twice maps to the same copy. The `_npObjectIDs` list is not
/// rewritten. Fails with [`crate::StashError::BlobMissing`] if a foreign
/// handle does not resolve.
pub fn copy_unowned_blobs<B>(
    document: &Document,
    owned: &[BlobHandle],
    blobs: &B,
) -> StashResult<Document>
where
    B: BlobStore + ?Sized,
{
    let owned: HashSet<BlobHandle> = owned.iter().copied().collect();
    let mut copies = HashMap::new();

    let mut out = Document::new();
    for (key, value) in document {
        let value = if key == fields::NP_OBJECT_IDS {
            value.clone()
        } else {
            copy_value(value, &owned, &mut copies, blobs)?
        };
        out.insert(key.clone(), value);
    }
    Ok(out)
}

fn copy_value<B>(
    value: &Value,
    owned: &HashSet<BlobHandle>,
    copies: &mut HashMap<BlobHandle, BlobHandle>,
    blobs: &B,
) -> StashResult<Value>
where
    B: BlobStore + ?Sized,
{
    Ok(match value {
        Value::Blob(handle) if !owned.contains(handle) => {
            let copy = match copies.get(handle) {
                Some(copy) => *copy,
                None => {
                    let payload = blobs.get(handle)?;
                    let copy = blobs.put(&payload)?;
                    debug!(handle = %copy, source = %handle, "Copied blob");
                    copies.insert(*handle, copy);
                    copy
                }
            };
            Value::Blob(copy)
        }
        Value::Document(doc) => {
            let mut out = Document::new();
            for (key, value) in doc {
                out.insert(key.clone(), copy_value(value, owned, copies, blobs)?);
            }
            Value::Document(out)
        }
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|item| copy_value(item, owned, copies, blobs))
                .collect::<StashResult<Vec<_>>>()?,
        ),
        other => other.clone(),
    })
}

/// Replace every blob handle in `document` with the array it stores
///
/// The identity field and the `_npObjectIDs` list are left as handles. A
/// missing blob fails with [`crate::StashError::BlobMissing`]; a corrupt
/// payload with [`crate::StashError::Codec`].
pub fn hydrate<B>(document: &Document, blobs: &B) -> StashResult<Document>
where
    B: BlobStore + ?Sized,
{
    let mut out = Document::new();
    for (key, value) in document {
        let value = if key == fields::ID || key == fields::NP_OBJECT_IDS {
            value.clone()
        } else {
            hydrate_value(value, blobs)?
        };
        out.insert(key.clone(), value);
    }
    Ok(out)
}

fn hydrate_value<B>(value: &Value, blobs: &B) -> StashResult<Value>
where
    B: BlobStore + ?Sized,
{
    Ok(match value {
        Value::Blob(handle) => {
            let payload = blobs.get(handle)?;
            let array = codec::decode(&payload)?;
            debug!(handle = %handle, array = %array, "Hydrated blob");
            Value::Array(array)
        }
        Value::Document(doc) => {
            let mut out = Document::new();
            for (key, value) in doc {
                out.insert(key.clone(), hydrate_value(value, blobs)?);
            }
            Value::Document(out)
        }
        Value::List(items) => Value::List(
            items
                .iter()
                .map(|item| hydrate_value(item, blobs))
                .collect::<StashResult<Vec<_>>>()?,
        ),
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::NdArray;
    use crate::doc;
    use crate::error::StashError;
    use crate::storage::InMemoryBlobStore;

    fn sample() -> Document {
        doc! {
            "item" => "A",
            "measurement" => NdArray::from_vec(vec![1.0f64, 2.0, 3.0]),
            "detector" => doc! {
                "gain" => 2.5,
                "frame" => NdArray::from_shape_vec(vec![2, 2], vec![1u8, 2, 3, 4]).unwrap(),
            },
        }
    }

    #[test]
    fn test_stash_replaces_arrays_with_handles() {
        let blobs = InMemoryBlobStore::new();
        let outcome = stash(&sample(), &[], &blobs).unwrap();

        assert_eq!(outcome.blob_handles.len(), 2);
        assert!(outcome.orphaned.is_empty());
        assert!(!outcome.document.get("measurement").unwrap().contains_array());
        assert!(outcome.document.get_path("detector.frame").unwrap().as_blob().is_some());
        assert_eq!(outcome.document.get_path("detector.gain"), Some(&Value::Float(2.5)));
        assert_eq!(blobs.len().unwrap(), 2);
    }

    #[test]
    fn test_handles_follow_encounter_order() {
        let blobs = InMemoryBlobStore::new();
        let outcome = stash(&sample(), &[], &blobs).unwrap();

        // "detector" sorts before "measurement"
        let frame = outcome.document.get_path("detector.frame").unwrap().as_blob().unwrap();
        let measurement = outcome.document.get("measurement").unwrap().as_blob().unwrap();
        assert_eq!(outcome.blob_handles, vec![frame, measurement]);
    }

    #[test]
    fn test_stash_does_not_touch_input() {
        let blobs = InMemoryBlobStore::new();
        let original = sample();
        let copy = original.clone();
        stash(&original, &[], &blobs).unwrap();
        assert_eq!(original, copy);
    }

    #[test]
    fn test_hydrate_inverts_stash() {
        let blobs = InMemoryBlobStore::new();
        let original = sample();
        let outcome = stash(&original, &[], &blobs).unwrap();

        let hydrated = hydrate(&outcome.document, &blobs).unwrap();
        assert_eq!(hydrated, original);
    }

    #[test]
    fn test_prior_handles_are_orphaned() {
        let blobs = InMemoryBlobStore::new();
        let first = stash(&sample(), &[], &blobs).unwrap();

        let mut changed = sample();
        changed.insert("measurement", NdArray::from_vec(vec![9.0f64]));
        let second = stash(&changed, &first.blob_handles, &blobs).unwrap();

        assert_eq!(second.blob_handles.len(), 2);
        assert_eq!(second.orphaned.len(), 2);
        for handle in &first.blob_handles {
            assert!(second.orphaned.contains(handle));
            assert!(!second.blob_handles.contains(handle));
        }
    }

    #[test]
    fn test_removed_array_is_orphaned() {
        let blobs = InMemoryBlobStore::new();
        let first = stash(&doc! { "a" => NdArray::from_vec(vec![1i32]) }, &[], &blobs).unwrap();

        let second = stash(&doc! { "b" => "text" }, &first.blob_handles, &blobs).unwrap();
        assert!(second.blob_handles.is_empty());
        assert_eq!(second.orphaned, first.blob_handles);
    }

    #[test]
    fn test_handles_already_in_tree_are_kept() {
        let blobs = InMemoryBlobStore::new();
        let first = stash(&sample(), &[], &blobs).unwrap();

        // Persisted form saved back unchanged
        let second = stash(&first.document, &first.blob_handles, &blobs).unwrap();
        assert_eq!(second.blob_handles, first.blob_handles);
        assert!(second.orphaned.is_empty());
        assert_eq!(blobs.len().unwrap(), 2);
    }

    #[test]
    fn test_reserved_fields_are_dropped() {
        let blobs = InMemoryBlobStore::new();
        let mut input = doc! { "item" => "A" };
        input.set_np_object_ids(&[BlobHandle::new()]);
        input.insert(fields::INSERTION_DATE, chrono::Utc::now());
        let id = crate::ids::DocumentId::new();
        input.set_id(id);

        let outcome = stash(&input, &[], &blobs).unwrap();
        assert!(!outcome.document.contains_key(fields::NP_OBJECT_IDS));
        assert!(!outcome.document.contains_key(fields::INSERTION_DATE));
        assert_eq!(outcome.document.id(), Some(id));
        assert!(outcome.blob_handles.is_empty());
    }

    #[test]
    fn test_arrays_inside_lists() {
        let blobs = InMemoryBlobStore::new();
        let input = doc! {
            "frames" => vec![
                Value::from(NdArray::from_vec(vec![1i64])),
                Value::from("marker"),
                Value::from(NdArray::from_vec(vec![2i64])),
            ],
        };

        let outcome = stash(&input, &[], &blobs).unwrap();
        assert_eq!(outcome.blob_handles.len(), 2);
        assert_eq!(hydrate(&outcome.document, &blobs).unwrap(), input);
    }

    #[test]
    fn test_reachable_handles_skips_bookkeeping() {
        let inner = BlobHandle::new();
        let listed_only = BlobHandle::new();
        let mut d = doc! { "x" => doc! { "data" => inner }, "y" => vec![Value::from(inner)] };
        d.set_np_object_ids(&[inner, listed_only]);

        assert_eq!(reachable_handles(&d), vec![inner]);
    }

    #[test]
    fn test_copy_unowned_blobs() {
        let blobs = InMemoryBlobStore::new();
        let mine = blobs.put(b"mine").unwrap();
        let theirs = blobs.put(b"theirs").unwrap();
        let mut input = doc! {
            "a" => mine,
            "b" => theirs,
            "c" => vec![Value::from(theirs)],
        };
        input.set_np_object_ids(&[mine, theirs]);

        let copied = copy_unowned_blobs(&input, &[mine], &blobs).unwrap();

        assert_eq!(copied.get("a"), Some(&Value::Blob(mine)));
        let copy = copied.get("b").and_then(Value::as_blob).unwrap();
        assert_ne!(copy, theirs);
        assert_eq!(copied.get("c"), Some(&Value::List(vec![Value::Blob(copy)])));
        assert_eq!(blobs.get(&copy).unwrap(), b"theirs");
        assert_eq!(copied.np_object_ids(), vec![mine, theirs]);
        assert_eq!(blobs.len().unwrap(), 3);
    }

    #[test]
    fn test_copy_of_missing_blob_fails() {
        let blobs = InMemoryBlobStore::new();
        let gone = BlobHandle::new();
        let err = copy_unowned_blobs(&doc! { "m" => gone }, &[], &blobs).unwrap_err();
        assert!(matches!(err, StashError::BlobMissing(h) if h == gone));
    }

    #[test]
    fn test_hydrate_missing_blob() {
        let blobs = InMemoryBlobStore::new();
        let handle = BlobHandle::new();
        let err = hydrate(&doc! { "m" => handle }, &blobs).unwrap_err();
        assert!(matches!(err, StashError::BlobMissing(h) if h == handle));
    }

    #[test]
    fn test_hydrate_corrupt_payload() {
        let blobs = InMemoryBlobStore::new();
        let handle = blobs.put(b"not an array").unwrap();
        let err = hydrate(&doc! { "m" => handle }, &blobs).unwrap_err();
        assert!(matches!(err, StashError::Codec(_)));
    }

    #[test]
    fn test_hydrate_leaves_bookkeeping_alone() {
        let blobs = InMemoryBlobStore::new();
        let outcome = stash(&sample(), &[], &blobs).unwrap();
        let mut stored = outcome.document.clone();
        stored.set_np_object_ids(&outcome.blob_handles);

        let hydrated = hydrate(&stored, &blobs).unwrap();
        assert_eq!(hydrated.np_object_ids(), outcome.blob_handles);
    }
}
