//! Document value model
//!
//! A [`Document`] maps field names to [`Value`]s. A value is a scalar, a
//! nested document, a list, an in-memory [`NdArray`], or a [`BlobHandle`]
//! standing in for an array that has been stashed in the blob store.
//!
//! The stash and hydrate walks pattern-match on [`Value`] exhaustively, so
//! adding a variant forces both directions to be revisited.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::array::NdArray;
use crate::ids::{BlobHandle, DocumentId};

/// Reserved field names
pub mod fields {
    /// Identity assigned by the document store
    pub const ID: &str = "_id";
    /// Every blob handle the persisted document references
    pub const NP_OBJECT_IDS: &str = "_npObjectIDs";
    /// UTC timestamp of the most recent save
    pub const INSERTION_DATE: &str = "insertion_date";
    /// Match key used for single-image-per-item records
    pub const ITEM: &str = "item";
    /// Slot holding the blob handle inside an image sub-document
    pub const IMAGE_DATA: &str = "data";
}

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Opaque binary scalar; never offloaded
    Binary(Vec<u8>),
    DateTime(DateTime<Utc>),
    /// Opaque identifier (a document identity or a foreign key)
    Id(DocumentId),
    /// Persisted stand-in for an array
    Blob(BlobHandle),
    /// In-memory numeric array
    Array(NdArray),
    List(Vec<Value>),
    Document(Document),
}

impl Value {
    /// Short name of the variant, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::DateTime(_) => "datetime",
            Value::Id(_) => "id",
            Value::Blob(_) => "blob",
            Value::Array(_) => "array",
            Value::List(_) => "list",
            Value::Document(_) => "document",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<BlobHandle> {
        match self {
            Value::Blob(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<DocumentId> {
        match self {
            Value::Id(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// True if this value or anything nested in it is an in-memory array
    pub fn contains_array(&self) -> bool {
        match self {
            Value::Array(_) => true,
            Value::List(items) => items.iter().any(Value::contains_array),
            Value::Document(doc) => doc.values().any(Value::contains_array),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Binary(bytes) => write!(f, "binary({} bytes)", bytes.len()),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Id(id) => write!(f, "id({})", id),
            Value::Blob(h) => write!(f, "blob({})", h),
            Value::Array(a) => write!(f, "{}", a),
            Value::List(items) => write!(f, "[{} items]", items.len()),
            Value::Document(doc) => write!(f, "{{{} fields}}", doc.len()),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => |$v:ident| $body:expr),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from($v: $ty) -> Self {
                    $body
                }
            }
        )*
    };
}

impl_from!(
    bool => |v| Value::Bool(v),
    i32 => |v| Value::Int(i64::from(v)),
    i64 => |v| Value::Int(v),
    u32 => |v| Value::Int(i64::from(v)),
    f32 => |v| Value::Float(f64::from(v)),
    f64 => |v| Value::Float(v),
    &str => |v| Value::String(v.to_string()),
    String => |v| Value::String(v),
    DateTime<Utc> => |v| Value::DateTime(v),
    DocumentId => |v| Value::Id(v),
    BlobHandle => |v| Value::Blob(v),
    NdArray => |v| Value::Array(v),
    Vec<Value> => |v| Value::List(v),
    Document => |v| Value::Document(v),
);

/// A string-keyed document
///
/// Fields are kept in key order, which is the encounter order of every
/// recursive walk over the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    /// Set a field, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.fields.iter()
    }

    pub fn keys(&self) -> btree_map::Keys<'_, String, Value> {
        self.fields.keys()
    }

    pub fn values(&self) -> btree_map::Values<'_, String, Value> {
        self.fields.values()
    }

    /// Resolve a dotted path such as `"jpg.data"`
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.get(segments.next()?)?;
        for segment in segments {
            current = current.as_document()?.get(segment)?;
        }
        Some(current)
    }

    /// Set a dotted path, creating intermediate documents as needed
    ///
    /// An intermediate field holding a non-document value is replaced.
    pub fn set_path(&mut self, path: &str, value: impl Into<Value>) {
        match path.split_once('.') {
            None => {
                self.insert(path, value);
            }
            Some((head, rest)) => {
                let entry = self
                    .fields
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Document(Document::new()));
                if !matches!(entry, Value::Document(_)) {
                    *entry = Value::Document(Document::new());
                }
                if let Value::Document(child) = entry {
                    child.set_path(rest, value);
                }
            }
        }
    }

    /// The document's identity, if it has been persisted
    pub fn id(&self) -> Option<DocumentId> {
        self.get(fields::ID).and_then(Value::as_id)
    }

    pub fn set_id(&mut self, id: DocumentId) {
        self.insert(fields::ID, id);
    }

    /// Handles listed in the reserved `_npObjectIDs` field
    ///
    /// Missing field or non-handle entries yield nothing.
    pub fn np_object_ids(&self) -> Vec<BlobHandle> {
        self.get(fields::NP_OBJECT_IDS)
            .and_then(Value::as_list)
            .map(|items| items.iter().filter_map(Value::as_blob).collect())
            .unwrap_or_default()
    }

    pub fn set_np_object_ids(&mut self, handles: &[BlobHandle]) {
        let list = handles.iter().copied().map(Value::Blob).collect::<Vec<_>>();
        self.insert(fields::NP_OBJECT_IDS, list);
    }

    pub fn insertion_date(&self) -> Option<DateTime<Utc>> {
        match self.get(fields::INSERTION_DATE) {
            Some(Value::DateTime(dt)) => Some(*dt),
            _ => None,
        }
    }

    /// Copy without the reserved bookkeeping fields (`_id` is kept)
    pub fn without_reserved(&self) -> Document {
        self.iter()
            .filter(|(k, _)| k.as_str() != fields::NP_OBJECT_IDS && k.as_str() != fields::INSERTION_DATE)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Build a [`Document`] from `key => value` pairs
///
/// ```
/// use stashdb_core::{doc, NdArray};
///
/// let d = doc! {
///     "item" => "A",
///     "measurement" => NdArray::from_vec(vec![1.0f64, 2.0, 3.0]),
/// };
/// assert_eq!(d.len(), 2);
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::Document::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut document = $crate::Document::new();
        $( document.insert($key, $value); )+
        document
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_path() {
        let d = doc! {
            "jpg" => doc! { "name" => "a.jpg", "meta" => doc! { "w" => 640 } },
            "item" => "A",
        };
        assert_eq!(d.get_path("item"), Some(&Value::from("A")));
        assert_eq!(d.get_path("jpg.meta.w"), Some(&Value::Int(640)));
        assert!(d.get_path("jpg.missing").is_none());
        assert!(d.get_path("item.nested").is_none());
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut d = Document::new();
        d.set_path("a.b.c", 1);
        assert_eq!(d.get_path("a.b.c"), Some(&Value::Int(1)));

        d.insert("x", "scalar");
        d.set_path("x.y", true);
        assert_eq!(d.get_path("x.y"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_np_object_ids() {
        let mut d = Document::new();
        assert!(d.np_object_ids().is_empty());

        let handles = vec![BlobHandle::new(), BlobHandle::new()];
        d.set_np_object_ids(&handles);
        assert_eq!(d.np_object_ids(), handles);
    }

    #[test]
    fn test_id_roundtrip() {
        let mut d = Document::new();
        assert!(d.id().is_none());
        let id = DocumentId::new();
        d.set_id(id);
        assert_eq!(d.id(), Some(id));
    }

    #[test]
    fn test_contains_array() {
        let nested = doc! {
            "outer" => doc! { "list" => vec![Value::Int(1), Value::from(NdArray::from_vec(vec![1u8]))] },
        };
        assert!(nested.values().any(Value::contains_array));

        let flat = doc! { "a" => 1, "b" => BlobHandle::new() };
        assert!(!flat.values().any(Value::contains_array));
    }

    #[test]
    fn test_without_reserved() {
        let mut d = doc! { "item" => "A" };
        d.set_id(DocumentId::new());
        d.set_np_object_ids(&[BlobHandle::new()]);
        d.insert(fields::INSERTION_DATE, Utc::now());

        let stripped = d.without_reserved();
        assert!(stripped.contains_key(fields::ID));
        assert!(!stripped.contains_key(fields::NP_OBJECT_IDS));
        assert!(!stripped.contains_key(fields::INSERTION_DATE));
        assert_eq!(stripped.len(), 2);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from(NdArray::from_vec(vec![1.0f64])).to_string(), "array<f64>[1]");
        assert_eq!(Value::from("x").to_string(), "\"x\"");
        assert_eq!(Value::from(doc! { "a" => 1 }).to_string(), "{1 fields}");
    }
}
