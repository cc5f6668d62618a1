//! Equality filters and field projections
//!
//! Only what the repository needs to talk to its bundled backends:
//! a conjunction of `path == value` clauses and an inclusion projection.

use crate::ids::DocumentId;
use crate::value::{fields, Document, Value};
use crate::wire::{self, WireError};

/// Conjunction of equality clauses over dotted field paths
///
/// An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Filter matching every document
    pub fn new() -> Self {
        Self::default()
    }

    /// Match documents by identity
    pub fn by_id(id: DocumentId) -> Self {
        Self::new().eq(fields::ID, id)
    }

    /// Add an equality clause
    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((path.into(), value.into()));
        self
    }

    /// Build a filter from a JSON object; each top-level key is a clause
    pub fn from_json_str(s: &str) -> Result<Self, WireError> {
        let doc = wire::from_str(s)?;
        Ok(Self {
            clauses: doc.into_iter().collect(),
        })
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// True if every clause holds for `doc`
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(path, expected)| doc.get_path(path) == Some(expected))
    }

    /// Document seeded from the clauses, used when an update upserts
    pub fn seed_document(&self) -> Document {
        let mut doc = Document::new();
        for (path, value) in &self.clauses {
            doc.set_path(path, value.clone());
        }
        doc
    }
}

/// Inclusion projection over top-level fields
///
/// `_id` is always kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    fields: Vec<String>,
}

impl Projection {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn apply(&self, doc: &Document) -> Document {
        doc.iter()
            .filter(|(k, _)| k.as_str() == fields::ID || self.fields.iter().any(|f| f == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Apply an optional projection
pub fn project(doc: &Document, projection: Option<&Projection>) -> Document {
    match projection {
        Some(p) => p.apply(doc),
        None => doc.clone(),
    }
}

/// Distinct values at `path` among `docs`, in first-seen order
///
/// A list value contributes each of its elements.
pub fn distinct_values<'a, I>(docs: I, path: &str) -> Vec<Value>
where
    I: IntoIterator<Item = &'a Document>,
{
    let mut seen: Vec<Value> = Vec::new();
    for doc in docs {
        let candidates = match doc.get_path(path) {
            Some(Value::List(items)) => items.clone(),
            Some(value) => vec![value.clone()],
            None => continue,
        };
        for value in candidates {
            if !seen.contains(&value) {
                seen.push(value);
            }
        }
    }
    seen
}
