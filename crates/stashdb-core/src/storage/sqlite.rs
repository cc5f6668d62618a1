//! SQLite document store
//!
//! Persists each document as a JSON row (see [`crate::wire`]) in the
//! `documents` table. Filters and projections are evaluated in Rust over
//! the rows of the store's collection; the store is meant for the small,
//! scientific-record scale this crate targets, not bulk scans.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{StashError, StashResult};
use crate::ids::DocumentId;
use crate::query::{self, Filter, Projection};
use crate::storage::schema::{init_schema, needs_init};
use crate::storage::traits::{ensure_persistable, DocumentStore, ReturnDocument};
use crate::storage::{apply_set, upserted_document, with_identity};
use crate::value::{Document, Value};
use crate::wire;

/// Document store backed by a SQLite database
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
    collection: String,
}

impl SqliteDocumentStore {
    /// Open or create the database at `path` and bind to `collection`
    pub fn open(path: &Path, collection: &str) -> StashResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StashError::from_io(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(path).map_err(|e| {
            StashError::unavailable("sqlite", format!("cannot open {:?}: {}", path, e))
        })?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
            collection: collection.to_string(),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(collection: &str) -> StashResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            collection: collection.to_string(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn lock(&self) -> StashResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StashError::unavailable("sqlite", "connection lock poisoned"))
    }
}

/// Every document of `collection`, in insertion order
fn load_collection(conn: &Connection, collection: &str) -> StashResult<Vec<Document>> {
    let mut stmt =
        conn.prepare("SELECT body FROM documents WHERE collection = ? ORDER BY seq")?;
    let bodies = stmt
        .query_map(params![collection], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<String>, _>>()?;

    bodies
        .iter()
        .map(|body| wire::from_str(body).map_err(StashError::from))
        .collect()
}

fn write_document(
    conn: &Connection,
    collection: &str,
    id: &DocumentId,
    doc: &Document,
) -> StashResult<()> {
    conn.execute(
        r#"
        INSERT INTO documents (collection, id, body, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (collection, id) DO UPDATE
        SET body = excluded.body, updated_at = excluded.updated_at
        "#,
        params![
            collection,
            id.to_hex(),
            wire::to_string(doc),
            Utc::now().timestamp_millis()
        ],
    )?;
    Ok(())
}

impl DocumentStore for SqliteDocumentStore {
    fn find(&self, filter: &Filter, projection: Option<&Projection>) -> StashResult<Vec<Document>> {
        let conn = self.lock()?;
        Ok(load_collection(&conn, &self.collection)?
            .iter()
            .filter(|doc| filter.matches(doc))
            .map(|doc| query::project(doc, projection))
            .collect())
    }

    fn find_one(&self, filter: &Filter) -> StashResult<Option<Document>> {
        let conn = self.lock()?;

        // Identity lookups go straight to the row
        if let [(path, Value::Id(id))] = filter.clauses() {
            if path == crate::value::fields::ID {
                let body: Option<String> = conn
                    .query_row(
                        "SELECT body FROM documents WHERE collection = ? AND id = ?",
                        params![self.collection, id.to_hex()],
                        |row| row.get(0),
                    )
                    .optional()?;
                return body
                    .map(|b| wire::from_str(&b).map_err(StashError::from))
                    .transpose();
            }
        }

        Ok(load_collection(&conn, &self.collection)?
            .into_iter()
            .find(|doc| filter.matches(doc)))
    }

    fn find_one_and_update(
        &self,
        filter: &Filter,
        set: &Document,
        upsert: bool,
        return_document: ReturnDocument,
    ) -> StashResult<Option<Document>> {
        ensure_persistable(set)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing = load_collection(&tx, &self.collection)?
            .into_iter()
            .find(|doc| filter.matches(doc));

        let result = match existing {
            Some(before) => {
                let mut after = before.clone();
                apply_set(&mut after, set);
                let id = after.id().ok_or_else(|| {
                    StashError::InvalidDocument("stored document has no _id".to_string())
                })?;
                write_document(&tx, &self.collection, &id, &after)?;
                match return_document {
                    ReturnDocument::Before => Some(before),
                    ReturnDocument::After => Some(after),
                }
            }
            None if upsert => {
                let (id, inserted) = upserted_document(filter, set);
                write_document(&tx, &self.collection, &id, &inserted)?;
                match return_document {
                    ReturnDocument::Before => None,
                    ReturnDocument::After => Some(inserted),
                }
            }
            None => None,
        };

        tx.commit()?;
        Ok(result)
    }

    fn upsert(&self, document: &Document) -> StashResult<DocumentId> {
        ensure_persistable(document)?;
        let (id, doc) = with_identity(document);
        let conn = self.lock()?;
        write_document(&conn, &self.collection, &id, &doc)?;
        Ok(id)
    }

    fn delete(&self, id: &DocumentId) -> StashResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM documents WHERE collection = ? AND id = ?",
            params![self.collection, id.to_hex()],
        )?;
        Ok(removed > 0)
    }

    fn distinct(&self, path: &str, filter: &Filter) -> StashResult<Vec<Value>> {
        let conn = self.lock()?;
        let documents = load_collection(&conn, &self.collection)?;
        Ok(query::distinct_values(
            documents.iter().filter(|doc| filter.matches(doc)),
            path,
        ))
    }

    fn count(&self, filter: &Filter) -> StashResult<usize> {
        let conn = self.lock()?;
        if filter.is_empty() {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?",
                params![self.collection],
                |row| row.get(0),
            )?;
            return Ok(n as usize);
        }
        Ok(load_collection(&conn, &self.collection)?
            .iter()
            .filter(|doc| filter.matches(doc))
            .count())
    }
}
