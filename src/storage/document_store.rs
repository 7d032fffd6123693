//! Durable document store
//!
//! Source of truth for documents. Deletes are visible to `get` immediately;
//! the in-memory index is allowed to lag behind and is reconciled by the
//! engine.

use crate::config::{expand_tilde, StorageConfig};
use crate::document::{ContentType, Document, NewDocument, ValidatedDocument};
use crate::error::{ErrorKind, QuarryError, Result};
use crate::storage::{Database, Scope};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

/// Document that could not be stored or indexed
#[derive(Debug, Clone)]
pub struct FailedDocument {
    pub document: NewDocument,
    pub kind: ErrorKind,
    pub reason: String,
}

impl FailedDocument {
    pub fn new(document: NewDocument, error: &QuarryError) -> Self {
        Self {
            document,
            kind: error.kind(),
            reason: error.to_string(),
        }
    }

    /// Id the caller supplied, if any
    pub fn id(&self) -> Option<String> {
        self.document.display_id()
    }
}

/// Result of a bulk put: partial failure is normal
#[derive(Debug, Clone, Default)]
pub struct BulkPutResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedDocument>,
}

/// A document as persisted by an upsert
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub document: Document,
    /// Embedding persisted alongside the document, if any
    pub embedding: Option<Vec<f32>>,
    /// False when the upsert matched the stored version exactly
    pub changed: bool,
}

/// SQLite-backed document store
#[derive(Clone)]
pub struct DocumentStore {
    database: Database,
    compression_threshold: usize,
    dimension: usize,
}

impl DocumentStore {
    pub fn new(database: Database, compression_threshold: usize, dimension: usize) -> Self {
        Self {
            database,
            compression_threshold,
            dimension,
        }
    }

    /// Open the store under the configured data directory
    pub fn open(config: &StorageConfig, dimension: usize) -> Result<Self> {
        let data_dir = expand_tilde(&config.data_dir);
        let database = Database::new(&data_dir.join("quarry.sqlite"), config.pool_size)?;
        tracing::debug!("Opened document store at {:?}", data_dir);
        Ok(Self::new(database, config.compression_threshold, dimension))
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Validate and upsert a document, returning its id
    pub fn put(&self, doc: NewDocument) -> Result<String> {
        self.upsert(doc).map(|stored| stored.document.id)
    }

    /// Validate and upsert a document, returning the stored version
    pub fn upsert(&self, doc: NewDocument) -> Result<StoredDocument> {
        let validated = doc.validate(self.dimension)?;
        let mut conn = self.database.get_conn()?;
        let tx = conn.transaction()?;
        let stored = upsert_validated(&tx, validated, self.compression_threshold)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Upsert many documents in one transaction
    ///
    /// A malformed document is reported in `failed` and never aborts the batch.
    pub fn bulk_put(&self, docs: Vec<NewDocument>) -> Result<BulkPutResult> {
        let mut result = BulkPutResult::default();
        for outcome in self.bulk_upsert(docs)? {
            match outcome {
                Ok(stored) => result.succeeded.push(stored.document.id),
                Err(failed) => result.failed.push(failed),
            }
        }
        Ok(result)
    }

    /// Per-document outcomes of a bulk upsert, in input order
    pub fn bulk_upsert(
        &self,
        docs: Vec<NewDocument>,
    ) -> Result<Vec<std::result::Result<StoredDocument, FailedDocument>>> {
        let mut conn = self.database.get_conn()?;
        let mut tx = conn.transaction()?;
        let mut outcomes = Vec::with_capacity(docs.len());

        for doc in docs {
            let validated = match doc.clone().validate(self.dimension) {
                Ok(validated) => validated,
                Err(e) => {
                    tracing::debug!("Rejected document {:?}: {}", doc.display_id(), e);
                    outcomes.push(Err(FailedDocument::new(doc, &e)));
                    continue;
                }
            };

            // Savepoint so a failing statement only discards this document
            let sp = tx.savepoint()?;
            match upsert_validated(&sp, validated, self.compression_threshold) {
                Ok(stored) => {
                    sp.commit()?;
                    outcomes.push(Ok(stored));
                }
                Err(e) => {
                    tracing::warn!("Failed to store document {:?}: {}", doc.display_id(), e);
                    drop(sp);
                    outcomes.push(Err(FailedDocument::new(doc, &e)));
                }
            }
        }

        tx.commit()?;
        Ok(outcomes)
    }

    /// Fetch a document by id
    pub fn get(&self, id: &str) -> Result<Document> {
        let conn = self.database.get_conn()?;
        get_document(&conn, id)?.ok_or_else(|| QuarryError::not_found(id))
    }

    /// Delete a document and its embedding
    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.database.get_conn()?;
        let removed = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(QuarryError::not_found(id));
        }
        Ok(())
    }

    /// All documents in a scope, ordered by id
    pub fn list(&self, scope: Scope) -> Result<Vec<Document>> {
        let conn = self.database.get_conn()?;
        let sql = format!(
            "SELECT {} FROM documents WHERE {} ORDER BY id",
            DOCUMENT_COLUMNS,
            scope.sql_predicate()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], read_row)?;

        let mut documents = Vec::new();
        for row in rows {
            documents.push(row?.into_document()?);
        }
        Ok(documents)
    }

    /// Ids of all documents in a scope, ordered by id
    pub fn ids(&self, scope: Scope) -> Result<Vec<String>> {
        let conn = self.database.get_conn()?;
        let sql = format!(
            "SELECT id FROM documents WHERE {} ORDER BY id",
            scope.sql_predicate()
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Delete every document in a scope, returning the deleted ids
    pub fn delete_by_scope(&self, scope: Scope) -> Result<Vec<String>> {
        let mut conn = self.database.get_conn()?;
        let tx = conn.transaction()?;

        let ids = {
            let sql = format!("SELECT id FROM documents WHERE {}", scope.sql_predicate());
            let mut stmt = tx.prepare(&sql)?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        tx.execute(
            &format!("DELETE FROM documents WHERE {}", scope.sql_predicate()),
            [],
        )?;
        tx.commit()?;

        Ok(ids)
    }

    /// Number of documents in a scope
    pub fn count(&self, scope: Scope) -> Result<usize> {
        let conn = self.database.get_conn()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM documents WHERE {}",
                scope.sql_predicate()
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Stored embedding for a document
    pub fn get_embedding(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.database.get_conn()?;
        read_embedding(&conn, id)
    }

    /// Persist an embedding computed after the document was stored
    ///
    /// Ignored when the document moved past `version` in the meantime.
    pub fn put_embedding(
        &self,
        id: &str,
        version: u64,
        embedding: &[f32],
        model: Option<&str>,
    ) -> Result<bool> {
        if embedding.len() != self.dimension {
            return Err(QuarryError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        let conn = self.database.get_conn()?;
        if stored_version(&conn, id)? != Some(version) {
            return Ok(false);
        }
        write_embedding(&conn, id, embedding, model)?;
        Ok(true)
    }

    /// Record the enrichment description for a specific version
    pub fn set_description(&self, id: &str, version: u64, description: &str) -> Result<bool> {
        let conn = self.database.get_conn()?;
        let updated = conn.execute(
            "UPDATE documents SET description = ?1 WHERE id = ?2 AND version = ?3",
            params![description, id, version as i64],
        )?;
        Ok(updated > 0)
    }

    /// Ids of documents stored but not yet indexed
    pub fn dirty_ids(&self) -> Result<Vec<String>> {
        let conn = self.database.get_conn()?;
        let mut stmt = conn.prepare("SELECT id FROM documents WHERE dirty = 1 ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Whether `id` is still stored at `version` with this content
    pub fn is_current(&self, id: &str, version: u64, content_hash: &str) -> Result<bool> {
        let conn = self.database.get_conn()?;
        let stored: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, content_hash FROM documents WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(stored.is_some_and(|(v, hash)| v as u64 == version && hash == content_hash))
    }

    /// Clear the dirty flag if the document is still at `version`
    pub fn mark_clean(&self, id: &str, version: u64) -> Result<bool> {
        let conn = self.database.get_conn()?;
        let updated = conn.execute(
            "UPDATE documents SET dirty = 0 WHERE id = ?1 AND version = ?2",
            params![id, version as i64],
        )?;
        Ok(updated > 0)
    }
}

const DOCUMENT_COLUMNS: &str = "id, title, body, body_compressed, url, content_type, tags, \
     category, created_at, quality_score, description, version, content_hash";

/// Raw column values before decoding
struct DocumentRow {
    id: String,
    title: String,
    body: Vec<u8>,
    body_compressed: bool,
    url: String,
    content_type: String,
    tags: String,
    category: Option<String>,
    created_at: i64,
    quality_score: f64,
    description: Option<String>,
    version: i64,
    content_hash: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        body_compressed: row.get(3)?,
        url: row.get(4)?,
        content_type: row.get(5)?,
        tags: row.get(6)?,
        category: row.get(7)?,
        created_at: row.get(8)?,
        quality_score: row.get(9)?,
        description: row.get(10)?,
        version: row.get(11)?,
        content_hash: row.get(12)?,
    })
}

impl DocumentRow {
    fn into_document(self) -> Result<Document> {
        let body_bytes = if self.body_compressed {
            zstd::decode_all(&self.body[..]).map_err(|e| {
                QuarryError::Internal(format!("Corrupt compressed body for {}: {}", self.id, e))
            })?
        } else {
            self.body
        };
        let body = String::from_utf8(body_bytes).map_err(|e| {
            QuarryError::Internal(format!("Body of {} is not UTF-8: {}", self.id, e))
        })?;

        let content_type = ContentType::parse(&self.content_type).ok_or_else(|| {
            QuarryError::Internal(format!(
                "Unknown stored content type '{}' for {}",
                self.content_type, self.id
            ))
        })?;

        let tags: BTreeSet<String> =
            serde_json::from_str(&self.tags).map_err(|e| QuarryError::Json {
                source: e,
                context: format!("Failed to decode tags for {}", self.id),
            })?;

        let created_at = DateTime::<Utc>::from_timestamp_millis(self.created_at).ok_or_else(|| {
            QuarryError::Internal(format!("Invalid created_at for {}", self.id))
        })?;

        Ok(Document {
            id: self.id,
            title: self.title,
            body,
            url: self.url,
            content_type,
            tags,
            category: self.category,
            created_at,
            quality_score: self.quality_score as f32,
            description: self.description,
            version: self.version as u64,
            content_hash: self.content_hash,
        })
    }
}

fn get_document(conn: &Connection, id: &str) -> Result<Option<Document>> {
    let sql = format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS);
    let row = conn.query_row(&sql, params![id], read_row).optional()?;
    row.map(DocumentRow::into_document).transpose()
}

fn stored_version(conn: &Connection, id: &str) -> Result<Option<u64>> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM documents WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.map(|v| v as u64))
}

fn upsert_validated(
    conn: &Connection,
    validated: ValidatedDocument,
    compression_threshold: usize,
) -> Result<StoredDocument> {
    let ValidatedDocument {
        mut document,
        embedding,
        created_at_supplied,
    } = validated;

    let existing = get_document(conn, &document.id)?;

    if let Some(existing) = &existing {
        if !created_at_supplied {
            document.created_at = existing.created_at;
            document.content_hash = document.compute_hash();
        }

        let stored_embedding = read_embedding(conn, &existing.id)?;
        let same_embedding = embedding.is_none() || embedding == stored_embedding;
        if existing.content_hash == document.content_hash && same_embedding {
            let embedding = stored_embedding;
            return Ok(StoredDocument {
                document: existing.clone(),
                embedding,
                changed: false,
            });
        }
    }

    document.version = existing.as_ref().map_or(1, |e| e.version + 1);

    let compressed = document.body.len() >= compression_threshold;
    let body: Vec<u8> = if compressed {
        zstd::encode_all(document.body.as_bytes(), 3).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to compress body of {}", document.id),
        })?
    } else {
        document.body.as_bytes().to_vec()
    };

    let tags = serde_json::to_string(&document.tags).map_err(|e| QuarryError::Json {
        source: e,
        context: format!("Failed to encode tags for {}", document.id),
    })?;

    conn.execute(
        "INSERT INTO documents (id, title, body, body_compressed, url, content_type, tags,
                                category, created_at, quality_score, description, version,
                                content_hash, dirty, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11, ?12, 1, ?13)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            body = excluded.body,
            body_compressed = excluded.body_compressed,
            url = excluded.url,
            content_type = excluded.content_type,
            tags = excluded.tags,
            category = excluded.category,
            created_at = excluded.created_at,
            quality_score = excluded.quality_score,
            description = NULL,
            version = excluded.version,
            content_hash = excluded.content_hash,
            dirty = 1,
            updated_at = excluded.updated_at",
        params![
            &document.id,
            &document.title,
            body,
            compressed,
            &document.url,
            document.content_type.as_str(),
            tags,
            &document.category,
            document.created_at.timestamp_millis(),
            document.quality_score as f64,
            document.version as i64,
            &document.content_hash,
            Utc::now().timestamp_millis(),
        ],
    )?;

    // An embedding derived from the previous content is stale now
    let embedding = match embedding {
        Some(vector) => {
            write_embedding(conn, &document.id, &vector, None)?;
            Some(vector)
        }
        None => {
            conn.execute(
                "DELETE FROM embeddings WHERE document_id = ?1",
                params![&document.id],
            )?;
            None
        }
    };

    Ok(StoredDocument {
        document,
        embedding,
        changed: true,
    })
}

fn write_embedding(
    conn: &Connection,
    id: &str,
    embedding: &[f32],
    model: Option<&str>,
) -> Result<()> {
    let bytes: Vec<u8> = embedding.iter().flat_map(|v| v.to_le_bytes()).collect();
    conn.execute(
        "INSERT INTO embeddings (document_id, dimension, vector, model, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(document_id) DO UPDATE SET
            dimension = excluded.dimension,
            vector = excluded.vector,
            model = excluded.model,
            created_at = excluded.created_at",
        params![
            id,
            embedding.len() as i64,
            bytes,
            model,
            Utc::now().timestamp_millis()
        ],
    )?;
    Ok(())
}

fn read_embedding(conn: &Connection, id: &str) -> Result<Option<Vec<f32>>> {
    let row: Option<(i64, Vec<u8>)> = conn
        .query_row(
            "SELECT dimension, vector FROM embeddings WHERE document_id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((dimension, bytes)) = row else {
        return Ok(None);
    };

    if bytes.len() != dimension as usize * 4 {
        return Err(QuarryError::Internal(format!(
            "Embedding for {} has {} bytes, expected {}",
            id,
            bytes.len(),
            dimension * 4
        )));
    }

    let vector = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok(Some(vector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(temp: &TempDir, threshold: usize) -> DocumentStore {
        let database = Database::new(&temp.path().join("test.db"), 4).unwrap();
        DocumentStore::new(database, threshold, 4)
    }

    #[test]
    fn test_put_and_get() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, 4096);

        let id = store
            .put(
                NewDocument::new("d1", "Machine Learning Basics", "neural networks")
                    .with_tags(["ml"]),
            )
            .unwrap();
        assert_eq!(id, "d1");

        let doc = store.get("d1").unwrap();
        assert_eq!(doc.title, "Machine Learning Basics");
        assert_eq!(doc.version, 1);
        assert!(doc.tags.contains("ml"));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, 4096);
        assert!(matches!(
            store.get("nope"),
            Err(QuarryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_delete_visible_immediately() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, 4096);

        store.put(NewDocument::new("d1", "Title", "Body")).unwrap();
        store.delete("d1").unwrap();

        assert!(matches!(store.get("d1"), Err(QuarryError::NotFound { .. })));
        assert!(matches!(
            store.delete("d1"),
            Err(QuarryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_bumps_version_and_unchanged_is_noop() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, 4096);

        store.put(NewDocument::new("d1", "Title", "Body")).unwrap();
        let same = store.upsert(NewDocument::new("d1", "Title", "Body")).unwrap();
        assert!(!same.changed);
        assert_eq!(same.document.version, 1);

        let changed = store
            .upsert(NewDocument::new("d1", "Title", "New body"))
            .unwrap();
        assert!(changed.changed);
        assert_eq!(changed.document.version, 2);
        assert_eq!(store.get("d1").unwrap().body, "New body");
    }

    #[test]
    fn test_bulk_put_partial_failure() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, 4096);

        let result = store
            .bulk_put(vec![
                NewDocument::new("d3", "", "Body"),
                NewDocument::new("d4", "Valid", "Body"),
            ])
            .unwrap();

        assert_eq!(result.succeeded, vec!["d4".to_string()]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].id().as_deref(), Some("d3"));
        assert_eq!(result.failed[0].kind, ErrorKind::ValidationError);
        assert!(store.get("d4").is_ok());
    }

    #[test]
    fn test_large_body_is_compressed() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, 64);

        let body = "search ".repeat(100);
        store.put(NewDocument::new("big", "Big", body.clone())).unwrap();

        let stats = store.database().stats().unwrap();
        assert_eq!(stats.compressed_count, 1);
        assert_eq!(store.get("big").unwrap().body, body.trim());
    }

    #[test]
    fn test_embedding_roundtrip_and_cascade() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, 4096);

        store
            .put(NewDocument::new("d1", "Title", "Body").with_embedding(vec![0.5, -1.0, 2.0, 0.0]))
            .unwrap();
        assert_eq!(
            store.get_embedding("d1").unwrap(),
            Some(vec![0.5, -1.0, 2.0, 0.0])
        );

        store.delete("d1").unwrap();
        assert_eq!(store.get_embedding("d1").unwrap(), None);
    }

    #[test]
    fn test_content_change_drops_stale_embedding() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, 4096);

        store
            .put(NewDocument::new("d1", "Title", "Body").with_embedding(vec![1.0; 4]))
            .unwrap();
        store.put(NewDocument::new("d1", "Title", "Other")).unwrap();
        assert_eq!(store.get_embedding("d1").unwrap(), None);
    }

    #[test]
    fn test_scope_operations() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, 4096);

        store.put(NewDocument::new("w1", "Web", "Body")).unwrap();
        store
            .put(NewDocument::new("i1", "Image", "Alt text").with_content_type(ContentType::Image))
            .unwrap();
        store
            .put(NewDocument::new("v1", "Video", "Transcript").with_content_type(ContentType::Video))
            .unwrap();

        assert_eq!(store.count(Scope::All).unwrap(), 3);
        assert_eq!(store.count(Scope::Images).unwrap(), 1);
        assert_eq!(store.ids(Scope::Documents).unwrap(), vec!["v1", "w1"]);

        let deleted = store.delete_by_scope(Scope::Images).unwrap();
        assert_eq!(deleted, vec!["i1".to_string()]);
        assert_eq!(store.count(Scope::All).unwrap(), 2);
    }

    #[test]
    fn test_dirty_tracking() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, 4096);

        store.put(NewDocument::new("d1", "Title", "Body")).unwrap();
        assert_eq!(store.dirty_ids().unwrap(), vec!["d1"]);

        assert!(!store.mark_clean("d1", 7).unwrap());
        assert!(store.mark_clean("d1", 1).unwrap());
        assert!(store.dirty_ids().unwrap().is_empty());
    }

    #[test]
    fn test_description_bound_to_version() {
        let temp = TempDir::new().unwrap();
        let store = test_store(&temp, 4096);

        store.put(NewDocument::new("d1", "Title", "Body")).unwrap();
        assert!(store.set_description("d1", 1, "A short summary").unwrap());
        assert!(!store.set_description("d1", 2, "stale").unwrap());
        assert_eq!(
            store.get("d1").unwrap().description.as_deref(),
            Some("A short summary")
        );
    }
}
