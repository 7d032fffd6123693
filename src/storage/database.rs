//! SQLite database management with migrations
//!
//! Durable home of documents and their embeddings

use crate::error::{QuarryError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection pool
    pub fn new(db_path: &Path, pool_size: u32) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QuarryError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // Pragmas that are per-connection must run on every pooled connection
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                PRAGMA synchronous = NORMAL;
                ",
            )
        });

        let pool = Pool::builder().max_size(pool_size).build(manager)?;

        {
            let conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;

        let embedding_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;

        let dirty_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE dirty = 1",
            [],
            |row| row.get(0),
        )?;

        let compressed_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE body_compressed = 1",
            [],
            |row| row.get(0),
        )?;

        Ok(DbStats {
            document_count: document_count as usize,
            embedding_count: embedding_count as usize,
            dirty_count: dirty_count as usize,
            compressed_count: compressed_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStats {
    pub document_count: usize,
    pub embedding_count: usize,
    pub dirty_count: usize,
    pub compressed_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE documents (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        body BLOB NOT NULL,
        body_compressed INTEGER NOT NULL DEFAULT 0,
        url TEXT NOT NULL,
        content_type TEXT NOT NULL,
        tags TEXT NOT NULL,           -- JSON array
        category TEXT,
        created_at INTEGER NOT NULL,  -- unix millis
        quality_score REAL NOT NULL,
        description TEXT,
        version INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        dirty INTEGER NOT NULL DEFAULT 1,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX idx_documents_content_type ON documents(content_type);
    CREATE INDEX idx_documents_dirty ON documents(dirty);

    CREATE TABLE embeddings (
        document_id TEXT PRIMARY KEY,
        dimension INTEGER NOT NULL,
        vector BLOB NOT NULL,         -- little-endian f32
        model TEXT,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    );
    "#,
];
