//! libSQL submission store: local file or in-memory database.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use super::migrations;
use super::{SubmissionRecord, SubmissionSink};
use crate::error::PersistenceError;

static COLLECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap());

/// Stores every submission as a JSON row tagged with its collection.
pub struct LibSqlSink {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
}

impl LibSqlSink {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                PersistenceError::Database(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| PersistenceError::Database(format!("Failed to open libSQL database: {e}")))?;

        let sink = Self::from_database(db).await?;
        info!(path = %path.display(), "Submission store opened");
        Ok(sink)
    }

    /// In-memory database, used by tests and throwaway runs.
    pub async fn new_memory() -> Result<Self, PersistenceError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                PersistenceError::Database(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self, PersistenceError> {
        let conn = db
            .connect()
            .map_err(|e| PersistenceError::Database(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Number of rows stored for `collection`.
    pub async fn count(&self, collection: &str) -> Result<usize, PersistenceError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM submissions WHERE collection = ?1",
                params![collection],
            )
            .await
            .map_err(|e| PersistenceError::Database(format!("count: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| PersistenceError::Database(format!("count: {e}")))?;
        let count = match row {
            Some(row) => row
                .get::<i64>(0)
                .map_err(|e| PersistenceError::Database(format!("count: {e}")))?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Stored rows for `collection`, oldest first.
    pub async fn records(&self, collection: &str) -> Result<Vec<SubmissionRecord>, PersistenceError> {
        let mut rows = self
            .conn
            .query(
                "SELECT record FROM submissions WHERE collection = ?1 ORDER BY created_at, rowid",
                params![collection],
            )
            .await
            .map_err(|e| PersistenceError::Database(format!("records: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PersistenceError::Database(format!("records: {e}")))?
        {
            let json: String = row
                .get(0)
                .map_err(|e| PersistenceError::Database(format!("records: {e}")))?;
            let record: SubmissionRecord = serde_json::from_str(&json)
                .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
            out.push(record);
        }
        Ok(out)
    }
}

#[async_trait]
impl SubmissionSink for LibSqlSink {
    async fn insert(
        &self,
        collection: &str,
        record: &SubmissionRecord,
    ) -> Result<(), PersistenceError> {
        if !COLLECTION_RE.is_match(collection) {
            return Err(PersistenceError::InvalidCollection(collection.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let json = serde_json::to_string(record)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO submissions (id, collection, record, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.clone(), collection, json, now],
            )
            .await
            .map_err(|e| PersistenceError::Database(format!("insert: {e}")))?;

        debug!(id = %id, collection = %collection, "Submission stored");
        Ok(())
    }
}
