use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "processing" => Ok(DocumentStatus::Processing),
            "ready" => Ok(DocumentStatus::Ready),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(ApiError::Internal(format!("Unknown document status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub description: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub status: DocumentStatus,
    pub created_at: String,
}

impl Document {
    /// Fresh `processing` document with a new UUIDv4 id.
    pub fn new(file_name: &str, file_size: i64, file_type: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: file_name.to_string(),
            description: String::new(),
            file_name: file_name.to_string(),
            file_size,
            file_type: file_type.to_string(),
            status: DocumentStatus::Processing,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Registry of uploaded documents and their ingestion status.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let conn_str = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&conn_str)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to connect to document db: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                file_type TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init documents table: {}", e)))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at)")
            .execute(&pool)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to create index: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn create(&self, document: &Document) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO documents (id, title, description, file_name, file_size, file_type, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.description)
        .bind(&document.file_name)
        .bind(document.file_size)
        .bind(&document.file_type)
        .bind(document.status.as_str())
        .bind(&document.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create document: {}", e)))?;
        Ok(())
    }

    pub async fn get(&self, document_id: &str) -> Result<Option<Document>, ApiError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        row.as_ref().map(row_to_document).transpose()
    }

    /// Newest first, plus the total row count.
    pub async fn list(&self, skip: i64, limit: i64) -> Result<(Vec<Document>, i64), ApiError> {
        let rows = sqlx::query(
            "SELECT * FROM documents ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        )
        .bind(limit.max(0))
        .bind(skip.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let total: i64 = sqlx::query("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map(|r| r.get(0))
            .map_err(ApiError::internal)?;

        let documents = rows
            .iter()
            .map(row_to_document)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((documents, total))
    }

    /// Returns false when no such document exists.
    pub async fn set_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<bool, ApiError> {
        let result = sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, document_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document, ApiError> {
    let status: String = row.try_get("status").map_err(ApiError::internal)?;
    Ok(Document {
        id: row.try_get("id").map_err(ApiError::internal)?,
        title: row.try_get::<String, _>("title").unwrap_or_default(),
        description: row.try_get::<String, _>("description").unwrap_or_default(),
        file_name: row.try_get("file_name").map_err(ApiError::internal)?,
        file_size: row.try_get::<i64, _>("file_size").unwrap_or_default(),
        file_type: row.try_get::<String, _>("file_type").unwrap_or_default(),
        status: status.parse()?,
        created_at: row.try_get::<String, _>("created_at").unwrap_or_default(),
    })
}
