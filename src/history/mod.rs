use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use crate::core::errors::ApiError;

/// A completed question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: String,
    pub document_id: String,
    pub question: String,
    pub answer: String,
    pub created_at: String,
    /// Seconds.
    pub execution_time: f64,
    pub context_chunks: Vec<String>,
}

impl QueryRecord {
    pub fn new(
        document_id: &str,
        question: &str,
        answer: &str,
        execution_time: f64,
        context_chunks: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            execution_time,
            context_chunks,
        }
    }
}

#[derive(Clone)]
pub struct QueryHistoryStore {
    pool: SqlitePool,
}

impl QueryHistoryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let conn_str = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&conn_str)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to connect to history db: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queries (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                created_at TEXT NOT NULL,
                execution_time REAL NOT NULL DEFAULT 0,
                context_chunks JSON
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init queries table: {}", e)))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_queries_created_at ON queries(created_at)")
            .execute(&pool)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to create index: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn record(&self, record: &QueryRecord) -> Result<(), ApiError> {
        let chunks = serde_json::to_string(&record.context_chunks).map_err(ApiError::internal)?;
        sqlx::query(
            "INSERT INTO queries (id, document_id, question, answer, created_at, execution_time, context_chunks)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.document_id)
        .bind(&record.question)
        .bind(&record.answer)
        .bind(&record.created_at)
        .bind(record.execution_time)
        .bind(chunks)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to record query: {}", e)))?;
        Ok(())
    }

    /// Newest first, plus the total row count.
    pub async fn list(&self, skip: i64, limit: i64) -> Result<(Vec<QueryRecord>, i64), ApiError> {
        let rows = sqlx::query(
            "SELECT * FROM queries ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        )
        .bind(limit.max(0))
        .bind(skip.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let total: i64 = sqlx::query("SELECT COUNT(*) FROM queries")
            .fetch_one(&self.pool)
            .await
            .map(|r| r.get(0))
            .map_err(ApiError::internal)?;

        let records = rows
            .into_iter()
            .map(|row| {
                let chunks: Option<String> = row.try_get("context_chunks").unwrap_or(None);
                QueryRecord {
                    id: row.try_get::<String, _>("id").unwrap_or_default(),
                    document_id: row.try_get::<String, _>("document_id").unwrap_or_default(),
                    question: row.try_get::<String, _>("question").unwrap_or_default(),
                    answer: row.try_get::<String, _>("answer").unwrap_or_default(),
                    created_at: row.try_get::<String, _>("created_at").unwrap_or_default(),
                    execution_time: row.try_get::<f64, _>("execution_time").unwrap_or_default(),
                    context_chunks: chunks
                        .and_then(|raw| serde_json::from_str(&raw).ok())
                        .unwrap_or_default(),
                }
            })
            .collect();

        Ok((records, total))
    }
}
