use chrono::{DateTime, Utc};
use gleaner_core::error::AppError;
use gleaner_core::traits::{RecordStore, StoredRecord};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// PostgreSQL-backed persistence collaborator.
///
/// Payloads are stored as opaque JSONB; no schema is imposed on them.
#[derive(Clone)]
pub struct RecordRepository {
    pool: Pool<Postgres>,
}

impl RecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Save a payload. Returns the generated UUID.
    pub async fn save(&self, payload: &serde_json::Value) -> Result<Uuid, AppError> {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO scraped_records (payload)
            VALUES ($1)
            RETURNING id
            "#,
        )
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.0)
    }

    /// Most recent records first.
    pub async fn list(&self, limit: usize) -> Result<Vec<StoredRecord>, AppError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, payload, created_at
            FROM scraped_records
            ORDER BY created_at DESC, id
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<StoredRecord>, AppError> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, payload, created_at
            FROM scraped_records
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<RecordRow> for StoredRecord {
    fn from(row: RecordRow) -> Self {
        StoredRecord {
            id: row.id,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

// -- Trait implementation --

impl RecordStore for RecordRepository {
    async fn save(&self, payload: &serde_json::Value) -> Result<Uuid, AppError> {
        RecordRepository::save(self, payload).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredRecord>, AppError> {
        RecordRepository::list(self, limit).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredRecord>, AppError> {
        RecordRepository::get(self, id).await
    }
}
