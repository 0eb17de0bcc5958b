use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::detection::Detection;
use crate::models::job::JobResult;
use crate::services::records::{InsertOutcome, RecordError, RecordStore};

/// Job results persisted in PostgreSQL.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    /// Insert a result; a second insert for the same job is a no-op.
    async fn insert(&self, result: &JobResult) -> Result<InsertOutcome, RecordError> {
        let detections = serde_json::to_value(&result.detections)?;

        let outcome = sqlx::query(
            r#"
            INSERT INTO job_results (job_id, origin_chat_id, detections, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(result.job_id)
        .bind(&result.origin_chat_id)
        .bind(detections)
        .bind(result.created_at)
        .execute(&self.pool)
        .await?;

        Ok(if outcome.rows_affected() == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    async fn find_by_job_id(&self, job_id: Uuid) -> Result<Option<JobResult>, RecordError> {
        let row = sqlx::query(
            r#"
            SELECT job_id, origin_chat_id, detections, created_at
            FROM job_results
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let detections: serde_json::Value = r.try_get("detections")?;
                let detections: Vec<Detection> = serde_json::from_value(detections)?;
                Ok(Some(JobResult {
                    job_id: r.try_get("job_id")?,
                    origin_chat_id: r.try_get("origin_chat_id")?,
                    detections,
                    created_at: r.try_get("created_at")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn record_inference_failure(&self, job_id: Uuid) -> Result<u32, RecordError> {
        let failures: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO inference_failures (job_id, failures, last_failed_at)
            VALUES ($1, 1, NOW())
            ON CONFLICT (job_id) DO UPDATE
            SET failures = inference_failures.failures + 1,
                last_failed_at = NOW()
            RETURNING failures
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(failures.max(0) as u32)
    }

    async fn health_check(&self) -> Result<(), RecordError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
