use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::str::FromStr;

use super::{RepositoryError, ResultRepository};
use crate::models::job::{JobResult, JobStatus, JobView};
use crate::models::prediction::{Prediction, StoredPrediction};

/// PostgreSQL-backed result repository.
#[derive(Clone)]
pub struct PgResultRepository {
    pool: PgPool,
}

impl PgResultRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ResultRepository for PgResultRepository {
    async fn create_pending(&self, job_id: &str, image_url: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, image_url, status)
            VALUES ($1, $2, 'pending')
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(image_url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert(&self, result: &JobResult) -> Result<(), RepositoryError> {
        // Dropping the transaction without commit rolls everything back.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, image_url, status, error, processed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (job_id) DO UPDATE SET
                status = EXCLUDED.status,
                error = EXCLUDED.error,
                processed_at = EXCLUDED.processed_at
            "#,
        )
        .bind(&result.job_id)
        .bind(&result.image_url)
        .bind(result.status.as_ref())
        .bind(result.error.as_deref())
        .bind(result.processed_at)
        .execute(&mut *tx)
        .await?;

        // The row lock taken above serializes concurrent writers for this job,
        // so delete-then-insert never interleaves with another replacement.
        sqlx::query("DELETE FROM predictions WHERE job_id = $1")
            .bind(&result.job_id)
            .execute(&mut *tx)
            .await?;

        if !result.predictions.is_empty() {
            let mut insert: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO predictions (job_id, x, y, width, height, confidence, class, class_id) ",
            );
            insert.push_values(&result.predictions, |mut row, p| {
                row.push_bind(&result.job_id)
                    .push_bind(p.x)
                    .push_bind(p.y)
                    .push_bind(p.width)
                    .push_bind(p.height)
                    .push_bind(p.confidence)
                    .push_bind(&p.class)
                    .push_bind(p.class_id);
            });
            insert.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            job_id = %result.job_id,
            status = %result.status,
            predictions = result.predictions.len(),
            "Job result persisted"
        );

        Ok(())
    }

    async fn mark_failed_if_not_terminal(
        &self,
        job_id: &str,
        image_url: &str,
        reason: &str,
    ) -> Result<bool, RepositoryError> {
        // Pending rows never carry predictions, so there is nothing to clear.
        let written = sqlx::query(
            r#"
            INSERT INTO jobs (job_id, image_url, status, error, processed_at)
            VALUES ($1, $2, 'failed', $3, $4)
            ON CONFLICT (job_id) DO UPDATE SET
                status = EXCLUDED.status,
                error = EXCLUDED.error,
                processed_at = EXCLUDED.processed_at
            WHERE jobs.status = 'pending'
            "#,
        )
        .bind(job_id)
        .bind(image_url)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        tracing::debug!(job_id = %job_id, written, "Conditional failed write");
        Ok(written)
    }

    async fn get_by_id(&self, job_id: &str) -> Result<Option<JobView>, RepositoryError> {
        // Both reads come from one snapshot so a concurrent replacement is
        // never observed half-applied.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            r#"
            SELECT job_id, image_url, status, error, processed_at, created_at
            FROM jobs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let status_str: String = row.try_get("status")?;
        let status =
            JobStatus::from_str(&status_str).map_err(|_| RepositoryError::CorruptStatus {
                job_id: job_id.to_string(),
                status: status_str.clone(),
            })?;

        let prediction_rows = sqlx::query(
            r#"
            SELECT id, x, y, width, height, confidence, class, class_id, created_at
            FROM predictions
            WHERE job_id = $1
            ORDER BY confidence DESC, id
            "#,
        )
        .bind(job_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let predictions = prediction_rows
            .into_iter()
            .map(|r| {
                Ok(StoredPrediction {
                    id: r.try_get("id")?,
                    prediction: Prediction {
                        x: r.try_get("x")?,
                        y: r.try_get("y")?,
                        width: r.try_get("width")?,
                        height: r.try_get("height")?,
                        confidence: r.try_get("confidence")?,
                        class: r.try_get("class")?,
                        class_id: r.try_get("class_id")?,
                    },
                    created_at: r.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(Some(JobView {
            job_id: row.try_get("job_id")?,
            image_url: row.try_get("image_url")?,
            status,
            error: row.try_get("error")?,
            processed_at: row.try_get("processed_at")?,
            created_at: row.try_get("created_at")?,
            predictions,
        }))
    }

    async fn health_check(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
