use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::{debug, warn};

use super::{
    EnqueueOutcome, FailureOutcome, JobQueue, QueueError, ReservedJob, RetryPolicy, StepJob,
};

/// Reservations older than this are handed out again, covering workers
/// that died mid-job.
pub const DEFAULT_RESERVATION_LEASE: Duration = Duration::from_secs(600);

pub struct PostgresJobQueue {
    pub pool: PgPool,
    policy: RetryPolicy,
    reservation_lease: Duration,
}

#[derive(Debug, FromRow)]
struct ReservedRow {
    id: String,
    payload: Value,
    attempts: i32,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        Self {
            pool,
            policy,
            reservation_lease: DEFAULT_RESERVATION_LEASE,
        }
    }

    pub fn with_reservation_lease(mut self, lease: Duration) -> Self {
        self.reservation_lease = lease;
        self
    }

    async fn bury(&self, job_id: &str, reason: &str) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE workflow_jobs
            SET status = 'failed', last_error = $2, reserved_by = NULL,
                reserved_until = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, job: StepJob, delay: Duration) -> Result<EnqueueOutcome, QueueError> {
        let id = job.job_id();
        let payload = serde_json::to_value(&job)?;

        let result = sqlx::query(
            r#"
            INSERT INTO workflow_jobs (id, workspace_id, payload, status, attempts, available_at, created_at, updated_at)
            VALUES ($1, $2, $3, 'pending', 0, now() + make_interval(secs => $4), now(), now())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(job.workspace_id.as_str())
        .bind(payload)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(job_id = %id, "duplicate job ignored");
            return Ok(EnqueueOutcome::Duplicate);
        }
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn reserve(&self, worker_id: &str) -> Result<Option<ReservedJob>, QueueError> {
        let row = sqlx::query_as::<_, ReservedRow>(
            r#"
            UPDATE workflow_jobs
            SET status = 'reserved',
                attempts = attempts + 1,
                reserved_by = $1,
                reserved_until = now() + make_interval(secs => $2),
                updated_at = now()
            WHERE id = (
                SELECT id FROM workflow_jobs
                WHERE (status = 'pending' AND available_at <= now())
                   OR (status = 'reserved' AND reserved_until < now())
                ORDER BY available_at ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, attempts
            "#,
        )
        .bind(worker_id)
        .bind(self.reservation_lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        match serde_json::from_value::<StepJob>(row.payload) {
            Ok(job) => Ok(Some(ReservedJob {
                id: row.id,
                attempts: u32::try_from(row.attempts).unwrap_or(0),
                job,
            })),
            Err(err) => {
                warn!(job_id = %row.id, %err, "burying job with unreadable payload");
                let reason = err.to_string();
                self.bury(&row.id, &reason).await?;
                Err(QueueError::Malformed { id: row.id, reason })
            }
        }
    }

    async fn complete(&self, job_id: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_jobs
            SET status = 'completed', reserved_by = NULL, reserved_until = NULL, updated_at = now()
            WHERE id = $1 AND status = 'reserved'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotReserved(job_id.to_string()));
        }
        Ok(())
    }

    async fn fail(
        &self,
        job_id: &str,
        error: &str,
        retry: bool,
    ) -> Result<FailureOutcome, QueueError> {
        let mut tx = self.pool.begin().await?;

        let attempts: Option<i32> = sqlx::query_scalar(
            "SELECT attempts FROM workflow_jobs WHERE id = $1 AND status = 'reserved' FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(attempts) = attempts else {
            return Err(QueueError::NotReserved(job_id.to_string()));
        };
        let outcome = self
            .policy
            .outcome_for(u32::try_from(attempts).unwrap_or(0), retry);

        match outcome {
            FailureOutcome::Retrying { retry_in, .. } => {
                sqlx::query(
                    r#"
                    UPDATE workflow_jobs
                    SET status = 'pending', last_error = $2, reserved_by = NULL, reserved_until = NULL,
                        available_at = now() + make_interval(secs => $3), updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(job_id)
                .bind(error)
                .bind(retry_in.as_secs_f64())
                .execute(&mut *tx)
                .await?;
            }
            FailureOutcome::Exhausted { .. } => {
                sqlx::query(
                    r#"
                    UPDATE workflow_jobs
                    SET status = 'failed', last_error = $2, reserved_by = NULL, reserved_until = NULL,
                        updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(job_id)
                .bind(error)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }
}
