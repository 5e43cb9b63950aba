pub mod job;
pub mod memory_queue;
pub mod postgres_queue;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use job::{StepJob, STEP_JOB_SCHEMA_VERSION};
pub use memory_queue::MemoryJobQueue;
pub use postgres_queue::PostgresJobQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {0} is not reserved")]
    NotReserved(String),
    #[error("job payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("job {id} has an unreadable payload: {reason}")]
    Malformed { id: String, reason: String },
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with the same id already exists, pending or finished.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retrying { attempt: u32, retry_in: Duration },
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReservedJob {
    pub id: String,
    /// Delivery attempt this reservation represents, starting at 1.
    pub attempts: u32,
    pub job: StepJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1u32 << exponent)
    }

    pub fn outcome_for(&self, attempt: u32, retry: bool) -> FailureOutcome {
        if retry && attempt < self.max_attempts {
            FailureOutcome::Retrying {
                attempt,
                retry_in: self.backoff_for(attempt),
            }
        } else {
            FailureOutcome::Exhausted { attempts: attempt }
        }
    }
}

/// Durable at-least-once queue of step jobs, keyed by job id.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Adds the job unless one with the same id was ever enqueued.
    async fn enqueue(&self, job: StepJob, delay: Duration) -> Result<EnqueueOutcome, QueueError>;

    /// Hands out the earliest due job, if any.
    async fn reserve(&self, worker_id: &str) -> Result<Option<ReservedJob>, QueueError>;

    async fn complete(&self, job_id: &str) -> Result<(), QueueError>;

    /// Schedules a retry with backoff, or gives up when `retry` is false or
    /// the attempts are used up.
    async fn fail(
        &self,
        job_id: &str,
        error: &str,
        retry: bool,
    ) -> Result<FailureOutcome, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_initial() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(8));
    }

    #[test]
    fn retries_stop_at_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        };
        assert_eq!(
            policy.outcome_for(2, true),
            FailureOutcome::Retrying {
                attempt: 2,
                retry_in: Duration::from_millis(200)
            }
        );
        assert_eq!(
            policy.outcome_for(3, true),
            FailureOutcome::Exhausted { attempts: 3 }
        );
    }

    #[test]
    fn non_retriable_failure_exhausts_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.outcome_for(1, false),
            FailureOutcome::Exhausted { attempts: 1 }
        );
    }
}
