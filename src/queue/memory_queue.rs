use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::{
    EnqueueOutcome, FailureOutcome, JobQueue, QueueError, ReservedJob, RetryPolicy, StepJob,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Reserved,
    Completed,
    Failed,
}

#[derive(Debug)]
struct QueuedJob {
    seq: u64,
    job: StepJob,
    state: JobState,
    attempts: u32,
    available_at: Instant,
    reserved_by: Option<String>,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    jobs: HashMap<String, QueuedJob>,
}

/// In-process queue used by tests and single-node setups. Finished jobs are
/// kept so a late duplicate enqueue is still absorbed.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    policy: RetryPolicy,
    inner: Mutex<Inner>,
}

impl MemoryJobQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state_of(&self, job_id: &str) -> Option<JobState> {
        self.lock().jobs.get(job_id).map(|j| j.state)
    }

    pub fn attempts_of(&self, job_id: &str) -> Option<u32> {
        self.lock().jobs.get(job_id).map(|j| j.attempts)
    }

    pub fn reserved_by(&self, job_id: &str) -> Option<String> {
        self.lock()
            .jobs
            .get(job_id)
            .and_then(|j| j.reserved_by.clone())
    }

    pub fn last_error_of(&self, job_id: &str) -> Option<String> {
        self.lock()
            .jobs
            .get(job_id)
            .and_then(|j| j.last_error.clone())
    }

    /// Time until the job becomes due, zero if it already is.
    pub fn due_in(&self, job_id: &str) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .jobs
            .get(job_id)
            .map(|j| j.available_at.saturating_duration_since(now))
    }

    /// Every job ever enqueued, in enqueue order.
    pub fn jobs(&self) -> Vec<StepJob> {
        let inner = self.lock();
        let mut jobs: Vec<&QueuedJob> = inner.jobs.values().collect();
        jobs.sort_by_key(|j| j.seq);
        jobs.into_iter().map(|j| j.job.clone()).collect()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: StepJob, delay: Duration) -> Result<EnqueueOutcome, QueueError> {
        let id = job.job_id();
        let mut inner = self.lock();
        if inner.jobs.contains_key(&id) {
            debug!(job_id = %id, "duplicate job ignored");
            return Ok(EnqueueOutcome::Duplicate);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            id,
            QueuedJob {
                seq,
                job,
                state: JobState::Pending,
                attempts: 0,
                available_at: Instant::now() + delay,
                reserved_by: None,
                last_error: None,
            },
        );
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn reserve(&self, worker_id: &str) -> Result<Option<ReservedJob>, QueueError> {
        let now = Instant::now();
        let mut inner = self.lock();
        let next = inner
            .jobs
            .iter_mut()
            .filter(|(_, j)| j.state == JobState::Pending && j.available_at <= now)
            .min_by_key(|(_, j)| (j.available_at, j.seq));

        Ok(next.map(|(id, queued)| {
            queued.state = JobState::Reserved;
            queued.attempts += 1;
            queued.reserved_by = Some(worker_id.to_string());
            ReservedJob {
                id: id.clone(),
                attempts: queued.attempts,
                job: queued.job.clone(),
            }
        }))
    }

    async fn complete(&self, job_id: &str) -> Result<(), QueueError> {
        let mut inner = self.lock();
        match inner.jobs.get_mut(job_id) {
            Some(queued) if queued.state == JobState::Reserved => {
                queued.state = JobState::Completed;
                queued.reserved_by = None;
                Ok(())
            }
            _ => Err(QueueError::NotReserved(job_id.to_string())),
        }
    }

    async fn fail(
        &self,
        job_id: &str,
        error: &str,
        retry: bool,
    ) -> Result<FailureOutcome, QueueError> {
        let mut inner = self.lock();
        let queued = match inner.jobs.get_mut(job_id) {
            Some(queued) if queued.state == JobState::Reserved => queued,
            _ => return Err(QueueError::NotReserved(job_id.to_string())),
        };

        queued.last_error = Some(error.to_string());
        queued.reserved_by = None;
        let outcome = self.policy.outcome_for(queued.attempts, retry);
        match outcome {
            FailureOutcome::Retrying { retry_in, .. } => {
                queued.state = JobState::Pending;
                queued.available_at = Instant::now() + retry_in;
            }
            FailureOutcome::Exhausted { .. } => queued.state = JobState::Failed,
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::automation::ActionType;
    use crate::models::workspace::WorkspaceId;
    use crate::queue::STEP_JOB_SCHEMA_VERSION;
    use serde_json::{json, Map};

    fn job(run: &str, action: &str) -> StepJob {
        StepJob {
            schema_version: STEP_JOB_SCHEMA_VERSION,
            workspace_id: WorkspaceId::parse("W1").unwrap(),
            workflow_run_id: run.into(),
            action_id: action.into(),
            action_type: ActionType::Wait,
            config: json!({ "delayMinutes": 1 }),
            trigger_payload: Map::new(),
        }
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_absorbed_even_after_completion() {
        let queue = MemoryJobQueue::default();
        assert_eq!(
            queue.enqueue(job("r1", "a1"), Duration::ZERO).await.unwrap(),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            queue.enqueue(job("r1", "a1"), Duration::ZERO).await.unwrap(),
            EnqueueOutcome::Duplicate
        );

        let reserved = queue.reserve("w1").await.unwrap().unwrap();
        queue.complete(&reserved.id).await.unwrap();

        assert_eq!(
            queue.enqueue(job("r1", "a1"), Duration::ZERO).await.unwrap(),
            EnqueueOutcome::Duplicate
        );
        assert_eq!(queue.len(), 1);
        assert!(queue.reserve("w1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_job_is_not_reserved_before_due() {
        let queue = MemoryJobQueue::default();
        queue
            .enqueue(job("r1", "a1"), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(queue.reserve("w1").await.unwrap().is_none());
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(queue.reserve("w1").await.unwrap().is_none());
        tokio::time::advance(Duration::from_secs(1)).await;

        let reserved = queue.reserve("w1").await.unwrap().unwrap();
        assert_eq!(reserved.id, "r1:a1");
        assert_eq!(reserved.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn due_jobs_come_out_earliest_first() {
        let queue = MemoryJobQueue::default();
        queue
            .enqueue(job("r1", "late"), Duration::from_secs(5))
            .await
            .unwrap();
        queue.enqueue(job("r1", "a"), Duration::ZERO).await.unwrap();
        queue.enqueue(job("r1", "b"), Duration::ZERO).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        let order: Vec<String> = [
            queue.reserve("w").await.unwrap().unwrap().id,
            queue.reserve("w").await.unwrap().unwrap().id,
            queue.reserve("w").await.unwrap().unwrap().id,
        ]
        .into();
        assert_eq!(order, vec!["r1:a", "r1:b", "r1:late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_retries_with_backoff_then_exhausts() {
        let queue = MemoryJobQueue::new(RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_secs(1),
        });
        queue.enqueue(job("r1", "a1"), Duration::ZERO).await.unwrap();

        let first = queue.reserve("w1").await.unwrap().unwrap();
        let outcome = queue.fail(&first.id, "provider down", true).await.unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::Retrying {
                attempt: 1,
                retry_in: Duration::from_secs(1)
            }
        );
        assert!(queue.reserve("w1").await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        let second = queue.reserve("w1").await.unwrap().unwrap();
        assert_eq!(second.attempts, 2);
        let outcome = queue.fail(&second.id, "provider down", true).await.unwrap();
        assert_eq!(outcome, FailureOutcome::Exhausted { attempts: 2 });
        assert_eq!(queue.state_of("r1:a1"), Some(JobState::Failed));
        assert_eq!(queue.last_error_of("r1:a1").as_deref(), Some("provider down"));
    }

    #[tokio::test]
    async fn completing_an_unreserved_job_is_an_error() {
        let queue = MemoryJobQueue::default();
        queue.enqueue(job("r1", "a1"), Duration::ZERO).await.unwrap();
        assert!(matches!(
            queue.complete("r1:a1").await,
            Err(QueueError::NotReserved(_))
        ));
    }
}
