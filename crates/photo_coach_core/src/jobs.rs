//! crates/photo_coach_core/src/jobs.rs
//!
//! The in-memory registry of asynchronous analysis jobs.
//!
//! A single registry-wide lock guards every read and write; job volume is low
//! enough that coarse locking is not a bottleneck. Jobs are not durable and
//! are lost on restart.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{AnalysisOutcome, Job, JobStatus};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("Job {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Tracks the lifecycle of analysis jobs. Owned and injected by the caller.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: RwLock<HashMap<String, Job>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new job in `Pending`. An existing job with the same id is replaced.
    pub async fn create(&self, id: &str) -> Job {
        let job = Job {
            id: id.to_string(),
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
        };
        self.jobs.write().await.insert(id.to_string(), job.clone());
        job
    }

    /// Returns a snapshot of the job. Reads never mutate.
    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn mark_processing(&self, id: &str) -> Result<(), JobError> {
        self.transition(id, JobStatus::Processing, |_| {}).await
    }

    pub async fn mark_completed(&self, id: &str, result: AnalysisOutcome) -> Result<(), JobError> {
        self.transition(id, JobStatus::Completed, move |job| {
            job.result = Some(result);
        })
        .await
    }

    pub async fn mark_failed(&self, id: &str, message: &str) -> Result<(), JobError> {
        let message = message.to_string();
        self.transition(id, JobStatus::Failed, move |job| {
            job.error = Some(message);
        })
        .await
    }

    /// Removes every job created more than `max_age` ago. Returns how many were removed.
    pub async fn sweep_older_than(&self, max_age: std::time::Duration) -> usize {
        let cutoff = Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| job.created_at >= cutoff);
        let removed = before - jobs.len();
        if removed > 0 {
            debug!("Swept {} expired jobs", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    async fn transition<F>(&self, id: &str, to: JobStatus, apply: F) -> Result<(), JobError>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if !is_allowed(job.status, to) {
            return Err(JobError::InvalidTransition {
                id: id.to_string(),
                from: job.status,
                to,
            });
        }

        job.status = to;
        apply(job);
        Ok(())
    }
}

/// `pending -> processing -> {completed | failed}`; a pending job may also fail directly.
fn is_allowed(from: JobStatus, to: JobStatus) -> bool {
    matches!(
        (from, to),
        (JobStatus::Pending, JobStatus::Processing)
            | (JobStatus::Pending, JobStatus::Failed)
            | (JobStatus::Processing, JobStatus::Completed)
            | (JobStatus::Processing, JobStatus::Failed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AnalysisResult;
    use std::sync::Arc;

    fn outcome() -> AnalysisOutcome {
        AnalysisOutcome {
            enhanced_image_url: "enhanced/1.jpg".to_string(),
            analysis: AnalysisResult::default(),
            initial_advice: "advice".to_string(),
        }
    }

    #[tokio::test]
    async fn job_moves_through_the_happy_path() {
        let tracker = JobTracker::new();
        let job = tracker.create("j1").await;
        assert_eq!(job.status, JobStatus::Pending);

        tracker.mark_processing("j1").await.unwrap();
        assert_eq!(tracker.get("j1").await.unwrap().status, JobStatus::Processing);

        tracker.mark_completed("j1", outcome()).await.unwrap();
        let job = tracker.get("j1").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.unwrap().initial_advice, "advice");
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn terminal_jobs_reject_further_transitions() {
        let tracker = JobTracker::new();
        tracker.create("j1").await;
        tracker.mark_processing("j1").await.unwrap();
        tracker.mark_failed("j1", "Invalid image").await.unwrap();

        let err = tracker.mark_completed("j1", outcome()).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        assert!(tracker.mark_processing("j1").await.is_err());

        let job = tracker.get("j1").await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Invalid image"));
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn processing_never_returns_to_pending_or_skips_ahead() {
        let tracker = JobTracker::new();
        tracker.create("j1").await;
        assert!(tracker.mark_completed("j1", outcome()).await.is_err());
        tracker.mark_processing("j1").await.unwrap();
        assert!(tracker.mark_processing("j1").await.is_err());
    }

    #[tokio::test]
    async fn unknown_jobs_are_reported() {
        let tracker = JobTracker::new();
        assert!(tracker.get("missing").await.is_none());
        assert_eq!(
            tracker.mark_processing("missing").await,
            Err(JobError::NotFound("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn repeated_reads_of_a_completed_job_are_identical() {
        let tracker = JobTracker::new();
        tracker.create("j1").await;
        tracker.mark_processing("j1").await.unwrap();
        tracker.mark_completed("j1", outcome()).await.unwrap();

        let first = tracker.get("j1").await.unwrap().result;
        for _ in 0..5 {
            assert_eq!(tracker.get("j1").await.unwrap().result, first);
        }
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_jobs() {
        let tracker = JobTracker::new();
        tracker.create("old").await;
        {
            let mut jobs = tracker.jobs.write().await;
            let old = jobs.get_mut("old").unwrap();
            old.created_at = Utc::now() - Duration::hours(2);
        }
        tracker.create("fresh").await;

        let removed = tracker.sweep_older_than(std::time::Duration::from_secs(3600)).await;
        assert_eq!(removed, 1);
        assert!(tracker.get("old").await.is_none());
        assert!(tracker.get("fresh").await.is_some());
    }

    #[tokio::test]
    async fn concurrent_readers_see_a_consistent_status() {
        let tracker = Arc::new(JobTracker::new());
        tracker.create("j1").await;

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        let job = tracker.get("j1").await.unwrap();
                        assert!(!(job.result.is_some() && job.error.is_some()));
                    }
                })
            })
            .collect();

        tracker.mark_processing("j1").await.unwrap();
        tracker.mark_completed("j1", outcome()).await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(tracker.get("j1").await.unwrap().status, JobStatus::Completed);
    }
}
