//! Durable generation jobs and the store they live in.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{EngineResult, JobAlreadyExistsSnafu, JobConflictSnafu, JobNotFoundSnafu};
use crate::ids::JobId;
use crate::transport::BoxFuture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobFailureKind {
    /// The worker recorded an explicit error.
    Upstream,
    /// The poller gave up while the record was still pending.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: JobFailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JobFailure>,
    pub created_at_unix_seconds: u64,
    #[serde(default)]
    pub completed_at_unix_seconds: Option<u64>,
}

impl Job {
    pub fn pending(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at_unix_seconds: unix_now(),
            completed_at_unix_seconds: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(&self.error, Some(failure) if failure.kind == JobFailureKind::Timeout)
    }

    pub fn is_upstream_error(&self) -> bool {
        self.status == JobStatus::Error
            && matches!(&self.error, Some(failure) if failure.kind == JobFailureKind::Upstream)
    }

    /// Poller-side view of a job that never left `Pending`.
    ///
    /// The status stays `Pending` because the record itself was never written.
    pub fn timed_out(job_id: JobId, created_at_unix_seconds: u64, message: String) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            result: None,
            error: Some(JobFailure {
                kind: JobFailureKind::Timeout,
                message,
            }),
            created_at_unix_seconds,
            completed_at_unix_seconds: None,
        }
    }
}

/// Durable key-value collaborator holding job records.
///
/// A record leaves `Pending` exactly once; later terminal writes are conflicts.
pub trait JobStore: Send + Sync {
    fn create_job(&self, job_id: JobId) -> BoxFuture<'_, EngineResult<Job>>;
    fn get_job(&self, job_id: JobId) -> BoxFuture<'_, EngineResult<Option<Job>>>;
    fn complete_job(&self, job_id: JobId, result: Value) -> BoxFuture<'_, EngineResult<Job>>;
    fn fail_job(&self, job_id: JobId, message: String) -> BoxFuture<'_, EngineResult<Job>>;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn finish(
        &self,
        job_id: JobId,
        stage: &'static str,
        apply: impl FnOnce(&mut Job),
    ) -> EngineResult<Job> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            return JobNotFoundSnafu { stage, job_id }.fail();
        };

        if job.is_terminal() {
            return JobConflictSnafu {
                stage,
                job_id,
                details: format!("status is already {:?}", job.status),
            }
            .fail();
        }

        apply(job);
        job.completed_at_unix_seconds = Some(unix_now());
        tracing::info!(job_id = %job_id, status = ?job.status, "job reached terminal state");
        Ok(job.clone())
    }
}

impl JobStore for InMemoryJobStore {
    fn create_job(&self, job_id: JobId) -> BoxFuture<'_, EngineResult<Job>> {
        Box::pin(async move {
            let mut jobs = self.jobs.write().await;
            if jobs.contains_key(&job_id) {
                return JobAlreadyExistsSnafu {
                    stage: "create-job",
                    job_id,
                }
                .fail();
            }

            let job = Job::pending(job_id);
            jobs.insert(job_id, job.clone());
            Ok(job)
        })
    }

    fn get_job(&self, job_id: JobId) -> BoxFuture<'_, EngineResult<Option<Job>>> {
        Box::pin(async move { Ok(self.jobs.read().await.get(&job_id).cloned()) })
    }

    fn complete_job(&self, job_id: JobId, result: Value) -> BoxFuture<'_, EngineResult<Job>> {
        Box::pin(self.finish(job_id, "complete-job", move |job| {
            job.status = JobStatus::Completed;
            job.result = Some(result);
        }))
    }

    fn fail_job(&self, job_id: JobId, message: String) -> BoxFuture<'_, EngineResult<Job>> {
        Box::pin(self.finish(job_id, "fail-job", move |job| {
            job.status = JobStatus::Error;
            job.error = Some(JobFailure {
                kind: JobFailureKind::Upstream,
                message,
            });
        }))
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
