//! Sequential polling of a job record until it leaves `Pending`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::ids::JobId;
use crate::job::{Job, JobStore, unix_now};
use crate::settings::JobSettings;

pub const GENERATING_MESSAGE: &str = "Generating your draft...";
pub const STILL_WORKING_MESSAGE: &str =
    "Still working on it. Longer documents can take a minute or two...";
pub const ALMOST_THERE_MESSAGE: &str = "Almost there. Thanks for your patience...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    pub timeout: Duration,
    pub interval: Duration,
    /// Attempt at which progress switches to the "still working" message.
    pub escalate_after_attempts: u32,
    /// Attempt at which progress switches to the final notice.
    pub final_notice_after_attempts: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        JobSettings::default().poll_options()
    }
}

impl PollOptions {
    /// Reads that fit in the timeout, counting the first one.
    pub fn max_attempts(&self) -> u32 {
        let interval = self.interval.as_millis().max(1);
        let attempts = self.timeout.as_millis().div_ceil(interval).max(1);
        u32::try_from(attempts).unwrap_or(u32::MAX)
    }

    pub fn progress_message(&self, attempt: u32) -> &'static str {
        if attempt >= self.final_notice_after_attempts {
            ALMOST_THERE_MESSAGE
        } else if attempt >= self.escalate_after_attempts {
            STILL_WORKING_MESSAGE
        } else {
            GENERATING_MESSAGE
        }
    }
}

/// Reported after every read that still found the job pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollProgress {
    pub message: &'static str,
    pub attempt: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Finished(Job),
    Cancelled,
}

#[derive(Clone)]
pub struct JobPoller {
    store: Arc<dyn JobStore>,
    options: PollOptions,
}

impl JobPoller {
    pub fn new(store: Arc<dyn JobStore>, options: PollOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &PollOptions {
        &self.options
    }

    /// Resolves with the terminal job, or a timeout-tagged job if it never left `Pending`.
    ///
    /// Reads never overlap. Dropping the future abandons the poll and its timer.
    pub async fn await_job<F>(&self, job_id: JobId, mut on_progress: F) -> Job
    where
        F: FnMut(&PollProgress),
    {
        let started = Instant::now();
        let deadline = started + self.options.timeout;
        let max_attempts = self.options.max_attempts();
        let mut created_at = unix_now();
        let mut last_read_error = None;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            // A read that outlives the deadline is abandoned, not awaited.
            match tokio::time::timeout_at(deadline, self.store.get_job(job_id)).await {
                Ok(Ok(Some(job))) if job.is_terminal() => {
                    tracing::debug!(job_id = %job_id, attempt, status = ?job.status, "job finished");
                    return job;
                }
                Ok(Ok(Some(job))) => {
                    created_at = job.created_at_unix_seconds;
                    last_read_error = None;
                }
                Ok(Ok(None)) => {
                    // The record can trail the dispatch that created it.
                    tracing::debug!(job_id = %job_id, attempt, "job record not visible yet");
                }
                Ok(Err(error)) => {
                    tracing::warn!(job_id = %job_id, attempt, error = %error, "job read failed; will retry");
                    last_read_error = Some(error.to_string());
                }
                Err(_) => {
                    tracing::warn!(job_id = %job_id, attempt, "job read still in flight at the deadline");
                    last_read_error = Some("job read did not return before the deadline".to_string());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = now.duration_since(started);
                let mut message = format!(
                    "job did not finish within {}s",
                    self.options.timeout.as_secs()
                );
                if let Some(error) = last_read_error {
                    message.push_str(&format!(" (last read error: {error})"));
                }
                tracing::warn!(
                    job_id = %job_id,
                    attempt,
                    waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                    "job poll timed out"
                );
                return Job::timed_out(job_id, created_at, message);
            }

            let progress = PollProgress {
                message: self.options.progress_message(attempt),
                attempt,
                max_attempts,
            };
            tracing::debug!(job_id = %job_id, attempt, max_attempts, "job still pending");
            on_progress(&progress);

            tokio::time::sleep(self.options.interval.min(deadline - now)).await;
        }
    }

    /// Runs [`Self::await_job`] on its own task, cancellable through the handle.
    pub fn spawn<F>(&self, job_id: JobId, on_progress: F) -> PollHandle
    where
        F: FnMut(&PollProgress) + Send + 'static,
    {
        let poller = self.clone();
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            tokio::select! {
                job = poller.await_job(job_id, on_progress) => PollOutcome::Finished(job),
                _ = cancel_rx => {
                    tracing::debug!(job_id = %job_id, "job poll cancelled");
                    PollOutcome::Cancelled
                }
            }
        });

        PollHandle {
            job_id,
            cancel_tx: Some(cancel_tx),
            task: Some(task),
        }
    }
}

/// Owner of a spawned poll. Dropping it cancels the poll.
pub struct PollHandle {
    job_id: JobId,
    cancel_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<PollOutcome>>,
}

impl PollHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }

    pub async fn outcome(mut self) -> PollOutcome {
        let Some(task) = self.task.take() else {
            return PollOutcome::Cancelled;
        };

        match task.await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(job_id = %self.job_id, error = %error, "job poll task failed");
                PollOutcome::Cancelled
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}
