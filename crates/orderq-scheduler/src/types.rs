use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::Result, job::BoxJob};

/// Where the worker loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Queue empty; waiting for a wake signal or cancellation.
    Idle,
    /// Running the head of the queue.
    Executing,
    /// Cancelled while idle; invoking every remaining job with the cancelled token.
    Draining,
    /// Worker has exited. Terminal.
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Executing => "executing",
            WorkerState::Draining => "draining",
            WorkerState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time snapshot of a scheduler's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Jobs queued, including the one currently running.
    pub pending: usize,
    /// Jobs handed to the worker for execution.
    pub scheduled: usize,
    /// Jobs whose execution has returned (normally or by panic).
    pub finished: usize,
    /// True once `stop` has begun.
    pub stopped: bool,
    pub worker: WorkerState,
}

/// Report of a job that panicked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFault {
    /// Name of the scheduler that ran the job.
    pub scheduler: String,
    /// 1-based execution index of the job (the `scheduled` count it was given).
    pub seq: usize,
    /// True if the job ran as part of the post-stop drain.
    pub drained: bool,
    /// Panic payload rendered as text.
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Ordered job scheduler interface.
///
/// Object-safe so callers can hold an `Arc<dyn Scheduler>`.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Queue a job behind every job scheduled before it.
    fn schedule(&self, job: BoxJob) -> Result<()>;

    /// Number of jobs not yet finished, including the running one.
    fn pending(&self) -> usize;

    /// Number of jobs handed to the worker.
    fn scheduled(&self) -> usize;

    /// Number of jobs that have returned.
    fn finished(&self) -> usize;

    /// Wait until at least `n` jobs have finished and nothing is pending.
    async fn wait_finish(&self, n: usize);

    /// Cancel, drain every pending job and wait for the worker to exit.
    async fn stop(&self);
}
