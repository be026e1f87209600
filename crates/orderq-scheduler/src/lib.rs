//! `orderq-scheduler` — strictly ordered, single-worker job execution on Tokio.
//!
//! # Overview
//!
//! Jobs submitted to a [`FifoScheduler`] run one at a time, in submission order,
//! on a dedicated background task. Each job receives a clone of the scheduler's
//! [`CancellationToken`](tokio_util::sync::CancellationToken); calling
//! [`FifoScheduler::stop`] cancels it, flushes every job still queued (they run
//! with the cancelled token, none are dropped) and waits for the worker to exit.
//!
//! # Worker states
//!
//! | State       | Meaning                                                 |
//! |-------------|---------------------------------------------------------|
//! | `Idle`      | Queue empty, waiting for a wake signal or cancellation  |
//! | `Executing` | Running the head of the queue                           |
//! | `Draining`  | Cancelled while idle; flushing the remaining queue      |
//! | `Stopped`   | Worker has exited; the scheduler accepts nothing        |
//!
//! A job that panics is isolated: the panic is caught, logged, optionally
//! forwarded as a [`JobFault`], and the worker moves on to the next job.

pub mod engine;
pub mod error;
pub mod job;
pub mod types;

pub use engine::FifoScheduler;
pub use error::{Result, SchedulerError};
pub use job::{BoxJob, Job};
pub use types::{JobFault, Scheduler, SchedulerStats, WorkerState};
