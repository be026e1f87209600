use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// `schedule` was called after `stop` began; the job was discarded.
    #[error("schedule to stopped scheduler")]
    Stopped,

    /// The scheduler was constructed outside a Tokio runtime, so its worker
    /// task could not be spawned.
    #[error("no Tokio runtime available to spawn the scheduler worker")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
