//! Error types for clock and task operations.

use std::io;

use thiserror::Error;

use super::task::TaskId;

/// Errors surfaced synchronously by clock operations.
#[derive(Debug, Error)]
pub enum ClockError {
    /// The clock was stopped; it no longer accepts work or answers time queries.
    #[error("clock `{0}` is not running")]
    NotRunning(String),
    /// The clock's queue is at its configured depth.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// A schedule time or delay was NaN or infinite.
    #[error("invalid schedule time {0}")]
    InvalidTime(f64),
    /// Tempo must be finite and strictly positive.
    #[error("invalid tempo {0}: must be finite and greater than 0")]
    InvalidTempo(f64),
    /// Logical time may only be set to the past or present.
    #[error("logical time {requested} is ahead of physical elapsed time {elapsed}")]
    TimeAhead {
        /// Requested logical seconds.
        requested: f64,
        /// Physical elapsed seconds at the time of the request.
        elapsed: f64,
    },
    /// Configuration rejected by validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// A clock or helper thread could not be spawned.
    #[error("failed to spawn clock thread: {0}")]
    Spawn(#[from] io::Error),
    /// A task refused to be resumed.
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Errors produced when resuming a task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task reached `Done` and cannot be resumed again.
    #[error("task {0} has already finished")]
    Finished(TaskId),
    /// The task is already on the running chain.
    #[error("task {0} is already running")]
    AlreadyRunning(TaskId),
    /// The underlying work returned an error.
    #[error("task {id} faulted: {source}")]
    Fault {
        /// Task that faulted.
        id: TaskId,
        /// Error returned by the routine.
        #[source]
        source: anyhow::Error,
    },
    /// The underlying work panicked.
    #[error("task {id} panicked: {message}")]
    Panicked {
        /// Task that panicked.
        id: TaskId,
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl TaskError {
    /// Whether the error came from the task's own work rather than from misuse.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. } | Self::Panicked { .. })
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
