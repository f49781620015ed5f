//! Error types for the scheduler module

use thiserror::Error;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Another run holds the single-flight guard
    #[error("A harvest run is already in progress")]
    RunInProgress,

    /// A challenge code was submitted while no challenge is outstanding
    #[error("No challenge is pending")]
    NoChallengePending,

    /// The scheduler is stopping and refuses new work
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

impl SchedulerError {
    /// Whether the same request may succeed later
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RunInProgress)
    }
}
