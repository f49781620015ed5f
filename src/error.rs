//! Crate-level error type
//!
//! Each domain keeps its own enum ([`AuthError`], [`FetchError`],
//! [`PersistError`], [`SchedulerError`]); [`Error`] is what crosses module
//! boundaries. The [`WorldtallyErrorTrait`] view lets callers decide between
//! waiting for the next run and asking an operator.
//!
//! ```rust,ignore
//! use worldtally::error::{Error, WorldtallyErrorTrait};
//!
//! fn log_failure(err: &Error) {
//!     tracing::error!(category = err.category().as_str(), retry = err.is_recoverable(), "{err}");
//! }
//! ```

use thiserror::Error;

pub use crate::scheduler::error::SchedulerError;
pub use crate::utils::error::{AuthError, FetchError, PersistError};

/// Shared view over crate errors
pub trait WorldtallyErrorTrait: std::error::Error {
    /// Whether a later run may succeed without operator action
    fn is_recoverable(&self) -> bool;

    fn category(&self) -> ErrorCategory;
}

/// Coarse grouping used in logs and run records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transport failures and remote status codes
    Network,
    /// Credential exchange, backoff and challenge
    Auth,
    /// Dataset and state files
    Storage,
    /// Missing or invalid operator input
    Config,
    /// Run coordination
    Scheduler,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
        }
    }
}

/// Error returned by sessions, harvests and the scheduler
#[derive(Error, Debug)]
pub enum Error {
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Persist error: {0}")]
    Persist(#[from] PersistError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl WorldtallyErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_recoverable(),
            Self::Fetch(e) => e.is_recoverable(),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Persist(_) => true,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth(AuthError::NetworkFault(_)) | Self::Fetch(_) => ErrorCategory::Network,
            Self::Auth(AuthError::MissingCredentials) => ErrorCategory::Config,
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Persist(_) => ErrorCategory::Storage,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
