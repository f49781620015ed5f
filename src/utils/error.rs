//! Error types for the worldtally harvester
//!
//! This module defines the domain errors raised by the platform client,
//! the authentication session and the durable stores.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::retry::FailureClass;

/// Errors raised while exchanging credentials or verifying a challenge code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No username/password configured
    #[error("Credentials are not configured (set WORLDTALLY_USERNAME and WORLDTALLY_PASSWORD)")]
    MissingCredentials,

    /// Platform rejected the credentials
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Platform rate-limited the credential exchange
    #[error("Authentication rate limited")]
    RateLimited,

    /// Unexpected HTTP status from the credential endpoint
    #[error("Unexpected authentication response status: {0}")]
    Unexpected(u16),

    /// Transport-level failure
    #[error("Network fault during authentication: {0}")]
    NetworkFault(String),

    /// Backoff ceiling reached; cleared only by a successful login or an operator reset
    #[error("Authentication retries exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// A retry is scheduled but not yet allowed
    #[error("Authentication backoff active until {until}")]
    BackoffActive { until: DateTime<Utc> },

    /// Operation not valid in the current session state
    #[error("Invalid authentication state: {0}")]
    InvalidState(&'static str),

    /// Challenge code was not accepted
    #[error("Challenge code rejected")]
    ChallengeRejected,
}

impl AuthError {
    /// Failure class used by the backoff policy, if this error counts against it
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::InvalidCredentials => Some(FailureClass::InvalidCredentials),
            Self::RateLimited => Some(FailureClass::RateLimited),
            Self::Unexpected(_) => Some(FailureClass::Unexpected),
            Self::NetworkFault(_) => Some(FailureClass::NetworkFault),
            _ => None,
        }
    }

    /// Whether waiting and trying again can succeed without operator action
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials
                | Self::RateLimited
                | Self::Unexpected(_)
                | Self::NetworkFault(_)
                | Self::BackoffActive { .. }
        )
    }
}

/// Errors that can occur while fetching a listing page or a companion record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Auth token expired or missing
    #[error("Unauthorized")]
    Unauthorized,

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Resource does not exist
    #[error("Not found")]
    NotFound,

    /// Other non-success status
    #[error("Server returned status {0}")]
    Status(u16),

    /// Transport-level failure (connect, timeout, body read)
    #[error("Network error: {0}")]
    Network(String),

    /// Body was not the expected JSON shape
    #[error("Decoding error: {0}")]
    Decode(String),

    /// The same page stayed rate-limited across every cooldown
    #[error("Page still rate limited after {attempts} retries")]
    RateLimitRetriesExceeded { attempts: u32 },
}

impl FetchError {
    /// Whether the same request may succeed later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Network(_) | Self::RateLimitRetriesExceeded { .. }
        ) || matches!(self, Self::Status(code) if *code >= 500)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Errors reading or writing durable state
#[derive(Error, Debug)]
pub enum PersistError {
    /// Filesystem failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization failure
    #[error("JSON error on {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn json(path: &std::path::Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.display().to_string(),
            source,
        }
    }
}
