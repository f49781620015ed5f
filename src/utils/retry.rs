//! Retry and backoff policy
//!
//! The policy is pure decision logic over a persisted [`RetryState`]: callers
//! load the state, ask the policy whether an attempt is permitted, record the
//! outcome and write the state back so a restart mid-backoff keeps waiting.
//!
//! Two backoff curves exist. Credential, unexpected-status and network
//! failures share the `standard` curve (short base, doubling, multi-minute
//! cap). Rate-limit responses use the `rate_limited` curve, which starts much
//! later and grows more slowly towards a higher cap.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::AuthError;

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    InvalidCredentials,
    RateLimited,
    Unexpected,
    NetworkFault,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "invalid_credentials"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Unexpected => write!(f, "unexpected"),
            Self::NetworkFault => write!(f, "network_fault"),
        }
    }
}

/// Exponential backoff curve for one failure class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassBackoff {
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Growth factor between consecutive failures
    pub backoff_multiplier: f64,
}

impl ClassBackoff {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier,
        }
    }

    /// Calculate delay after the `attempt`-th consecutive failure (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = if attempt == 0 {
            0
        } else {
            let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
            let exponential = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
            if exponential.is_finite() {
                (exponential as u64).min(self.max_delay_ms)
            } else {
                self.max_delay_ms
            }
        };

        Duration::from_millis(delay_ms)
    }
}

/// Configuration for the authentication backoff policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Consecutive failures allowed before the policy stops permitting attempts
    pub max_attempts: u32,

    /// Curve for invalid credentials, unexpected status and network faults
    pub standard: ClassBackoff,

    /// Curve for rate-limited responses
    pub rate_limited: ClassBackoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            standard: ClassBackoff::new(30_000, 15 * 60_000, 2.0),
            rate_limited: ClassBackoff::new(5 * 60_000, 60 * 60_000, 1.5),
        }
    }
}

impl RetryConfig {
    /// Backoff curve for a failure class
    pub fn backoff_for(&self, class: FailureClass) -> &ClassBackoff {
        match class {
            FailureClass::RateLimited => &self.rate_limited,
            FailureClass::InvalidCredentials
            | FailureClass::Unexpected
            | FailureClass::NetworkFault => &self.standard,
        }
    }
}

/// Persisted retry counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    /// Consecutive failed attempts since the last success or reset
    pub attempt_count: u32,

    /// Earliest time the next attempt may run; `None` means immediately
    pub next_allowed_at: Option<DateTime<Utc>>,

    /// Ceiling in force when the state was last written
    pub max_attempts: u32,

    /// Class of the most recent failure
    #[serde(default)]
    pub last_failure: Option<FailureClass>,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            next_allowed_at: None,
            max_attempts,
            last_failure: None,
        }
    }

    /// Clear counters after a successful authentication or an operator reset
    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.next_allowed_at = None;
        self.last_failure = None;
    }

    /// Whether the backoff ceiling has been reached
    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }
}

/// Outcome of [`RetryPolicy::decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether another attempt is allowed at all
    pub allow: bool,

    /// When that attempt may run (`None` if not allowed)
    pub wait_until: Option<DateTime<Utc>>,
}

/// Stateless backoff decisions over a [`RetryState`]
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide whether another attempt is allowed after a failure of `class`
    ///
    /// Pure: `state` is the state before the failure is counted.
    pub fn decide(&self, state: &RetryState, class: FailureClass, now: DateTime<Utc>) -> Decision {
        let attempts = state.attempt_count.saturating_add(1);
        if attempts >= self.config.max_attempts {
            return Decision {
                allow: false,
                wait_until: None,
            };
        }

        let delay = self.config.backoff_for(class).calculate_delay(attempts);
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        Decision {
            allow: true,
            wait_until: now.checked_add_signed(delay),
        }
    }

    /// Count a failure into `state` and return the resulting decision
    pub fn record_failure(
        &self,
        state: &mut RetryState,
        class: FailureClass,
        now: DateTime<Utc>,
    ) -> Decision {
        let decision = self.decide(state, class, now);
        state.attempt_count = state.attempt_count.saturating_add(1);
        state.max_attempts = self.config.max_attempts;
        state.last_failure = Some(class);
        state.next_allowed_at = decision.wait_until;
        decision
    }

    /// Check that an attempt may run now
    ///
    /// # Errors
    ///
    /// `RetryExhausted` once the ceiling is reached, `BackoffActive` while the
    /// scheduled wait has not elapsed.
    pub fn permits(&self, state: &RetryState, now: DateTime<Utc>) -> Result<(), AuthError> {
        if state.attempt_count >= self.config.max_attempts {
            return Err(AuthError::RetryExhausted {
                attempts: state.attempt_count,
            });
        }

        match state.next_allowed_at {
            Some(until) if until > now => Err(AuthError::BackoffActive { until }),
            _ => Ok(()),
        }
    }
}

/// Execute an operation with retry logic and exponential backoff
///
/// Used for best-effort deliveries (e.g. webhooks) where the caller only
/// cares about the final result.
pub async fn with_retry<T, F, Fut>(
    backoff: &ClassBackoff,
    max_retries: u32,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff.calculate_delay(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis(),
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                warn!(
                    attempt = attempt,
                    max_retries = max_retries,
                    error = %e,
                    "Operation failed"
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Operation failed with no error details")))
}
