//! Status model for the control surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AuthStatus;
use crate::models::{PendingRun, RunOutcome, RunRecord};
use crate::utils::retry::RetryState;

/// Coarse health, in decreasing precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    AwaitingChallenge,
    RetriesExhausted,
    NoRunYet,
    /// Last run failed or recorded page/companion errors
    Degraded,
    Healthy,
}

impl Health {
    /// Derive health from the session, retry counters and last run
    pub fn derive(auth: AuthStatus, retry: &RetryState, last_run: Option<&RunRecord>) -> Self {
        if auth == AuthStatus::AwaitingChallenge {
            return Self::AwaitingChallenge;
        }
        if retry.is_exhausted() {
            return Self::RetriesExhausted;
        }
        match last_run {
            None => Self::NoRunYet,
            Some(run) if run.outcome != RunOutcome::Completed || run.had_errors => Self::Degraded,
            Some(_) => Self::Healthy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingChallenge => "awaiting_challenge",
            Self::RetriesExhausted => "retries_exhausted",
            Self::NoRunYet => "no_run_yet",
            Self::Degraded => "degraded",
            Self::Healthy => "healthy",
        }
    }
}

/// Snapshot returned by `RunScheduler::status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub health: Health,
    pub auth_state: AuthStatus,
    pub run_in_progress: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run: Option<RunRecord>,
    pub retry: RetryState,
    pub pending_resume: Option<PendingRun>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunTrigger;

    fn run(outcome: RunOutcome, had_errors: bool) -> RunRecord {
        RunRecord {
            id: uuid::Uuid::new_v4(),
            trigger: RunTrigger::Manual,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            had_errors,
            outcome,
            entities_harvested: 0,
            error: None,
        }
    }

    #[test]
    fn test_health_precedence() {
        let mut exhausted = RetryState::new(2);
        exhausted.attempt_count = 2;
        let fresh = RetryState::new(2);
        let ok = run(RunOutcome::Completed, false);

        assert_eq!(
            Health::derive(AuthStatus::AwaitingChallenge, &exhausted, None),
            Health::AwaitingChallenge
        );
        assert_eq!(
            Health::derive(AuthStatus::Unauthenticated, &exhausted, Some(&ok)),
            Health::RetriesExhausted
        );
        assert_eq!(
            Health::derive(AuthStatus::Unauthenticated, &fresh, None),
            Health::NoRunYet
        );
        assert_eq!(
            Health::derive(AuthStatus::Authenticated, &fresh, Some(&ok)),
            Health::Healthy
        );
    }

    #[test]
    fn test_degraded_on_errors_or_failure() {
        let fresh = RetryState::new(5);
        assert_eq!(
            Health::derive(
                AuthStatus::Authenticated,
                &fresh,
                Some(&run(RunOutcome::Completed, true))
            ),
            Health::Degraded
        );
        assert_eq!(
            Health::derive(
                AuthStatus::Unauthenticated,
                &fresh,
                Some(&run(RunOutcome::Failed, false))
            ),
            Health::Degraded
        );
    }

    #[test]
    fn test_health_serialization() {
        assert_eq!(
            serde_json::to_value(Health::RetriesExhausted).unwrap(),
            "retries_exhausted"
        );
        assert_eq!(Health::NoRunYet.as_str(), "no_run_yet");
    }
}
