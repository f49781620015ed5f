//! Authentication session
//!
//! [`AuthSession`] owns the credential exchange with the platform and the
//! persisted [`RetryState`] that gates it. The session is in exactly one of
//! three states:
//!
//! ```text
//! Unauthenticated --authenticate (token)------> Authenticated
//! Unauthenticated --authenticate (challenge)--> AwaitingChallenge
//! AwaitingChallenge --submit_challenge_code--> Authenticated
//! any --authenticate (failure)--------------> Unauthenticated
//! ```
//!
//! A secret-free [`AuthSnapshot`] is published on a watch channel after every
//! transition so status readers never contend with a running harvest.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::client::{ChallengeResponse, LoginResponse, PlatformApi};
use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::metrics;
use crate::storage::StateStore;
use crate::utils::error::AuthError;
use crate::utils::retry::{RetryPolicy, RetryState};

/// Session state, with the secret each state carries
#[derive(Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated {
        token: String,
    },
    /// Waiting for an out-of-band code; `cookie` binds the code to the half-open session
    AwaitingChallenge {
        cookie: String,
    },
}

impl AuthState {
    pub fn status(&self) -> AuthStatus {
        match self {
            Self::Unauthenticated => AuthStatus::Unauthenticated,
            Self::Authenticated { .. } => AuthStatus::Authenticated,
            Self::AwaitingChallenge { .. } => AuthStatus::AwaitingChallenge,
        }
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.status())
    }
}

/// Secret-free view of [`AuthState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Unauthenticated,
    Authenticated,
    AwaitingChallenge,
}

impl AuthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
            Self::AwaitingChallenge => "awaiting_challenge",
        }
    }
}

/// What status readers see
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub status: AuthStatus,
    pub retry: RetryState,
}

/// Successful result of [`AuthSession::authenticate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    /// Work must pause until a code is submitted; not a failure
    ChallengeRequired,
}

/// Credential exchange state machine with persisted backoff
pub struct AuthSession {
    api: Arc<dyn PlatformApi>,
    credentials: Credentials,
    policy: RetryPolicy,
    store: StateStore,
    state: AuthState,
    retry: RetryState,
    snapshot_tx: watch::Sender<AuthSnapshot>,
}

impl AuthSession {
    /// Create an unauthenticated session, restoring retry counters from `store`
    ///
    /// An unreadable retry state file is logged and replaced by fresh counters.
    pub fn new(
        api: Arc<dyn PlatformApi>,
        credentials: Credentials,
        policy: RetryPolicy,
        store: StateStore,
    ) -> Self {
        let max_attempts = policy.config().max_attempts;
        let mut retry = match store.load_retry_state() {
            Ok(Some(state)) => state,
            Ok(None) => RetryState::new(max_attempts),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable retry state");
                RetryState::new(max_attempts)
            }
        };
        retry.max_attempts = max_attempts;

        let (snapshot_tx, _) = watch::channel(AuthSnapshot {
            status: AuthStatus::Unauthenticated,
            retry: retry.clone(),
        });

        Self {
            api,
            credentials,
            policy,
            store,
            state: AuthState::Unauthenticated,
            retry,
            snapshot_tx,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn status(&self) -> AuthStatus {
        self.state.status()
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    /// Session token, present only while authenticated
    pub fn token(&self) -> Option<&str> {
        match &self.state {
            AuthState::Authenticated { token } => Some(token),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated { .. })
    }

    /// Receiver for status snapshots
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(AuthSnapshot {
            status: self.state.status(),
            retry: self.retry.clone(),
        });
    }

    fn transition(&mut self, next: AuthState) {
        if self.state.status() != next.status() {
            info!(from = ?self.state, to = ?next, "Auth state changed");
        }
        self.state = next;
        self.publish();
    }

    fn persist_retry(&self) -> Result<()> {
        self.store.save_retry_state(&self.retry).map_err(|e| {
            error!(error = %e, "Failed to persist retry state");
            Error::from(e)
        })
    }

    /// Exchange the configured credentials for a session
    ///
    /// # Errors
    ///
    /// - `MissingCredentials` when no credentials are configured (not counted)
    /// - `RetryExhausted` / `BackoffActive` when the policy refuses the attempt
    /// - `InvalidCredentials`, `RateLimited`, `Unexpected`, `NetworkFault` after
    ///   the failure has been counted and persisted
    /// - a persistence error when retry state cannot be written
    pub async fn authenticate(&mut self) -> Result<AuthOutcome> {
        if !self.credentials.is_complete() {
            error!("Credentials are not configured");
            return Err(AuthError::MissingCredentials.into());
        }

        let now = Utc::now();
        if let Err(e) = self.policy.permits(&self.retry, now) {
            if matches!(e, AuthError::RetryExhausted { .. }) {
                self.transition(AuthState::Unauthenticated);
            }
            metrics::record_auth_attempt("refused");
            warn!(error = %e, "Authentication attempt refused by backoff policy");
            return Err(e.into());
        }

        info!("Authenticating with platform");
        match self.api.login(&self.credentials).await {
            Ok(LoginResponse::Authenticated { token }) => {
                self.retry.reset();
                self.persist_retry()?;
                self.transition(AuthState::Authenticated { token });
                metrics::record_auth_attempt("authenticated");
                info!("Authentication successful");
                Ok(AuthOutcome::Authenticated)
            }
            Ok(LoginResponse::ChallengeRequired { cookie }) => {
                self.transition(AuthState::AwaitingChallenge { cookie });
                metrics::record_auth_attempt("challenge");
                warn!("Platform requires a challenge code; harvesting paused");
                Ok(AuthOutcome::ChallengeRequired)
            }
            Err(e) => {
                metrics::record_auth_attempt("failed");
                if let Some(class) = e.failure_class() {
                    let decision = self.policy.record_failure(&mut self.retry, class, now);
                    if decision.allow {
                        warn!(
                            error = %e,
                            attempt = self.retry.attempt_count,
                            max_attempts = self.retry.max_attempts,
                            next_allowed_at = ?decision.wait_until,
                            "Authentication failed"
                        );
                    } else {
                        error!(
                            error = %e,
                            attempts = self.retry.attempt_count,
                            "Authentication retries exhausted; operator reset required"
                        );
                    }
                }
                self.transition(AuthState::Unauthenticated);
                self.persist_retry()?;
                Err(e.into())
            }
        }
    }

    /// Submit the out-of-band challenge code
    ///
    /// Rejections leave the session awaiting a code and do not count against
    /// the backoff ceiling.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless awaiting a challenge, `ChallengeRejected` when the
    /// code is refused, transport errors as returned by the client.
    pub async fn submit_challenge_code(&mut self, code: &str) -> Result<()> {
        let cookie = match &self.state {
            AuthState::AwaitingChallenge { cookie } => cookie.clone(),
            _ => return Err(AuthError::InvalidState("no challenge is pending").into()),
        };

        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::ChallengeRejected.into());
        }

        match self.api.verify_challenge(&cookie, code).await? {
            ChallengeResponse::Verified { token } => {
                self.retry.reset();
                self.persist_retry()?;
                self.transition(AuthState::Authenticated {
                    token: token.unwrap_or(cookie),
                });
                info!("Challenge verified");
                Ok(())
            }
            ChallengeResponse::Rejected => {
                warn!("Challenge code rejected");
                Err(AuthError::ChallengeRejected.into())
            }
        }
    }

    /// Forget the current token (e.g. after the platform reports it expired)
    pub fn invalidate(&mut self) {
        if self.is_authenticated() {
            self.transition(AuthState::Unauthenticated);
        }
    }

    /// Operator reset of the backoff counters
    pub fn reset_retry_state(&mut self) -> Result<()> {
        self.retry.reset();
        self.persist_retry()?;
        self.publish();
        info!("Retry state reset by operator");
        Ok(())
    }
}
