//! Common test utilities

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;

use worldtally::auth::AuthSession;
use worldtally::client::{ChallengeResponse, LoginResponse, PlatformApi};
use worldtally::config::{Config, Credentials, HarvestConfig};
use worldtally::models::EntityRecord;
use worldtally::notifications::{Notifier, NotifyError, RunSummary};
use worldtally::storage::StateStore;
use worldtally::utils::error::{AuthError, FetchError};
use worldtally::utils::retry::{ClassBackoff, RetryConfig, RetryPolicy};

// ============================================================================
// Fixtures
// ============================================================================

/// Listing record with an occupancy load signal
pub fn record(id: &str, name: &str, author: &str, occupants: u64) -> EntityRecord {
    EntityRecord::new(id, name, author).with_field("occupants", occupants)
}

/// `count` distinct records named `{prefix}-{n}`, authored by `usr_{prefix}`
pub fn page(prefix: &str, count: usize) -> Vec<EntityRecord> {
    (0..count)
        .map(|n| {
            record(
                &format!("wrld_{prefix}_{n}"),
                &format!("{prefix} world {n}"),
                &format!("usr_{prefix}"),
                n as u64,
            )
        })
        .collect()
}

pub fn credentials() -> Credentials {
    Credentials::new("harvester@example.com", "p@ss word")
}

/// Backoff curves without delays, ceiling of three attempts
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        standard: ClassBackoff::new(0, 0, 2.0),
        rate_limited: ClassBackoff::new(0, 0, 1.5),
    }
}

/// Small, delay-free harvest: two orderings, pages of two, at most three pages
pub fn fast_harvest() -> HarvestConfig {
    HarvestConfig {
        orderings: vec!["popularity".to_string(), "heat".to_string()],
        page_size: 2,
        page_count: 3,
        max_rate_limit_retries: 2,
        ..HarvestConfig::default()
    }
    .without_delays()
}

/// Configuration rooted at `dir` with every delay removed
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.to_path_buf();
    config.harvest = fast_harvest();
    config.retry = fast_retry();
    config.scheduler.interval_secs = 3600;
    config.scheduler.startup_delay_secs = 0;
    config.scheduler.failure_retry_delay_secs = 1;
    config
}

/// Session over `api` persisting into `dir/state`
pub fn session(api: Arc<dyn PlatformApi>, dir: &Path, retry: RetryConfig) -> AuthSession {
    let store = StateStore::new(&dir.join("state")).unwrap();
    AuthSession::new(api, credentials(), RetryPolicy::new(retry), store)
}

// ============================================================================
// Scripted platform
// ============================================================================

/// Scripted [`PlatformApi`]
///
/// Unscripted calls fall back to: login succeeds with `token-default`, pages
/// are empty, companions are missing.
#[derive(Default)]
pub struct FakeApi {
    logins: Mutex<VecDeque<Result<LoginResponse, AuthError>>>,
    challenges: Mutex<VecDeque<Result<ChallengeResponse, AuthError>>>,
    pages: Mutex<HashMap<(String, u32), VecDeque<Result<Vec<EntityRecord>, FetchError>>>>,
    companions: Mutex<HashMap<String, Result<Map<String, Value>, FetchError>>>,
    hold: Mutex<Option<Arc<Notify>>>,
    login_calls: AtomicUsize,
    challenge_codes: Mutex<Vec<String>>,
    page_calls: Mutex<Vec<(String, u32, String)>>,
    companion_calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_login(&self, response: Result<LoginResponse, AuthError>) {
        self.logins.lock().unwrap().push_back(response);
    }

    pub fn push_token(&self, token: &str) {
        self.push_login(Ok(LoginResponse::Authenticated {
            token: token.to_string(),
        }));
    }

    pub fn push_challenge_required(&self) {
        self.push_login(Ok(LoginResponse::ChallengeRequired {
            cookie: "challenge-cookie".to_string(),
        }));
    }

    pub fn push_challenge(&self, response: Result<ChallengeResponse, AuthError>) {
        self.challenges.lock().unwrap().push_back(response);
    }

    pub fn push_page(
        &self,
        ordering: &str,
        offset: u32,
        response: Result<Vec<EntityRecord>, FetchError>,
    ) {
        self.pages
            .lock()
            .unwrap()
            .entry((ordering.to_string(), offset))
            .or_default()
            .push_back(response);
    }

    pub fn set_companion(&self, id: &str, response: Result<Map<String, Value>, FetchError>) {
        self.companions
            .lock()
            .unwrap()
            .insert(id.to_string(), response);
    }

    pub fn set_companion_name(&self, id: &str, name: &str) {
        let mut data = Map::new();
        data.insert("id".into(), json!(id));
        data.insert("displayName".into(), json!(name));
        self.set_companion(id, Ok(data));
    }

    /// Block every page fetch until `gate` is notified
    pub fn hold_pages(&self, gate: Arc<Notify>) {
        *self.hold.lock().unwrap() = Some(gate);
    }

    pub fn release_pages(&self) {
        if let Some(gate) = self.hold.lock().unwrap().take() {
            gate.notify_waiters();
            gate.notify_one();
        }
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn challenge_codes(&self) -> Vec<String> {
        self.challenge_codes.lock().unwrap().clone()
    }

    /// `(ordering, offset, token)` per listing call, in order
    pub fn page_calls(&self) -> Vec<(String, u32, String)> {
        self.page_calls.lock().unwrap().clone()
    }

    pub fn companion_calls(&self) -> Vec<String> {
        self.companion_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformApi for FakeApi {
    async fn login(&self, _credentials: &Credentials) -> Result<LoginResponse, AuthError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.logins
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(LoginResponse::Authenticated {
                    token: "token-default".to_string(),
                })
            })
    }

    async fn verify_challenge(
        &self,
        _cookie: &str,
        code: &str,
    ) -> Result<ChallengeResponse, AuthError> {
        self.challenge_codes.lock().unwrap().push(code.to_string());
        self.challenges
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ChallengeResponse::Rejected))
    }

    async fn fetch_page(
        &self,
        token: &str,
        ordering: &str,
        _page_size: u32,
        offset: u32,
    ) -> Result<Vec<EntityRecord>, FetchError> {
        let gate = self.hold.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.page_calls
            .lock()
            .unwrap()
            .push((ordering.to_string(), offset, token.to_string()));
        self.pages
            .lock()
            .unwrap()
            .get_mut(&(ordering.to_string(), offset))
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn fetch_companion(
        &self,
        _token: &str,
        id: &str,
    ) -> Result<Map<String, Value>, FetchError> {
        self.companion_calls.lock().unwrap().push(id.to_string());
        self.companions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or(Err(FetchError::NotFound))
    }
}

// ============================================================================
// Recording notifier
// ============================================================================

/// Keeps every summary it receives; optionally refuses delivery
#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    summaries: Mutex<Vec<RunSummary>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn summaries(&self) -> Vec<RunSummary> {
        self.summaries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_run_completed(&self, summary: &RunSummary) -> Result<(), NotifyError> {
        self.summaries.lock().unwrap().push(summary.clone());
        if self.fail {
            return Err(NotifyError::Rejected("receiver offline".to_string()));
        }
        Ok(())
    }
}
