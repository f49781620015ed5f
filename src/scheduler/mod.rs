//! Single-flight run orchestration
//!
//! [`RunScheduler`] owns the session, harvester and merger and guarantees
//! that at most one run is active at a time, whichever trigger started it.
//!
//! ```text
//!   timer ─┐                       ┌─▶ Completed ──▶ save dataset ──▶ Notifier
//!  manual ─┼─▶ single-flight lock ─┼─▶ ChallengePending ──▶ save resume marker
//!  resume ─┘                       └─▶ Failed ──▶ (timer only) one retry
//! ```
//!
//! A run that pauses for a challenge is not retried by the timer. It is
//! resumed exactly once after a valid code is submitted, or at startup when
//! the marker survived a restart.

pub mod error;
pub mod status;

pub use error::{SchedulerError, SchedulerResult};
pub use status::{Health, RunStatus};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::{broadcast, watch, Mutex, OwnedMutexGuard};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analytics::{day_stats, DayStats};
use crate::auth::{AuthSession, AuthSnapshot, AuthStatus};
use crate::client::PlatformApi;
use crate::config::{Config, Credentials, SchedulerConfig};
use crate::error::{Error, Result, WorldtallyErrorTrait};
use crate::harvest::{HarvestOutcome, PaginatedHarvester};
use crate::merge::DailyDatasetMerger;
use crate::metrics;
use crate::models::{PendingRun, RunOutcome, RunRecord, RunTrigger};
use crate::notifications::{Notifier, RunSummary};
use crate::storage::{DatasetStore, StateStore};
use crate::utils::error::AuthError;
use crate::utils::retry::RetryPolicy;

/// The logical day a run harvests into (UTC)
pub fn logical_day() -> NaiveDate {
    Utc::now().date_naive()
}

// ============================================================================
// Events
// ============================================================================

/// Lifecycle events broadcast to subscribers
#[derive(Debug, Clone)]
pub enum RunEvent {
    Started { id: Uuid, trigger: RunTrigger },
    Finished(RunRecord),
}

/// Result of a foreground run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub record: RunRecord,
    /// Present only for completed runs
    pub summary: Option<RunSummary>,
}

// ============================================================================
// Single-flight guard
// ============================================================================

struct RunGuard {
    _permit: OwnedMutexGuard<()>,
    running: Arc<AtomicBool>,
}

impl RunGuard {
    fn new(permit: OwnedMutexGuard<()>, running: Arc<AtomicBool>) -> Self {
        running.store(true, Ordering::SeqCst);
        metrics::set_run_in_progress(true);
        Self {
            _permit: permit,
            running,
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        metrics::set_run_in_progress(false);
    }
}

struct MergedDay {
    date: NaiveDate,
    entities_harvested: usize,
    had_errors: bool,
    entities: usize,
    companions: usize,
    day_stats: DayStats,
    report_due: Option<NaiveDate>,
}

enum RunStep {
    Merged(MergedDay),
    ChallengePending,
}

// ============================================================================
// Run Scheduler
// ============================================================================

/// Orchestrates harvest runs
pub struct RunScheduler {
    config: SchedulerConfig,
    harvester: PaginatedHarvester,
    merger: DailyDatasetMerger,
    auth: Mutex<AuthSession>,
    auth_view: watch::Receiver<AuthSnapshot>,
    datasets: DatasetStore,
    state: StateStore,
    notifier: Arc<dyn Notifier>,
    run_lock: Arc<Mutex<()>>,
    running: Arc<AtomicBool>,
    last_run: RwLock<Option<RunRecord>>,
    events: broadcast::Sender<RunEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl RunScheduler {
    /// Wire up the scheduler from configuration
    ///
    /// Storage directories are created here; persisted retry counters and
    /// the last run record are restored.
    pub fn new(
        config: &Config,
        api: Arc<dyn PlatformApi>,
        credentials: Credentials,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>> {
        let state = StateStore::new(&config.storage.state_dir())?;
        let datasets = DatasetStore::new(&config.storage.daily_dir())?;

        let session = AuthSession::new(
            Arc::clone(&api),
            credentials,
            RetryPolicy::new(config.retry.clone()),
            state.clone(),
        );
        let auth_view = session.subscribe();

        let last_run = state.last_run().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read run log");
            None
        });

        let (events, _) = broadcast::channel(64);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            config: config.scheduler.clone(),
            harvester: PaginatedHarvester::new(Arc::clone(&api), config.harvest.clone()),
            merger: DailyDatasetMerger::new(
                api,
                Duration::from_millis(config.harvest.companion_delay_ms),
            ),
            auth: Mutex::new(session),
            auth_view,
            datasets,
            state,
            notifier,
            run_lock: Arc::new(Mutex::new(())),
            running: Arc::new(AtomicBool::new(false)),
            last_run: RwLock::new(last_run),
            events,
            shutdown_tx,
        }))
    }

    /// Subscribe to run lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Store the daily datasets are written to
    pub fn datasets(&self) -> &DatasetStore {
        &self.datasets
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn try_acquire(&self) -> SchedulerResult<RunGuard> {
        if self.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }
        let permit = Arc::clone(&self.run_lock)
            .try_lock_owned()
            .map_err(|_| SchedulerError::RunInProgress)?;
        Ok(RunGuard::new(permit, Arc::clone(&self.running)))
    }

    // ------------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------------

    /// Start a run in the background
    ///
    /// # Errors
    ///
    /// `RunInProgress` when another run holds the guard; the trigger is
    /// dropped, not queued.
    pub fn trigger_run(self: &Arc<Self>, trigger: RunTrigger) -> SchedulerResult<()> {
        let guard = self.try_acquire()?;
        let this = Arc::clone(self);
        let date = logical_day();
        tokio::spawn(async move {
            this.execute(trigger, date, guard).await;
        });
        Ok(())
    }

    /// Run in the foreground and return the outcome
    pub async fn run_now(&self, trigger: RunTrigger) -> SchedulerResult<RunReport> {
        let guard = self.try_acquire()?;
        Ok(self.execute(trigger, logical_day(), guard).await)
    }

    /// Submit the challenge code and resume the paused run
    ///
    /// # Errors
    ///
    /// `NoChallengePending` when the session is not waiting for a code;
    /// `ChallengeRejected` (session still waiting) when the code is refused.
    pub async fn submit_challenge_code(self: &Arc<Self>, code: &str) -> Result<()> {
        if self.auth_view.borrow().status != AuthStatus::AwaitingChallenge {
            return Err(SchedulerError::NoChallengePending.into());
        }

        match self.auth.lock().await.submit_challenge_code(code).await {
            Ok(()) => {}
            Err(Error::Auth(AuthError::InvalidState(_))) => {
                return Err(SchedulerError::NoChallengePending.into());
            }
            Err(e) => return Err(e),
        }

        if !self.resume_pending() {
            info!("Challenge verified; no paused run to resume");
        }
        Ok(())
    }

    /// Consume the resume marker and start exactly one resume run
    ///
    /// The resume run waits for any active run instead of being dropped.
    fn resume_pending(self: &Arc<Self>) -> bool {
        if self.is_shutting_down() {
            return false;
        }

        let pending = match self.state.load_pending_run() {
            Ok(Some(pending)) => pending,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable resume marker");
                return false;
            }
        };

        if let Err(e) = self.state.clear_pending_run() {
            error!(error = %e, "Failed to clear resume marker");
            return false;
        }

        info!(date = %pending.date, paused_trigger = %pending.trigger, "Resuming paused run");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let permit = Arc::clone(&this.run_lock).lock_owned().await;
            let guard = RunGuard::new(permit, Arc::clone(&this.running));
            this.execute(RunTrigger::Resume, pending.date, guard).await;
        });
        true
    }

    /// Reset the persisted authentication backoff counters
    ///
    /// # Errors
    ///
    /// `RunInProgress` while a run holds the session.
    pub async fn reset_retry_state(&self) -> Result<()> {
        let _idle = self
            .run_lock
            .try_lock()
            .map_err(|_| SchedulerError::RunInProgress)?;
        self.auth.lock().await.reset_retry_state()
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    /// Current status; never blocks on an active run
    pub fn status(&self) -> RunStatus {
        let snapshot = self.auth_view.borrow().clone();
        let last_run = self.last_run.read().ok().and_then(|last| last.clone());
        let pending_resume = self.state.load_pending_run().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read resume marker");
            None
        });

        RunStatus {
            health: Health::derive(snapshot.status, &snapshot.retry, last_run.as_ref()),
            auth_state: snapshot.status,
            run_in_progress: self.is_running(),
            last_run_at: last_run.as_ref().map(|run| run.completed_at),
            last_run,
            retry: snapshot.retry,
            pending_resume,
        }
    }

    // ------------------------------------------------------------------------
    // Run execution
    // ------------------------------------------------------------------------

    async fn execute(&self, trigger: RunTrigger, date: NaiveDate, guard: RunGuard) -> RunReport {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let timer = metrics::start_run_timer(trigger.as_str());
        let _ = self.events.send(RunEvent::Started { id, trigger });
        info!(run_id = %id, trigger = %trigger, date = %date, "Run started");

        let step = self.harvest_and_merge(date).await;

        let mut record = RunRecord {
            id,
            trigger,
            started_at,
            completed_at: Utc::now(),
            had_errors: false,
            outcome: RunOutcome::Completed,
            entities_harvested: 0,
            error: None,
        };

        let merged = match step {
            Ok(RunStep::Merged(merged)) => {
                record.had_errors = merged.had_errors;
                record.entities_harvested = merged.entities_harvested;
                info!(
                    run_id = %id,
                    entities = merged.entities,
                    harvested = merged.entities_harvested,
                    had_errors = merged.had_errors,
                    "Run completed"
                );
                Some(merged)
            }
            Ok(RunStep::ChallengePending) => {
                record.outcome = RunOutcome::ChallengePending;
                self.persist_marker(date, trigger);
                warn!(run_id = %id, "Run paused until a challenge code is submitted");
                None
            }
            Err(e) => {
                record.outcome = RunOutcome::Failed;
                record.had_errors = true;
                record.error = Some(e.to_string());
                error!(
                    run_id = %id,
                    category = e.category().as_str(),
                    recoverable = e.is_recoverable(),
                    error = %e,
                    "Run failed"
                );
                None
            }
        };

        if let Err(e) = self.state.append_run(&record) {
            error!(run_id = %id, error = %e, "Failed to append run log");
        }
        if let Ok(mut last) = self.last_run.write() {
            *last = Some(record.clone());
        }
        metrics::record_run(trigger.as_str(), record.outcome.as_str());
        drop(timer);
        drop(guard);
        let _ = self.events.send(RunEvent::Finished(record.clone()));

        let summary = merged.map(|merged| RunSummary {
            run: record.clone(),
            date: merged.date,
            entities: merged.entities,
            companions: merged.companions,
            day_stats: merged.day_stats,
            report_due: merged.report_due,
        });

        if let Some(summary) = &summary {
            if let Err(e) = self.notifier.on_run_completed(summary).await {
                warn!(notifier = self.notifier.name(), error = %e, "Run summary delivery failed");
            }
        }

        RunReport { record, summary }
    }

    async fn harvest_and_merge(&self, date: NaiveDate) -> Result<RunStep> {
        let (report, token) = {
            let mut session = self.auth.lock().await;
            if session.status() == AuthStatus::AwaitingChallenge {
                debug!("Session is awaiting a challenge code");
                return Ok(RunStep::ChallengePending);
            }

            match self.harvester.harvest_configured(&mut session).await? {
                HarvestOutcome::ChallengePending => return Ok(RunStep::ChallengePending),
                HarvestOutcome::Completed(report) => {
                    let token = session
                        .token()
                        .map(str::to_string)
                        .ok_or_else(|| {
                            Error::from(AuthError::InvalidState(
                                "harvest completed without a session",
                            ))
                        })?;
                    (report, token)
                }
            }
        };

        let entities_harvested = report.records.len();
        let mut dataset = self.datasets.load_or_new(date)?;
        let stats = self.merger.merge(&mut dataset, report.records, &token).await;
        dataset.runs += 1;
        self.datasets.save(&dataset)?;
        metrics::set_entities_stored(dataset.entities.len());

        let report_due = self.record_day(date)?;

        Ok(RunStep::Merged(MergedDay {
            date,
            entities_harvested,
            had_errors: report.had_errors || stats.had_errors(),
            entities: dataset.entities.len(),
            companions: dataset.companions.len(),
            day_stats: day_stats(dataset.entities.values().map(|entity| &entity.record)),
            report_due,
        }))
    }

    /// Update first-run bookkeeping; returns a previous day now due for a report
    fn record_day(&self, date: NaiveDate) -> Result<Option<NaiveDate>> {
        let mut first = self.state.load_first_run()?;
        if first.is_first_fetch() {
            info!(date = %date, "First fetch recorded");
            first.first_fetch_at = Some(Utc::now());
        }

        let report_due = first
            .last_run_date
            .filter(|previous| *previous < date)
            .filter(|previous| first.last_report_date.map_or(true, |r| r < *previous));
        if let Some(day) = report_due {
            info!(day = %day, "Day boundary crossed, previous day due for report");
            first.last_report_date = Some(day);
        }

        let latest = first.last_run_date.map_or(date, |d| d.max(date));
        first.last_run_date = Some(latest);
        self.state.save_first_run(&first)?;
        Ok(report_due)
    }

    /// Save the resume marker, keeping an older one if present
    fn persist_marker(&self, date: NaiveDate, trigger: RunTrigger) {
        if let Ok(Some(existing)) = self.state.load_pending_run() {
            debug!(date = %existing.date, "Resume marker already present");
            return;
        }

        let marker = PendingRun {
            date,
            trigger,
            paused_at: Utc::now(),
        };
        if let Err(e) = self.state.save_pending_run(&marker) {
            error!(error = %e, "Failed to persist resume marker");
        }
    }

    // ------------------------------------------------------------------------
    // Timer loop
    // ------------------------------------------------------------------------

    /// Run the timer loop until [`shutdown`](Self::shutdown)
    ///
    /// A persisted resume marker is consumed first. A failed timer run is
    /// retried once after `failure_retry_delay_secs`; the retry never
    /// schedules another.
    pub async fn start(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let first_delay = if self.config.immediate_start {
            Duration::from_secs(self.config.startup_delay_secs)
        } else {
            period
        };

        self.resume_pending();

        let mut ticker = tokio::time::interval_at(Instant::now() + first_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut retry_at: Option<Instant> = None;

        info!(
            interval_secs = period.as_secs(),
            first_run_in_secs = first_delay.as_secs(),
            "Scheduler started"
        );

        loop {
            let retry_deadline = retry_at.unwrap_or_else(Instant::now);
            tokio::select! {
                _ = ticker.tick() => {
                    retry_at = self.timer_run(false).await;
                }
                _ = tokio::time::sleep_until(retry_deadline), if retry_at.is_some() => {
                    retry_at = None;
                    self.timer_run(true).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// One timer-driven run; returns when to retry, if at all
    async fn timer_run(&self, is_retry: bool) -> Option<Instant> {
        let snapshot = self.auth_view.borrow().clone();
        if snapshot.status == AuthStatus::AwaitingChallenge {
            info!("Skipping timer run while awaiting a challenge code");
            return None;
        }
        if snapshot.retry.is_exhausted() {
            warn!("Skipping timer run; authentication retries exhausted");
            return None;
        }

        match self.run_now(RunTrigger::Scheduled).await {
            Ok(report) if report.record.outcome == RunOutcome::Failed && !is_retry => {
                let delay = Duration::from_secs(self.config.failure_retry_delay_secs);
                warn!(
                    retry_in_secs = delay.as_secs(),
                    "Timer run failed, retrying once"
                );
                Some(Instant::now() + delay)
            }
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Timer trigger dropped");
                None
            }
        }
    }

    /// Stop the timer loop and refuse new runs
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
