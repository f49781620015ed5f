//! Paginated, rate-limit-aware listing harvest
//!
//! Pages are fetched strictly in offset order, one ordering dimension after
//! another. Per-page failures are recorded and skipped; only authentication
//! and persistence failures abort the harvest.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::auth::{AuthOutcome, AuthSession};
use crate::client::PlatformApi;
use crate::config::HarvestConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::EntityRecord;
use crate::utils::error::{AuthError, FetchError};

/// A record together with the ordering dimension it was listed under
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestedRecord {
    pub ordering: String,
    pub record: EntityRecord,
}

/// A page that was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub ordering: String,
    /// Zero-based page index within the dimension
    pub page: u32,
    pub error: FetchError,
}

/// Everything a completed harvest produced
#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    pub records: Vec<HarvestedRecord>,
    pub had_errors: bool,
    /// Records collected per ordering dimension
    pub per_ordering: BTreeMap<String, usize>,
    pub failures: Vec<PageFailure>,
}

impl HarvestReport {
    fn record_failure(&mut self, ordering: &str, page: u32, error: FetchError) {
        self.had_errors = true;
        self.failures.push(PageFailure {
            ordering: ordering.to_string(),
            page,
            error,
        });
    }
}

/// Result of [`PaginatedHarvester::harvest`]
#[derive(Debug, Clone)]
pub enum HarvestOutcome {
    Completed(HarvestReport),
    /// Re-authentication needs a challenge code; nothing harvested is kept
    ChallengePending,
}

enum PageResult {
    Records(Vec<EntityRecord>),
    Failed(FetchError),
    ChallengePending,
}

/// Walks every ordering dimension page by page
pub struct PaginatedHarvester {
    api: Arc<dyn PlatformApi>,
    config: HarvestConfig,
}

impl PaginatedHarvester {
    pub fn new(api: Arc<dyn PlatformApi>, config: HarvestConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Harvest with the configured orderings and page bounds
    pub async fn harvest_configured(&self, session: &mut AuthSession) -> Result<HarvestOutcome> {
        let orderings = self.config.orderings.clone();
        self.harvest(
            session,
            &orderings,
            self.config.page_size,
            self.config.page_count,
        )
        .await
    }

    /// Fetch up to `page_count` pages of `page_size` for each ordering
    ///
    /// A dimension ends early on a short page.
    ///
    /// # Errors
    ///
    /// Authentication failures while (re-)authenticating propagate; page
    /// failures never do.
    #[instrument(skip(self, session), fields(dimensions = orderings.len()))]
    pub async fn harvest(
        &self,
        session: &mut AuthSession,
        orderings: &[String],
        page_size: u32,
        page_count: u32,
    ) -> Result<HarvestOutcome> {
        let existing = session.token().map(str::to_string);
        let mut token = match existing {
            Some(token) => token,
            None => match Self::reauthenticate(session).await? {
                Some(token) => token,
                None => return Ok(HarvestOutcome::ChallengePending),
            },
        };

        let mut report = HarvestReport::default();

        for (index, ordering) in orderings.iter().enumerate() {
            if index > 0 {
                sleep_ms(self.config.inter_dimension_delay_ms).await;
            }

            info!(ordering = %ordering, "Harvesting ordering");
            let mut collected = 0usize;

            for page in 0..page_count {
                let offset = page.saturating_mul(page_size);
                debug!(
                    ordering = %ordering,
                    page = page + 1,
                    page_count,
                    offset,
                    "Fetching page"
                );

                match self
                    .fetch_page(session, &mut token, ordering, page_size, offset)
                    .await?
                {
                    PageResult::Records(records) => {
                        let fetched = records.len();
                        metrics::record_page(ordering, "ok", fetched);
                        collected += fetched;
                        report
                            .records
                            .extend(records.into_iter().map(|record| HarvestedRecord {
                                ordering: ordering.clone(),
                                record,
                            }));

                        if fetched < page_size as usize {
                            debug!(
                                ordering = %ordering,
                                page = page + 1,
                                "Short page, dimension exhausted"
                            );
                            break;
                        }
                    }
                    PageResult::Failed(error) => {
                        metrics::record_page(ordering, "failed", 0);
                        warn!(
                            ordering = %ordering,
                            page = page + 1,
                            error = %error,
                            "Page failed, skipping"
                        );
                        report.record_failure(ordering, page, error);
                    }
                    PageResult::ChallengePending => {
                        warn!(
                            ordering = %ordering,
                            page = page + 1,
                            "Harvest paused for challenge"
                        );
                        return Ok(HarvestOutcome::ChallengePending);
                    }
                }

                if page + 1 < page_count {
                    sleep_ms(self.config.inter_page_delay_ms).await;
                }
            }

            info!(ordering = %ordering, records = collected, "Ordering complete");
            report.per_ordering.insert(ordering.clone(), collected);
        }

        Ok(HarvestOutcome::Completed(report))
    }

    /// Fetch one page, absorbing rate limits and a single token refresh
    async fn fetch_page(
        &self,
        session: &mut AuthSession,
        token: &mut String,
        ordering: &str,
        page_size: u32,
        offset: u32,
    ) -> Result<PageResult> {
        let mut rate_limit_retries = 0u32;
        let mut reauthenticated = false;

        loop {
            match self
                .api
                .fetch_page(token.as_str(), ordering, page_size, offset)
                .await
            {
                Ok(records) => return Ok(PageResult::Records(records)),
                Err(FetchError::RateLimited) => {
                    metrics::record_page(ordering, "rate_limited", 0);
                    if rate_limit_retries >= self.config.max_rate_limit_retries {
                        return Ok(PageResult::Failed(FetchError::RateLimitRetriesExceeded {
                            attempts: rate_limit_retries,
                        }));
                    }
                    rate_limit_retries += 1;
                    warn!(
                        ordering = ordering,
                        offset = offset,
                        retry = rate_limit_retries,
                        cooldown_ms = self.config.rate_limit_cooldown_ms,
                        "Rate limited, cooling down before retrying page"
                    );
                    sleep_ms(self.config.rate_limit_cooldown_ms).await;
                }
                Err(FetchError::Unauthorized) if !reauthenticated => {
                    reauthenticated = true;
                    info!(
                        ordering = ordering,
                        offset = offset,
                        "Token expired, re-authenticating"
                    );
                    session.invalidate();
                    match Self::reauthenticate(session).await? {
                        Some(fresh) => *token = fresh,
                        None => return Ok(PageResult::ChallengePending),
                    }
                }
                Err(e) => return Ok(PageResult::Failed(e)),
            }
        }
    }

    /// Authenticate and return the new token, or `None` when a challenge is pending
    async fn reauthenticate(session: &mut AuthSession) -> Result<Option<String>> {
        match session.authenticate().await? {
            AuthOutcome::Authenticated => session
                .token()
                .map(|t| Some(t.to_string()))
                .ok_or_else(|| {
                    Error::from(AuthError::InvalidState("authenticated without a token"))
                }),
            AuthOutcome::ChallengeRequired => Ok(None),
        }
    }
}

async fn sleep_ms(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
