//! Core data structures for the worldtally harvester

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Fields tried, in order, when reading an entity's load signal
pub const LOAD_FIELDS: &[&str] = &[
    "occupants",
    "publicOccupants",
    "capacity",
    "heat",
    "popularity",
];

/// One listing record as returned by the platform
///
/// `id`, `name` and `authorId` are required; every other field lands in
/// `extra` untouched so newer API fields survive a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: String,
    pub name: String,
    pub author_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntityRecord {
    /// Minimal record, mostly useful in tests and fixtures
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        author_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            author_id: author_id.into(),
            author_name: None,
            extra: Map::new(),
        }
    }

    /// Attach an optional field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Occupancy-like load signal: first present numeric field of [`LOAD_FIELDS`]
    pub fn load(&self) -> Option<f64> {
        LOAD_FIELDS
            .iter()
            .find_map(|field| self.extra.get(*field).and_then(Value::as_f64))
    }
}

/// An entity as stored in a daily dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntity {
    #[serde(flatten)]
    pub record: EntityRecord,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Ordering dimensions the entity appeared under on this day
    #[serde(default)]
    pub orderings: BTreeSet<String>,
}

/// Whether a companion lookup found a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum CompanionStatus {
    Found(Map<String, Value>),
    /// Tombstone for a 404; not re-fetched the same day
    Missing,
}

/// Companion (authoring actor) record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionRecord {
    pub id: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: CompanionStatus,
}

impl CompanionRecord {
    pub fn found(
        id: impl Into<String>,
        data: Map<String, Value>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            fetched_at,
            status: CompanionStatus::Found(data),
        }
    }

    pub fn missing(id: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            fetched_at,
            status: CompanionStatus::Missing,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.status, CompanionStatus::Missing)
    }

    /// Display name, when the platform returned one
    pub fn display_name(&self) -> Option<&str> {
        match &self.status {
            CompanionStatus::Found(data) => data.get("displayName").and_then(Value::as_str),
            CompanionStatus::Missing => None,
        }
    }
}

/// Mutable per-day dataset, one file per logical day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyDataset {
    pub date: NaiveDate,
    #[serde(default)]
    pub entities: BTreeMap<String, StoredEntity>,
    #[serde(default)]
    pub companions: BTreeMap<String, CompanionRecord>,
    #[serde(default)]
    pub runs: u32,
    pub updated_at: DateTime<Utc>,
}

impl DailyDataset {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            entities: BTreeMap::new(),
            companions: BTreeMap::new(),
            runs: 0,
            updated_at: Utc::now(),
        }
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Manual,
    Scheduled,
    /// Re-run of a harvest paused on a challenge
    Resume,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Resume => "resume",
        }
    }
}

impl std::fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    ChallengePending,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::ChallengePending => "challenge_pending",
            Self::Failed => "failed",
        }
    }
}

/// Append-only outcome summary of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: uuid::Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub had_errors: bool,
    pub outcome: RunOutcome,
    #[serde(default)]
    pub entities_harvested: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Marker persisted when a run pauses on a challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRun {
    /// Logical day the paused run was harvesting
    pub date: NaiveDate,
    pub trigger: RunTrigger,
    pub paused_at: DateTime<Utc>,
}

/// First-run and day-boundary bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstRunState {
    pub first_fetch_at: Option<DateTime<Utc>>,
    /// Logical day of the most recent successful run
    pub last_run_date: Option<NaiveDate>,
    /// Most recent day whose report was handed off
    pub last_report_date: Option<NaiveDate>,
}

impl FirstRunState {
    pub fn is_first_fetch(&self) -> bool {
        self.first_fetch_at.is_none()
    }
}
