//! Cross-run statistics over every stored daily dataset

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::round2;
use crate::merge::is_placeholder;
use crate::storage::DatasetStore;
use crate::utils::error::PersistError;

/// Sort key for aggregated entities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    AvgLoad,
    MaxLoad,
    Occurrences,
    Name,
}

impl std::str::FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "avg_load" | "avg" => Ok(Self::AvgLoad),
            "max_load" | "max" => Ok(Self::MaxLoad),
            "occurrences" => Ok(Self::Occurrences),
            "name" => Ok(Self::Name),
            other => Err(format!(
                "unknown sort key '{other}' (expected avg_load, max_load, occurrences or name)"
            )),
        }
    }
}

impl std::fmt::Display for SortBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AvgLoad => "avg_load",
            Self::MaxLoad => "max_load",
            Self::Occurrences => "occurrences",
            Self::Name => "name",
        };
        write!(f, "{name}")
    }
}

/// Aggregation options
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub sort_by: SortBy,
    /// Days an entity must appear on to be reported
    pub min_occurrences: usize,
    /// Keep only the first N entities after sorting
    pub top_n: Option<usize>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            sort_by: SortBy::AvgLoad,
            min_occurrences: 1,
            top_n: None,
        }
    }
}

/// One entity summarized across days
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedEntity {
    pub id: String,
    pub name: String,
    pub author_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    /// Days the entity was present
    pub occurrences: usize,
    pub avg_load: f64,
    pub max_load: f64,
    pub min_load: f64,
    pub total_load: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub orderings: BTreeSet<String>,
}

/// Summary across every reported entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub total_entities: usize,
    pub avg_occurrences: f64,
    pub highest_occurrences: usize,
    pub lowest_occurrences: usize,
    pub avg_avg_load: f64,
    pub highest_avg_load: f64,
    pub lowest_avg_load: f64,
}

/// Output of [`aggregate`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub generated_at: DateTime<Utc>,
    pub sort_by: SortBy,
    pub min_occurrences: usize,
    pub data_files: usize,
    pub data_points: usize,
    /// Entities before the occurrence filter
    pub unfiltered_entities: usize,
    pub global: GlobalStats,
    pub entities: Vec<AggregatedEntity>,
}

/// Aggregate every daily dataset under `dir`
///
/// Unreadable files are logged and skipped; a missing `dir` yields an
/// empty report.
pub fn aggregate(
    dir: &Path,
    options: &AggregateOptions,
) -> Result<AggregateReport, PersistError> {
    let store = DatasetStore::open(dir);
    let dates = store.list_dates()?;

    let mut by_id: BTreeMap<String, (AggregatedEntity, Vec<f64>)> = BTreeMap::new();
    let mut data_files = 0usize;
    let mut data_points = 0usize;

    for date in dates {
        let dataset = match store.load(date) {
            Ok(Some(dataset)) => dataset,
            Ok(None) => continue,
            Err(e) => {
                warn!(date = %date, error = %e, "Skipping unreadable dataset");
                continue;
            }
        };
        data_files += 1;

        for entity in dataset.entities.values() {
            let record = &entity.record;
            if is_placeholder(&record.name) {
                continue;
            }
            data_points += 1;
            let load = record.load().unwrap_or(0.0);

            let (agg, loads) = by_id.entry(record.id.clone()).or_insert_with(|| {
                (
                    AggregatedEntity {
                        id: record.id.clone(),
                        name: record.name.clone(),
                        author_id: record.author_id.clone(),
                        author_name: record.author_name.clone(),
                        occurrences: 0,
                        avg_load: 0.0,
                        max_load: 0.0,
                        min_load: 0.0,
                        total_load: 0.0,
                        first_seen: entity.first_seen,
                        last_seen: entity.last_seen,
                        orderings: BTreeSet::new(),
                    },
                    Vec::new(),
                )
            });

            agg.name = record.name.clone();
            if record.author_name.is_some() {
                agg.author_name = record.author_name.clone();
            }
            agg.first_seen = agg.first_seen.min(entity.first_seen);
            agg.last_seen = agg.last_seen.max(entity.last_seen);
            agg.orderings.extend(entity.orderings.iter().cloned());
            loads.push(load);
        }
    }

    let unfiltered_entities = by_id.len();
    let mut entities: Vec<AggregatedEntity> = by_id
        .into_values()
        .map(|(mut agg, loads)| {
            agg.occurrences = loads.len();
            agg.total_load = loads.iter().sum();
            agg.avg_load = round2(agg.total_load / loads.len().max(1) as f64);
            agg.max_load = loads.iter().copied().fold(f64::MIN, f64::max);
            agg.min_load = loads.iter().copied().fold(f64::MAX, f64::min);
            agg
        })
        .filter(|agg| agg.occurrences >= options.min_occurrences)
        .collect();

    sort_entities(&mut entities, options.sort_by);
    let global = global_stats(&entities);

    if let Some(top_n) = options.top_n {
        entities.truncate(top_n);
    }

    info!(
        data_files,
        data_points,
        reported = entities.len(),
        "Aggregation complete"
    );

    Ok(AggregateReport {
        generated_at: Utc::now(),
        sort_by: options.sort_by,
        min_occurrences: options.min_occurrences,
        data_files,
        data_points,
        unfiltered_entities,
        global,
        entities,
    })
}

fn sort_entities(entities: &mut [AggregatedEntity], sort_by: SortBy) {
    match sort_by {
        SortBy::AvgLoad => entities.sort_by(|a, b| b.avg_load.total_cmp(&a.avg_load)),
        SortBy::MaxLoad => entities.sort_by(|a, b| b.max_load.total_cmp(&a.max_load)),
        SortBy::Occurrences => entities.sort_by(|a, b| b.occurrences.cmp(&a.occurrences)),
        SortBy::Name => entities.sort_by_key(|e| e.name.to_lowercase()),
    }
}

fn global_stats(entities: &[AggregatedEntity]) -> GlobalStats {
    if entities.is_empty() {
        return GlobalStats::default();
    }

    let count = entities.len() as f64;
    let occurrences = entities.iter().map(|e| e.occurrences);
    let avg_loads = entities.iter().map(|e| e.avg_load);

    GlobalStats {
        total_entities: entities.len(),
        avg_occurrences: round2(occurrences.clone().sum::<usize>() as f64 / count),
        highest_occurrences: occurrences.clone().max().unwrap_or(0),
        lowest_occurrences: occurrences.min().unwrap_or(0),
        avg_avg_load: round2(avg_loads.clone().sum::<f64>() / count),
        highest_avg_load: avg_loads.clone().fold(f64::MIN, f64::max),
        lowest_avg_load: avg_loads.fold(f64::MAX, f64::min),
    }
}
