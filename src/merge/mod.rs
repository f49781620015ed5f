//! Daily dataset merge
//!
//! Folds harvested records into the day's [`DailyDataset`]: placeholder
//! entries are dropped, survivors are upserted by id, and every referenced
//! author not yet looked up for the day gets one companion fetch.

pub mod filter;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::client::PlatformApi;
use crate::harvest::HarvestedRecord;
use crate::metrics;
use crate::models::{CompanionRecord, DailyDataset, StoredEntity};
use crate::utils::error::FetchError;

pub use filter::{is_placeholder, PLACEHOLDER_PATTERNS};

/// Smallest step between two sightings of one entity
const SEEN_TICK: chrono::Duration = chrono::Duration::microseconds(1);

/// Counts from one merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub filtered: usize,
    pub companions_found: usize,
    pub companions_missing: usize,
    pub companion_errors: usize,
}

impl MergeStats {
    pub fn had_errors(&self) -> bool {
        self.companion_errors > 0
    }
}

/// Upsert `records` into `dataset`, returning stats and the author ids referenced
///
/// New ids get `first_seen = now`; known ids have their fields replaced, keep
/// `first_seen`, and get `last_seen = now`. An update always lands strictly
/// after the entity's previous `last_seen`, including a repeat within the
/// same batch. Ordering labels accumulate.
pub fn upsert_records(
    dataset: &mut DailyDataset,
    mut records: Vec<HarvestedRecord>,
    now: DateTime<Utc>,
) -> (MergeStats, Vec<String>) {
    let mut stats = MergeStats {
        filtered: filter::retain_genuine(&mut records, |h| &h.record),
        ..MergeStats::default()
    };

    let mut seen_authors = HashSet::new();
    let mut authors = Vec::new();

    for HarvestedRecord { ordering, record } in records {
        if seen_authors.insert(record.author_id.clone()) {
            authors.push(record.author_id.clone());
        }

        match dataset.entities.get_mut(&record.id) {
            Some(existing) => {
                existing.record = record;
                existing.last_seen = now.max(existing.last_seen + SEEN_TICK);
                existing.orderings.insert(ordering);
                stats.updated += 1;
            }
            None => {
                let id = record.id.clone();
                dataset.entities.insert(
                    id,
                    StoredEntity {
                        record,
                        first_seen: now,
                        last_seen: now,
                        orderings: [ordering].into_iter().collect(),
                    },
                );
                stats.inserted += 1;
            }
        }
    }

    dataset.updated_at = now;
    (stats, authors)
}

/// Author ids with no companion record in the dataset yet
pub fn companions_due(dataset: &DailyDataset, authors: &[String]) -> Vec<String> {
    authors
        .iter()
        .filter(|id| !id.is_empty() && !dataset.companions.contains_key(id.as_str()))
        .cloned()
        .collect()
}

/// Merges harvest output and fetches companion records
pub struct DailyDatasetMerger {
    api: Arc<dyn PlatformApi>,
    companion_delay: Duration,
}

impl DailyDatasetMerger {
    pub fn new(api: Arc<dyn PlatformApi>, companion_delay: Duration) -> Self {
        Self {
            api,
            companion_delay,
        }
    }

    /// Merge `records` into `dataset` and fetch any companions due today
    ///
    /// Companion failures other than 404 are counted and left for the next
    /// run; they never abort the merge.
    pub async fn merge(
        &self,
        dataset: &mut DailyDataset,
        records: Vec<HarvestedRecord>,
        token: &str,
    ) -> MergeStats {
        let (mut stats, authors) = upsert_records(dataset, records, Utc::now());
        info!(
            date = %dataset.date,
            inserted = stats.inserted,
            updated = stats.updated,
            filtered = stats.filtered,
            total = dataset.entities.len(),
            "Records merged"
        );

        let due = companions_due(dataset, &authors);
        if !due.is_empty() {
            info!(count = due.len(), "Fetching companion records");
        }

        for (index, id) in due.iter().enumerate() {
            if index > 0 && !self.companion_delay.is_zero() {
                tokio::time::sleep(self.companion_delay).await;
            }

            match self.api.fetch_companion(token, id).await {
                Ok(data) => {
                    let record = CompanionRecord::found(id.clone(), data, Utc::now());
                    dataset.companions.insert(id.clone(), record);
                    stats.companions_found += 1;
                    metrics::record_companion("found");
                }
                Err(FetchError::NotFound) => {
                    debug!(companion = %id, "Companion not found, storing tombstone");
                    let record = CompanionRecord::missing(id.clone(), Utc::now());
                    dataset.companions.insert(id.clone(), record);
                    stats.companions_missing += 1;
                    metrics::record_companion("missing");
                }
                Err(e) => {
                    warn!(companion = %id, error = %e, "Companion fetch failed");
                    stats.companion_errors += 1;
                    metrics::record_companion("failed");
                }
            }
        }

        dataset.updated_at = Utc::now();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityRecord;
    use chrono::NaiveDate;

    fn harvested(
        ordering: &str,
        id: &str,
        name: &str,
        author: &str,
        occupants: u64,
    ) -> HarvestedRecord {
        HarvestedRecord {
            ordering: ordering.to_string(),
            record: EntityRecord::new(id, name, author).with_field("occupants", occupants),
        }
    }

    fn dataset() -> DailyDataset {
        DailyDataset::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    #[test]
    fn test_duplicate_ids_in_one_batch_keep_last() {
        let mut ds = dataset();
        let records = vec![
            harvested("popularity", "A", "Alpha", "u1", 3),
            harvested("popularity", "B", "Beta", "u2", 1),
            harvested("heat", "A", "Alpha", "u1", 9),
        ];

        let (stats, authors) = upsert_records(&mut ds, records, Utc::now());

        assert_eq!(ds.entities.len(), 2);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.updated, 1);
        let a = &ds.entities["A"];
        assert_eq!(a.record.load(), Some(9.0));
        assert!(a.first_seen < a.last_seen);
        assert_eq!(ds.entities["B"].first_seen, ds.entities["B"].last_seen);
        assert_eq!(a.orderings.len(), 2);
        assert_eq!(authors, vec!["u1".to_string(), "u2".to_string()]);
    }

    #[test]
    fn test_reingest_is_idempotent_apart_from_last_seen() {
        let mut ds = dataset();
        let batch = vec![
            harvested("heat", "A", "Alpha", "u1", 3),
            harvested("heat", "B", "Beta", "u2", 4),
        ];
        let t0 = Utc::now();
        upsert_records(&mut ds, batch.clone(), t0);
        let first = ds.entities.clone();

        let t1 = t0 + chrono::Duration::seconds(60);
        upsert_records(&mut ds, batch, t1);

        assert_eq!(first.len(), ds.entities.len());
        for (id, before) in &first {
            let after = &ds.entities[id];
            assert_eq!(before.record, after.record);
            assert_eq!(before.first_seen, after.first_seen);
            assert_eq!(before.orderings, after.orderings);
            assert_eq!(after.last_seen, t1);
            assert!(after.first_seen < after.last_seen);
        }
    }

    #[test]
    fn test_placeholders_never_stored() {
        let mut ds = dataset();
        let (stats, authors) = upsert_records(
            &mut ds,
            vec![
                harvested("heat", "S", "My Sample World", "u9", 1),
                harvested("heat", "V", "Samplewood Village", "u1", 2),
            ],
            Utc::now(),
        );

        assert_eq!(stats.filtered, 1);
        assert!(!ds.entities.contains_key("S"));
        assert!(ds.entities.contains_key("V"));
        assert_eq!(authors, vec!["u1".to_string()]);
    }

    #[test]
    fn test_companions_due_skips_known() {
        let mut ds = dataset();
        ds.companions
            .insert("u1".into(), CompanionRecord::missing("u1", Utc::now()));

        let due = companions_due(&ds, &["u1".into(), "u2".into(), String::new()]);
        assert_eq!(due, vec!["u2".to_string()]);
    }
}
