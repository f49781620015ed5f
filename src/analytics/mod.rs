//! Derived views over daily datasets
//!
//! Everything here is read-only: a per-day summary, an analytics view with
//! companions nested under their entities, and the cross-run aggregate in
//! [`aggregate`]. The placeholder filter is applied again before anything is
//! derived.

pub mod aggregate;

pub use aggregate::{aggregate, AggregateOptions, AggregateReport, AggregatedEntity, SortBy};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::merge::is_placeholder;
use crate::models::{CompanionRecord, DailyDataset, EntityRecord, StoredEntity};

/// Round to two decimal places
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Load summary for one day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStats {
    pub total_entities: usize,
    pub avg_load: f64,
    pub max_load: f64,
    pub min_load: f64,
    pub total_load: f64,
    /// Entities whose load signal is above zero
    pub entities_with_load: usize,
}

/// Compute [`DayStats`]; entities without a load signal count as zero
pub fn day_stats<'a>(entities: impl IntoIterator<Item = &'a EntityRecord>) -> DayStats {
    let loads: Vec<f64> = entities
        .into_iter()
        .map(|record| record.load().unwrap_or(0.0))
        .collect();

    if loads.is_empty() {
        return DayStats::default();
    }

    let total_load: f64 = loads.iter().sum();
    DayStats {
        total_entities: loads.len(),
        avg_load: round2(total_load / loads.len() as f64),
        max_load: loads.iter().copied().fold(f64::MIN, f64::max),
        min_load: loads.iter().copied().fold(f64::MAX, f64::min),
        total_load,
        entities_with_load: loads.iter().filter(|load| **load > 0.0).count(),
    }
}

/// An entity with its author's companion record nested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEntity {
    #[serde(flatten)]
    pub entity: StoredEntity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<CompanionRecord>,
}

/// Report-ready view of one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsView {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub entities: Vec<AnalyticsEntity>,
    pub day_stats: DayStats,
}

/// Build the analytics view of a dataset
pub fn analytics_view(dataset: &DailyDataset) -> AnalyticsView {
    let entities: Vec<AnalyticsEntity> = dataset
        .entities
        .values()
        .filter(|entity| !is_placeholder(&entity.record.name))
        .map(|entity| AnalyticsEntity {
            entity: entity.clone(),
            author: dataset
                .companions
                .get(&entity.record.author_id)
                .filter(|companion| !companion.is_missing())
                .cloned(),
        })
        .collect();

    let day_stats = day_stats(entities.iter().map(|e| &e.entity.record));

    AnalyticsView {
        date: dataset.date,
        generated_at: Utc::now(),
        entities,
        day_stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use std::collections::BTreeSet;

    fn stored(id: &str, name: &str, author: &str, occupants: Option<u64>) -> StoredEntity {
        let mut record = EntityRecord::new(id, name, author);
        if let Some(occupants) = occupants {
            record = record.with_field("occupants", occupants);
        }
        StoredEntity {
            record,
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            orderings: BTreeSet::new(),
        }
    }

    #[test]
    fn test_day_stats_empty() {
        assert_eq!(day_stats(std::iter::empty()), DayStats::default());
    }

    #[test]
    fn test_day_stats_values() {
        let records = vec![
            EntityRecord::new("a", "A", "u").with_field("occupants", 10),
            EntityRecord::new("b", "B", "u").with_field("heat", 5),
            EntityRecord::new("c", "C", "u"),
        ];
        let stats = day_stats(&records);

        assert_eq!(stats.total_entities, 3);
        assert_eq!(stats.total_load, 15.0);
        assert_eq!(stats.avg_load, 5.0);
        assert_eq!(stats.max_load, 10.0);
        assert_eq!(stats.min_load, 0.0);
        assert_eq!(stats.entities_with_load, 2);
    }

    #[test]
    fn test_avg_rounds_to_two_places() {
        let records = vec![
            EntityRecord::new("a", "A", "u").with_field("occupants", 1),
            EntityRecord::new("b", "B", "u").with_field("occupants", 1),
            EntityRecord::new("c", "C", "u").with_field("occupants", 0),
        ];
        assert_eq!(day_stats(&records).avg_load, 0.67);
    }

    #[test]
    fn test_analytics_view_nests_author_and_filters() {
        let mut dataset = DailyDataset::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        dataset
            .entities
            .insert("a".into(), stored("a", "Cafe", "u1", Some(4)));
        dataset
            .entities
            .insert("b".into(), stored("b", "Test World 2", "u1", Some(9)));
        dataset
            .entities
            .insert("c".into(), stored("c", "Bar", "u2", None));

        let mut data = Map::new();
        data.insert("displayName".into(), json!("Maker"));
        dataset
            .companions
            .insert("u1".into(), CompanionRecord::found("u1", data, Utc::now()));
        dataset
            .companions
            .insert("u2".into(), CompanionRecord::missing("u2", Utc::now()));

        let view = analytics_view(&dataset);
        assert_eq!(view.entities.len(), 2);
        assert_eq!(view.day_stats.total_entities, 2);

        let cafe = view.entities.iter().find(|e| e.entity.record.id == "a").unwrap();
        assert_eq!(
            cafe.author.as_ref().and_then(|a| a.display_name()),
            Some("Maker")
        );

        let bar = view.entities.iter().find(|e| e.entity.record.id == "c").unwrap();
        assert!(bar.author.is_none());

        let value = serde_json::to_value(&view).unwrap();
        assert!(value.get("dayStats").is_some());
        assert!(value["entities"][0].get("author").is_some());
    }
}
