//! Series preparation: grouping, cadence checks and the rolling split.
//!
//! Series are independent, so preparation runs in parallel. Results come back
//! in key order and are written by a single caller.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use thiserror::Error;

use crate::domain::{RevenueRecord, SeriesKey, Split, TimeSeries};

pub mod cadence;
pub mod split;

pub use cadence::{CadenceConfig, CadenceReport, enforce_cadence};
pub use split::{SplitConfig, rolling_split};

/// Why a series was left out of the processed output.
///
/// These are recorded per series and never abort the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesExclusion {
    #[error("insufficient history ({len} < {required})")]
    InsufficientHistory { len: usize, required: usize },

    #[error("cadence gap of {missing} missing periods after {after} exceeds tolerance {tolerance}")]
    CadenceGap {
        after: NaiveDate,
        missing: u32,
        tolerance: u32,
    },

    #[error("duplicate period: {first} and {second} fall in the same period")]
    DuplicatePeriod { first: NaiveDate, second: NaiveDate },

    #[error("date overflow while filling gap after {after}")]
    DateOverflow { after: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareConfig {
    pub cadence: CadenceConfig,
    pub split: SplitConfig,
}

/// Result of preparing one series.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesOutcome {
    Included {
        split: Split,
        missing_periods: u32,
        filled: usize,
    },
    Excluded {
        key: SeriesKey,
        len: usize,
        reason: SeriesExclusion,
    },
}

impl SeriesOutcome {
    pub fn key(&self) -> &SeriesKey {
        match self {
            SeriesOutcome::Included { split, .. } => &split.train.key,
            SeriesOutcome::Excluded { key, .. } => key,
        }
    }
}

/// Partition records by `(partner_id, period_type)`, keys in ascending order.
pub fn group_records(records: Vec<RevenueRecord>) -> Vec<TimeSeries> {
    let mut groups: BTreeMap<SeriesKey, Vec<RevenueRecord>> = BTreeMap::new();
    for record in records {
        let key = SeriesKey::new(record.partner_id.clone(), record.period_type);
        groups.entry(key).or_default().push(record);
    }
    groups
        .into_iter()
        .map(|(key, records)| TimeSeries { key, records })
        .collect()
}

/// Cadence check then split for one series.
pub fn prepare_series(series: TimeSeries, config: PrepareConfig) -> SeriesOutcome {
    let key = series.key.clone();
    let len = series.len();

    let report = match enforce_cadence(series, config.cadence) {
        Ok(report) => report,
        Err(reason) => return SeriesOutcome::Excluded { key, len, reason },
    };
    let len = report.series.len();

    match rolling_split(report.series, config.split) {
        Ok(split) => SeriesOutcome::Included {
            split,
            missing_periods: report.missing_periods,
            filled: report.filled,
        },
        Err(reason) => SeriesOutcome::Excluded { key, len, reason },
    }
}

/// Prepare every series in parallel; output order follows the input order.
pub fn prepare_all(series: Vec<TimeSeries>, config: PrepareConfig) -> Vec<SeriesOutcome> {
    series
        .into_par_iter()
        .map(|s| prepare_series(s, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GapPolicy, PeriodType};

    fn record(partner: &str, period: PeriodType, y: i32, m: u32, d: u32) -> RevenueRecord {
        RevenueRecord {
            partner_id: partner.to_string(),
            start_date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            revenue: 1.0,
            period_type: period,
            report_type: "R".to_string(),
        }
    }

    const CONFIG: PrepareConfig = PrepareConfig {
        cadence: CadenceConfig {
            max_gap: 0,
            policy: GapPolicy::PassThrough,
        },
        split: SplitConfig {
            horizon: 1,
            min_train_length: 1,
        },
    };

    #[test]
    fn grouping_is_by_partner_and_period_in_key_order() {
        let groups = group_records(vec![
            record("B", PeriodType::Month, 2024, 1, 1),
            record("A", PeriodType::Week, 2024, 1, 1),
            record("A", PeriodType::Month, 2024, 1, 1),
            record("A", PeriodType::Month, 2024, 2, 1),
        ]);
        let keys: Vec<String> = groups.iter().map(|g| g.key.to_string()).collect();
        assert_eq!(keys, ["A/MONTH", "A/WEEK", "B/MONTH"]);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn one_bad_series_does_not_affect_others() {
        let groups = group_records(vec![
            record("A", PeriodType::Month, 2024, 1, 1),
            record("A", PeriodType::Month, 2024, 2, 1),
            record("B", PeriodType::Month, 2024, 1, 1),
            record("B", PeriodType::Month, 2024, 6, 1),
            record("C", PeriodType::Month, 2024, 1, 1),
        ]);
        let outcomes = prepare_all(groups, CONFIG);
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], SeriesOutcome::Included { .. }));
        assert!(matches!(
            outcomes[1],
            SeriesOutcome::Excluded {
                reason: SeriesExclusion::CadenceGap { .. },
                ..
            }
        ));
        assert!(matches!(
            outcomes[2],
            SeriesOutcome::Excluded {
                reason: SeriesExclusion::InsufficientHistory { len: 1, required: 2 },
                ..
            }
        ));
        assert_eq!(outcomes[2].key().partner_id, "C");
    }

    #[test]
    fn filled_records_count_towards_history() {
        let config = PrepareConfig {
            cadence: CadenceConfig {
                max_gap: 1,
                policy: GapPolicy::FillZero,
            },
            split: SplitConfig {
                horizon: 1,
                min_train_length: 2,
            },
        };
        let groups = group_records(vec![
            record("A", PeriodType::Month, 2024, 1, 1),
            record("A", PeriodType::Month, 2024, 3, 1),
        ]);
        match prepare_series(groups.into_iter().next().unwrap(), config) {
            SeriesOutcome::Included { split, filled, .. } => {
                assert_eq!(filled, 1);
                assert_eq!(split.train.len(), 2);
                assert_eq!(split.train.records[1].revenue, 0.0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
