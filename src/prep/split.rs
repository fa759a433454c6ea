//! Rolling train/test split.

use crate::domain::{Split, TimeSeries};
use crate::prep::SeriesExclusion;

/// Window sizes for the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitConfig {
    /// Most recent periods held out as the test window.
    pub horizon: usize,
    /// Minimum number of periods left for training.
    pub min_train_length: usize,
}

impl SplitConfig {
    pub fn required_len(&self) -> usize {
        self.min_train_length + self.horizon
    }
}

/// Hold out the last `horizon` records of an ordered series.
///
/// The series is eligible only when `len >= min_train_length + horizon`.
pub fn rolling_split(series: TimeSeries, config: SplitConfig) -> Result<Split, SeriesExclusion> {
    let n = series.len();
    let required = config.required_len();
    if n < required {
        return Err(SeriesExclusion::InsufficientHistory { len: n, required });
    }

    let TimeSeries { key, mut records } = series;
    let test_records = records.split_off(n - config.horizon);

    Ok(Split {
        train: TimeSeries {
            key: key.clone(),
            records,
        },
        test: TimeSeries {
            key,
            records: test_records,
        },
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::domain::{PeriodType, RevenueRecord, SeriesKey};

    fn monthly(partner: &str, n: usize) -> TimeSeries {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let records = (0..n)
            .map(|i| RevenueRecord {
                partner_id: partner.to_string(),
                start_date: PeriodType::Month.step(start, i as u32).unwrap(),
                revenue: 100.0 + i as f64,
                period_type: PeriodType::Month,
                report_type: "RevenueShare".to_string(),
            })
            .collect();
        TimeSeries {
            key: SeriesKey::new(partner, PeriodType::Month),
            records,
        }
    }

    #[test]
    fn fourteen_months_keeps_last_three_for_test() {
        let series = monthly("P1", 14);
        let dates = series.dates();
        let split = rolling_split(series, SplitConfig { horizon: 3, min_train_length: 6 }).unwrap();
        assert_eq!(split.train.len(), 11);
        assert_eq!(split.test.dates(), dates[11..].to_vec());
        assert_eq!(split.test.key, split.train.key);
    }

    #[test]
    fn five_months_is_insufficient_history() {
        let err = rolling_split(monthly("P2", 5), SplitConfig { horizon: 3, min_train_length: 6 }).unwrap_err();
        assert_eq!(err, SeriesExclusion::InsufficientHistory { len: 5, required: 9 });
        assert!(err.to_string().starts_with("insufficient history"));
    }

    #[test]
    fn split_iff_long_enough_and_lossless() {
        for horizon in 1..=4 {
            for min_train_length in 1..=4 {
                let config = SplitConfig { horizon, min_train_length };
                for n in 0..15 {
                    let series = monthly("P", n);
                    let original = series.records.clone();
                    match rolling_split(series, config) {
                        Ok(split) => {
                            assert!(n >= min_train_length + horizon);
                            assert_eq!(split.test.len(), horizon);
                            assert_eq!(split.train.len(), n - horizon);
                            let mut joined = split.train.records;
                            joined.extend(split.test.records);
                            assert_eq!(joined, original);
                        }
                        Err(_) => assert!(n < min_train_length + horizon),
                    }
                }
            }
        }
    }
}
