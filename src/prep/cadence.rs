//! Period cadence checks.
//!
//! A series is ordered by date, then walked pairwise using the period index of
//! its cadence. Two records in one period are rejected; a run of missing
//! periods longer than the tolerance excludes the series; shorter gaps are
//! either kept as-is or filled with zero-revenue records.

use crate::domain::{GapPolicy, RevenueRecord, TimeSeries};
use crate::prep::SeriesExclusion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadenceConfig {
    /// Largest tolerated run of missing periods between two records.
    pub max_gap: u32,
    pub policy: GapPolicy,
}

/// Outcome of a cadence pass over one series.
#[derive(Debug, Clone, PartialEq)]
pub struct CadenceReport {
    pub series: TimeSeries,
    /// Total missing periods found (all within tolerance).
    pub missing_periods: u32,
    /// Records inserted by `GapPolicy::FillZero`.
    pub filled: usize,
}

pub fn enforce_cadence(mut series: TimeSeries, config: CadenceConfig) -> Result<CadenceReport, SeriesExclusion> {
    let period = series.key.period_type;
    series.records.sort_by_key(|r| r.start_date);

    let mut out: Vec<RevenueRecord> = Vec::with_capacity(series.records.len());
    let mut missing_periods = 0u32;
    let mut filled = 0usize;

    for record in series.records {
        if let Some(prev) = out.last() {
            let step = period.index(record.start_date) - period.index(prev.start_date);
            if step == 0 {
                return Err(SeriesExclusion::DuplicatePeriod {
                    first: prev.start_date,
                    second: record.start_date,
                });
            }
            let missing = u32::try_from(step - 1).unwrap_or(u32::MAX);
            if missing > config.max_gap {
                return Err(SeriesExclusion::CadenceGap {
                    after: prev.start_date,
                    missing,
                    tolerance: config.max_gap,
                });
            }
            missing_periods += missing;

            if config.policy == GapPolicy::FillZero {
                let anchor = prev.clone();
                for k in 1..=missing {
                    let start_date = period
                        .step(anchor.start_date, k)
                        .ok_or(SeriesExclusion::DateOverflow { after: anchor.start_date })?;
                    out.push(RevenueRecord {
                        start_date,
                        revenue: 0.0,
                        ..anchor.clone()
                    });
                    filled += 1;
                }
            }
        }
        out.push(record);
    }

    Ok(CadenceReport {
        series: TimeSeries {
            key: series.key,
            records: out,
        },
        missing_periods,
        filled,
    })
}
