//! Shared domain types.
//!
//! These types are kept small and serializable so they can be:
//!
//! - validated once at ingest and passed around read-only
//! - written to the processed CSVs, the manifest and the training summary
//! - reloaded by the predictor

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Reporting cadence of a revenue series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeriodType {
    Month,
    Week,
}

impl PeriodType {
    pub fn as_str(self) -> &'static str {
        match self {
            PeriodType::Month => "MONTH",
            PeriodType::Week => "WEEK",
        }
    }

    /// Forecast frequency understood by the AutoML service.
    pub fn forecast_frequency(self) -> &'static str {
        match self {
            PeriodType::Month => "1M",
            PeriodType::Week => "1W",
        }
    }

    /// Ordinal of the period containing `date`.
    ///
    /// Months are calendar months; weeks are Monday-aligned. Consecutive periods
    /// differ by exactly one, which is what cadence checks rely on.
    pub fn index(self, date: NaiveDate) -> i64 {
        match self {
            PeriodType::Month => i64::from(date.year()) * 12 + i64::from(date.month0()),
            PeriodType::Week => (i64::from(date.num_days_from_ce()) - 1).div_euclid(7),
        }
    }

    /// Date `steps` periods after `date`, keeping the same anchor day where possible.
    pub fn step(self, date: NaiveDate, steps: u32) -> Option<NaiveDate> {
        match self {
            PeriodType::Month => date.checked_add_months(Months::new(steps)),
            PeriodType::Week => date.checked_add_signed(chrono::Duration::weeks(i64::from(steps))),
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MONTH" => Ok(PeriodType::Month),
            "WEEK" => Ok(PeriodType::Week),
            other => Err(format!("unknown period type '{other}' (expected MONTH or WEEK)")),
        }
    }
}

/// One validated revenue observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueRecord {
    pub partner_id: String,
    pub start_date: NaiveDate,
    pub revenue: f64,
    pub period_type: PeriodType,
    pub report_type: String,
}

/// Grouping key for a time series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub partner_id: String,
    pub period_type: PeriodType,
}

impl SeriesKey {
    pub fn new(partner_id: impl Into<String>, period_type: PeriodType) -> Self {
        Self {
            partner_id: partner_id.into(),
            period_type,
        }
    }

    /// File stem used for per-series outputs, e.g. `ACC-1_MONTH`.
    ///
    /// Ids that need path cleanup carry a short hash of the raw id, so `A/B`
    /// and `A_B` never share a file.
    pub fn file_stem(&self) -> String {
        let partner: String = self
            .partner_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if partner == self.partner_id {
            format!("{partner}_{}", self.period_type)
        } else {
            format!("{partner}-{}_{}", self.id_hash(), self.period_type)
        }
    }

    /// First 8 hex digits of the SHA-256 of the raw partner id.
    pub fn id_hash(&self) -> String {
        let digest = Sha256::digest(self.partner_id.as_bytes());
        hex::encode(&digest[..4])
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partner_id, self.period_type)
    }
}

/// Records of one series, ascending by `start_date`, at most one per period.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub key: SeriesKey,
    pub records: Vec<RevenueRecord>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.records.iter().map(|r| r.start_date).collect()
    }
}

/// Train window plus the held-out test window of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: TimeSeries,
    pub test: TimeSeries,
}

/// A forecast probability level in `(0, 1)`.
///
/// Stored in units of 0.0001 so set membership is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantile(u16);

impl Quantile {
    const SCALE: f64 = 10_000.0;

    pub fn new(value: f64) -> Result<Self, String> {
        if !value.is_finite() || value <= 0.0 || value >= 1.0 {
            return Err(format!("quantile {value} must be strictly between 0 and 1"));
        }
        let scaled = value * Self::SCALE;
        let units = scaled.round();
        if (scaled - units).abs() > 1e-6 || units < 1.0 {
            return Err(format!("quantile {value} has more than 4 decimal places"));
        }
        Ok(Quantile(units as u16))
    }

    pub fn value(self) -> f64 {
        f64::from(self.0) / Self::SCALE
    }

    /// Label used by the AutoML service, e.g. `p10` or `p2.5`.
    pub fn label(self) -> String {
        let percent = f64::from(self.0) / 100.0;
        format!("p{percent}")
    }
}

impl fmt::Display for Quantile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl FromStr for Quantile {
    type Err = String;

    /// Accepts `0.9` or the service form `p90`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(percent) = s.strip_prefix('p').or_else(|| s.strip_prefix('P')) {
            let p: f64 = percent
                .parse()
                .map_err(|_| format!("invalid quantile label '{s}'"))?;
            return Quantile::new(p / 100.0);
        }
        let v: f64 = s.parse().map_err(|_| format!("invalid quantile '{s}'"))?;
        Quantile::new(v)
    }
}

impl Serialize for Quantile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.value())
    }
}

impl<'de> Deserialize<'de> for Quantile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = f64::deserialize(deserializer)?;
        Quantile::new(v).map_err(serde::de::Error::custom)
    }
}

/// Parse a comma-separated quantile list, sorted and de-duplicated.
pub fn parse_quantile_list(s: &str) -> Result<Vec<Quantile>, String> {
    let mut out = s
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(Quantile::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    out.sort();
    out.dedup();
    if out.is_empty() {
        return Err("quantile list is empty".to_string());
    }
    Ok(out)
}

/// Candidate forecasting algorithms offered by the AutoML service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    CnnQr,
    Deepar,
    Prophet,
    Npts,
    Arima,
    Ets,
}

impl Algorithm {
    pub const ALL: [Algorithm; 6] = [
        Algorithm::CnnQr,
        Algorithm::Deepar,
        Algorithm::Prophet,
        Algorithm::Npts,
        Algorithm::Arima,
        Algorithm::Ets,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::CnnQr => "cnn-qr",
            Algorithm::Deepar => "deepar",
            Algorithm::Prophet => "prophet",
            Algorithm::Npts => "npts",
            Algorithm::Arima => "arima",
            Algorithm::Ets => "ets",
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Algorithm::ALL
            .into_iter()
            .find(|a| a.as_str() == needle)
            .ok_or_else(|| format!("unknown algorithm '{s}'"))
    }
}

/// Which candidates the AutoML job may try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlgorithmSelection {
    /// Let the service choose.
    Auto,
    /// Explicit non-empty subset.
    Only(Vec<Algorithm>),
}

impl FromStr for AlgorithmSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(AlgorithmSelection::Auto);
        }
        let mut algos = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<Algorithm>())
            .collect::<Result<Vec<_>, _>>()?;
        algos.sort();
        algos.dedup();
        if algos.is_empty() {
            return Err("algorithm list is empty (use `auto` to let the service choose)".to_string());
        }
        Ok(AlgorithmSelection::Only(algos))
    }
}

/// How gaps within the tolerated size are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum GapPolicy {
    /// Keep the series unchanged.
    PassThrough,
    /// Insert zero-revenue records for each missing period.
    FillZero,
}

/// What to do with a row that fails schema validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RowErrorPolicy {
    /// Log it, record it in the manifest and keep going.
    Skip,
    /// Fail the stage on the first bad row.
    Abort,
}

/// Parse a lowercase clap value-enum from an environment string.
pub fn parse_value_enum<T: ValueEnum>(s: &str) -> Result<T, String> {
    T::from_str(s.trim(), true)
}

/// Inference request for one partner series.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRequest {
    pub partner_id: String,
    pub period_type: PeriodType,
    pub horizon: usize,
    pub quantiles: Vec<Quantile>,
}

/// One predicted value for one quantile at one future timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub partner_id: String,
    pub timestamp: NaiveDate,
    pub quantile: Quantile,
    pub value: f64,
}

/// Best candidate reported by a completed AutoML job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub metric_name: Option<String>,
    pub metric_value: Option<f64>,
}

/// Reference to a trained model and the endpoint that serves it.
///
/// Written by `rf train` as the training summary and read by `rf predict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRef {
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub candidate: Option<Candidate>,
    pub endpoint_name: String,
    pub period_type: PeriodType,
    pub horizon: usize,
    pub quantiles: Vec<Quantile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn period_index_is_contiguous() {
        assert_eq!(
            PeriodType::Month.index(d(2024, 1, 15)) + 1,
            PeriodType::Month.index(d(2024, 2, 1))
        );
        assert_eq!(
            PeriodType::Month.index(d(2023, 12, 1)) + 1,
            PeriodType::Month.index(d(2024, 1, 1))
        );
        // 2024-01-01 is a Monday.
        assert_eq!(
            PeriodType::Week.index(d(2024, 1, 1)),
            PeriodType::Week.index(d(2024, 1, 7))
        );
        assert_eq!(
            PeriodType::Week.index(d(2024, 1, 7)) + 1,
            PeriodType::Week.index(d(2024, 1, 8))
        );
    }

    #[test]
    fn month_step_clamps_to_month_end() {
        assert_eq!(PeriodType::Month.step(d(2024, 1, 31), 1), Some(d(2024, 2, 29)));
        assert_eq!(PeriodType::Week.step(d(2024, 1, 1), 2), Some(d(2024, 1, 15)));
    }

    #[test]
    fn quantile_parses_both_forms() {
        let a: Quantile = "0.1".parse().unwrap();
        let b: Quantile = "p10".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.label(), "p10");
        assert_eq!("0.025".parse::<Quantile>().unwrap().label(), "p2.5");
        assert!("1.0".parse::<Quantile>().is_err());
        assert!("0".parse::<Quantile>().is_err());
        assert!("0.12345".parse::<Quantile>().is_err());
    }

    #[test]
    fn quantile_list_sorted_and_deduped() {
        let qs = parse_quantile_list("p90, 0.1,0.5,p10").unwrap();
        let labels: Vec<String> = qs.iter().map(|q| q.label()).collect();
        assert_eq!(labels, ["p10", "p50", "p90"]);
    }

    #[test]
    fn algorithm_selection_parses() {
        assert_eq!("AUTO".parse::<AlgorithmSelection>().unwrap(), AlgorithmSelection::Auto);
        assert_eq!(
            "ets, cnn-qr".parse::<AlgorithmSelection>().unwrap(),
            AlgorithmSelection::Only(vec![Algorithm::CnnQr, Algorithm::Ets])
        );
        assert!("xgboost".parse::<AlgorithmSelection>().is_err());
        assert!("".parse::<AlgorithmSelection>().is_err());
    }

    #[test]
    fn file_stem_is_path_safe() {
        let key = SeriesKey::new("ACC/00 1", PeriodType::Week);
        let stem = key.file_stem();
        assert_eq!(stem, format!("ACC_00_1-{}_WEEK", key.id_hash()));
        assert_eq!(key.id_hash().len(), 8);

        assert_eq!(SeriesKey::new("ACC-1.a_b", PeriodType::Month).file_stem(), "ACC-1.a_b_MONTH");
    }

    #[test]
    fn cleaned_ids_do_not_share_a_stem() {
        let slash = SeriesKey::new("A/B", PeriodType::Month);
        let underscore = SeriesKey::new("A_B", PeriodType::Month);
        assert_eq!(underscore.file_stem(), "A_B_MONTH");
        assert_ne!(slash.file_stem(), underscore.file_stem());
        assert!(slash.file_stem().starts_with("A_B-"));
    }

    #[test]
    fn value_enums_parse_from_env_strings() {
        assert_eq!(parse_value_enum::<GapPolicy>("fill-zero").unwrap(), GapPolicy::FillZero);
        assert_eq!(parse_value_enum::<RowErrorPolicy>("ABORT").unwrap(), RowErrorPolicy::Abort);
        assert!(parse_value_enum::<GapPolicy>("interpolate").is_err());
    }
}
