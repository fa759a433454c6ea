//! AutoML job definition and naming.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::domain::{AlgorithmSelection, PeriodType, Quantile};
use crate::error::AppError;

/// Longest job name the service accepts.
pub const MAX_JOB_NAME_LEN: usize = 32;

const JOB_PREFIX: &str = "rf";

/// Everything needed to submit one time-series forecasting job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub job_name: String,
    /// `s3://` URI of the uploaded training CSV.
    pub input_uri: String,
    pub output_uri: String,
    pub role_arn: String,
    pub target_attribute: String,
    pub timestamp_attribute: String,
    pub item_attribute: String,
    pub period_type: PeriodType,
    pub horizon: usize,
    pub quantiles: Vec<Quantile>,
    pub algorithms: AlgorithmSelection,
    pub max_runtime: Duration,
}

impl JobSpec {
    pub fn from_settings(
        settings: &Settings,
        job_name: String,
        input_uri: String,
        period_type: PeriodType,
    ) -> Result<Self, AppError> {
        if settings.execution_role.is_empty() {
            return Err(AppError::config(
                "SAGEMAKER_EXECUTION_ROLE must be set to submit a training job",
            ));
        }
        Ok(Self {
            job_name,
            input_uri,
            output_uri: settings.output_uri(),
            role_arn: settings.execution_role.clone(),
            target_attribute: settings.target_attribute.clone(),
            timestamp_attribute: settings.timestamp_attribute.clone(),
            item_attribute: settings.item_attribute.clone(),
            period_type,
            horizon: settings.horizon,
            quantiles: settings.quantiles.clone(),
            algorithms: settings.algorithms.clone(),
            max_runtime: settings.max_job_runtime,
        })
    }
}

/// `rf-<suffix>-<yymmddHHMMSS>`, at most 32 characters of `[A-Za-z0-9-]`.
pub fn job_name(suffix: Option<&str>, now: DateTime<Utc>) -> String {
    let stamp = now.format("%y%m%d%H%M%S").to_string();
    let budget = MAX_JOB_NAME_LEN - JOB_PREFIX.len() - stamp.len() - 2;

    let mut cleaned = String::new();
    for c in suffix.unwrap_or_default().chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '-' };
        if !(c == '-' && cleaned.ends_with('-')) {
            cleaned.push(c);
        }
    }
    let cleaned: String = cleaned.trim_matches('-').chars().take(budget).collect();
    let cleaned = cleaned.trim_end_matches('-');

    if cleaned.is_empty() {
        format!("{JOB_PREFIX}-{stamp}")
    } else {
        format!("{JOB_PREFIX}-{cleaned}-{stamp}")
    }
}

/// Cadence encoded in a combined training file name such as `train_WEEK.csv`.
pub fn infer_period_type(path: &Path) -> Option<PeriodType> {
    let stem = path.file_stem()?.to_str()?;
    let (_, tail) = stem.rsplit_once('_')?;
    tail.parse().ok()
}
