//! Run settings.
//!
//! `Settings::load` is the only place configuration is read from the process
//! environment (after an optional `.env` file). Everything downstream receives
//! the resulting struct explicitly; CLI flags may override individual fields
//! before a stage starts.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{
    AlgorithmSelection, GapPolicy, Quantile, RowErrorPolicy, parse_quantile_list, parse_value_enum,
};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub region: String,
    pub bucket: String,
    pub prefix: String,
    pub execution_role: String,
    pub endpoint_name: String,

    pub horizon: usize,
    pub quantiles: Vec<Quantile>,
    pub algorithms: AlgorithmSelection,
    pub max_job_runtime: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,

    pub target_attribute: String,
    pub timestamp_attribute: String,
    pub item_attribute: String,

    pub raw_data_path: PathBuf,
    pub split_dir: PathBuf,
    pub model_ref_path: PathBuf,

    pub min_train_length: usize,
    pub max_gap: u32,
    pub gap_policy: GapPolicy,
    pub row_error_policy: RowErrorPolicy,

    /// Base URL overrides, e.g. for a local AWS emulator.
    pub sagemaker_api_url: Option<String>,
    pub sagemaker_runtime_url: Option<String>,
    pub s3_endpoint_url: Option<String>,
}

impl Settings {
    /// Load `.env` (or `env_file` when given) and build settings from the environment.
    pub fn load(env_file: Option<&Path>) -> Result<Self, AppError> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path)
                    .map_err(|e| AppError::config(format!("failed to load env file '{}': {e}", path.display())))?;
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let max_job_runtime = Duration::from_secs(parsed(&get, "MAX_AUTOML_JOB_RUNTIME", 1800u64)?);

        let settings = Settings {
            region: text("AWS_REGION", "eu-west-1"),
            bucket: text("S3_BUCKET", "prediction-test-bucket-01"),
            prefix: text("S3_PREFIX", "").trim_matches('/').to_string(),
            execution_role: text("SAGEMAKER_EXECUTION_ROLE", ""),
            endpoint_name: text("SAGEMAKER_ENDPOINT_NAME", "canvas-prediction-test-model"),

            horizon: parsed(&get, "PREDICTION_LENGTH", 4usize)?,
            quantiles: with(&get, "FORECAST_QUANTILES", "p10,p50,p90", parse_quantile_list)?,
            algorithms: with(
                &get,
                "AUTOML_ALGORITHMS",
                "cnn-qr,deepar,prophet,npts,arima,ets",
                AlgorithmSelection::from_str,
            )?,
            max_job_runtime,
            poll_interval: Duration::from_secs(parsed(&get, "POLL_INTERVAL_SECS", 180u64)?),
            poll_timeout: Duration::from_secs(parsed(&get, "POLL_TIMEOUT_SECS", 3600u64)?),

            target_attribute: text("TARGET_ATTRIBUTE", "revenue"),
            timestamp_attribute: text("TIMESTAMP_ATTRIBUTE", "start_date"),
            item_attribute: text("ITEM_ATTRIBUTE", "partner_id"),

            raw_data_path: PathBuf::from(text("RAW_DATA_PATH", "data/raw/raw_data.csv")),
            split_dir: PathBuf::from(text("SPLIT_DATA_DIR", "data/split_data")),
            model_ref_path: PathBuf::from(text("MODEL_REF_PATH", "training_summary.json")),

            min_train_length: parsed(&get, "MIN_TRAIN_LENGTH", 4usize)?,
            max_gap: parsed(&get, "MAX_GAP_PERIODS", 0u32)?,
            gap_policy: with(&get, "GAP_POLICY", "pass-through", parse_value_enum::<GapPolicy>)?,
            row_error_policy: with(&get, "ROW_ERROR_POLICY", "skip", parse_value_enum::<RowErrorPolicy>)?,

            sagemaker_api_url: get("SAGEMAKER_API_URL"),
            sagemaker_runtime_url: get("SAGEMAKER_RUNTIME_URL"),
            s3_endpoint_url: get("S3_ENDPOINT_URL"),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints. Called again after CLI overrides.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.horizon == 0 {
            return Err(AppError::config("PREDICTION_LENGTH (horizon) must be >= 1"));
        }
        if self.min_train_length == 0 {
            return Err(AppError::config("MIN_TRAIN_LENGTH must be >= 1"));
        }
        if self.quantiles.is_empty() {
            return Err(AppError::config("FORECAST_QUANTILES must not be empty"));
        }
        if self.poll_interval < Duration::from_secs(1) {
            return Err(AppError::config("POLL_INTERVAL_SECS must be >= 1"));
        }
        if self.region.is_empty() || self.bucket.is_empty() {
            return Err(AppError::config("AWS_REGION and S3_BUCKET must be set"));
        }
        Ok(())
    }

    /// Object key under the bucket for a training data file.
    pub fn data_key(&self, file_name: &str) -> String {
        self.prefixed(&format!("data/{file_name}"))
    }

    pub fn data_uri(&self, file_name: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.data_key(file_name))
    }

    /// Output location for AutoML artifacts.
    pub fn output_uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefixed("artifact"))
    }

    fn prefixed(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{path}", self.prefix)
        }
    }
}

fn parsed<T, G>(get: &G, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| AppError::config(format!("invalid {key}='{raw}': {e}"))),
    }
}

fn with<T, G, P>(get: &G, key: &str, default: &str, parse: P) -> Result<T, AppError>
where
    G: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Result<T, String>,
{
    let raw = get(key).unwrap_or_else(|| default.to_string());
    parse(&raw).map_err(|e| AppError::config(format!("invalid {key}='{raw}': {e}")))
}
