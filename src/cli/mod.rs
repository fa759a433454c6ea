//! Command-line parsing for the revenue forecasting pipeline.
//!
//! Argument parsing and command dispatch stay separate from the pipeline code.
//! Every flag is optional and overrides the matching setting from the
//! environment (see `config::Settings`).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{AlgorithmSelection, GapPolicy, PeriodType, Quantile, RowErrorPolicy, parse_quantile_list};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "rf", version, about = "Partner revenue forecasting on SageMaker Autopilot")]
pub struct Cli {
    /// Load settings from this env file instead of `./.env`.
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate raw revenue data, split every series and write the training datasets.
    Preprocess(PreprocessArgs),
    /// Upload a training dataset, run an AutoML job and record the trained model.
    Train(TrainArgs),
    /// Show the status of an AutoML job, optionally waiting for it to finish.
    Status(StatusArgs),
    /// Forecast revenue for one partner from a deployed endpoint.
    Predict(PredictArgs),
}

#[derive(Debug, Args, Clone)]
pub struct PreprocessArgs {
    /// Raw revenue CSV (defaults to RAW_DATA_PATH).
    #[arg(long, short = 'i', value_name = "CSV")]
    pub input: Option<PathBuf>,

    /// Output directory (defaults to SPLIT_DATA_DIR).
    #[arg(long, short = 'o', value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Forecast horizon: periods held out as the test window.
    #[arg(long)]
    pub horizon: Option<usize>,

    /// Minimum number of training periods per series.
    #[arg(long)]
    pub min_train_length: Option<usize>,

    /// Largest tolerated run of missing periods inside a series.
    #[arg(long)]
    pub max_gap: Option<u32>,

    /// What to do with tolerated gaps.
    #[arg(long, value_enum)]
    pub gap_policy: Option<GapPolicy>,

    /// What to do with rows that fail validation.
    #[arg(long = "on-invalid-row", value_enum)]
    pub row_error_policy: Option<RowErrorPolicy>,
}

#[derive(Debug, Args, Clone)]
pub struct TrainArgs {
    /// Combined training CSV (defaults to `<SPLIT_DATA_DIR>/train_<PERIOD>.csv`).
    #[arg(long, value_name = "CSV")]
    pub data: Option<PathBuf>,

    /// Cadence of the dataset (inferred from `train_<PERIOD>.csv` names, else MONTH).
    #[arg(long, value_enum)]
    pub period_type: Option<PeriodType>,

    /// Extra text placed in the job name.
    #[arg(long)]
    pub job_suffix: Option<String>,

    /// Assume the dataset is already in the bucket.
    #[arg(long)]
    pub no_upload: bool,

    /// Where to write the training summary (defaults to MODEL_REF_PATH).
    #[arg(long, value_name = "JSON")]
    pub summary: Option<PathBuf>,

    #[arg(long)]
    pub horizon: Option<usize>,

    /// Comma-separated quantiles, e.g. `p10,p50,p90` or `0.1,0.5,0.9`.
    #[arg(long, value_parser = parse_quantiles)]
    pub quantiles: Option<QuantileList>,

    /// Comma-separated candidate algorithms, or `auto`.
    #[arg(long, value_parser = parse_algorithms)]
    pub algorithms: Option<AlgorithmSelection>,
}

#[derive(Debug, Args, Clone)]
pub struct StatusArgs {
    /// AutoML job name.
    pub job: String,

    /// Keep polling until the job finishes or POLL_TIMEOUT_SECS elapses.
    #[arg(long)]
    pub wait: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PredictArgs {
    /// Partner to forecast.
    #[arg(long, short = 'p')]
    pub partner: String,

    /// Cadence of the forecast (defaults to the model's).
    #[arg(long, value_enum)]
    pub period_type: Option<PeriodType>,

    /// Periods to forecast (defaults to the model's horizon).
    #[arg(long)]
    pub horizon: Option<usize>,

    /// Comma-separated quantiles (defaults to the model's).
    #[arg(long, value_parser = parse_quantiles)]
    pub quantiles: Option<QuantileList>,

    /// Context CSV (defaults to the partner's processed train split).
    #[arg(long, value_name = "CSV")]
    pub history: Option<PathBuf>,

    /// Training summary to read (defaults to MODEL_REF_PATH).
    #[arg(long, value_name = "JSON")]
    pub model: Option<PathBuf>,

    /// Endpoint name override.
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Also write the forecast to this CSV.
    #[arg(long, short = 'o', value_name = "CSV")]
    pub output: Option<PathBuf>,
}

/// Parsed `--quantiles` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantileList(pub Vec<Quantile>);

fn parse_quantiles(s: &str) -> Result<QuantileList, String> {
    parse_quantile_list(s).map(QuantileList)
}

fn parse_algorithms(s: &str) -> Result<AlgorithmSelection, String> {
    s.parse()
}
