//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and loads settings
//! - applies flag overrides
//! - runs the requested stage
//! - prints its report

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use crate::cli::{Cli, Command, PredictArgs, PreprocessArgs, StatusArgs, TrainArgs};
use crate::cloud::{Credentials, SageMakerClient};
use crate::config::Settings;
use crate::domain::{ForecastRequest, PeriodType};
use crate::error::AppError;
use crate::prep::{CadenceConfig, PrepareConfig, SplitConfig};

pub mod pipeline;

/// Entry point for the `rf` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.env_file.as_deref())?;

    match cli.command {
        Command::Preprocess(args) => handle_preprocess(settings, args),
        Command::Train(args) => handle_train(settings, args),
        Command::Status(args) => handle_status(&settings, args),
        Command::Predict(args) => handle_predict(&settings, args),
    }
}

fn handle_preprocess(mut settings: Settings, args: PreprocessArgs) -> Result<(), AppError> {
    if let Some(h) = args.horizon {
        settings.horizon = h;
    }
    if let Some(n) = args.min_train_length {
        settings.min_train_length = n;
    }
    if let Some(g) = args.max_gap {
        settings.max_gap = g;
    }
    if let Some(p) = args.gap_policy {
        settings.gap_policy = p;
    }
    if let Some(p) = args.row_error_policy {
        settings.row_error_policy = p;
    }
    settings.validate()?;

    let config = preprocess_config(&settings, args.input, args.output_dir);
    let run = pipeline::run_preprocess(&config)?;
    println!("{}", crate::report::format_preprocess_summary(&run));
    Ok(())
}

/// Resolve preprocessing inputs from settings, with optional path overrides.
pub fn preprocess_config(
    settings: &Settings,
    input: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> pipeline::PreprocessConfig {
    pipeline::PreprocessConfig {
        input: input.unwrap_or_else(|| settings.raw_data_path.clone()),
        output_dir: output_dir.unwrap_or_else(|| settings.split_dir.clone()),
        prepare: PrepareConfig {
            cadence: CadenceConfig {
                max_gap: settings.max_gap,
                policy: settings.gap_policy,
            },
            split: SplitConfig {
                horizon: settings.horizon,
                min_train_length: settings.min_train_length,
            },
        },
        row_error_policy: settings.row_error_policy,
    }
}

fn handle_train(mut settings: Settings, args: TrainArgs) -> Result<(), AppError> {
    if let Some(h) = args.horizon {
        settings.horizon = h;
    }
    if let Some(q) = args.quantiles {
        settings.quantiles = q.0;
    }
    if let Some(a) = args.algorithms {
        settings.algorithms = a;
    }
    settings.validate()?;

    let period_type = args
        .period_type
        .or_else(|| args.data.as_deref().and_then(crate::train::infer_period_type))
        .unwrap_or(PeriodType::Month);
    let data_file = args
        .data
        .unwrap_or_else(|| settings.split_dir.join(pipeline::training_file_name(period_type)));

    let request = crate::train::TrainRequest {
        data_file,
        period_type,
        job_suffix: args.job_suffix,
        upload: !args.no_upload,
        summary_path: args.summary.unwrap_or_else(|| settings.model_ref_path.clone()),
    };

    let (client, store) = crate::cloud::connect(&settings)?;
    let outcome = crate::train::Trainer::new(&client, &store, &settings).train(&request)?;
    println!("{}", crate::report::format_training_outcome(&outcome));
    Ok(())
}

fn handle_status(settings: &Settings, args: StatusArgs) -> Result<(), AppError> {
    let client = SageMakerClient::from_settings(settings, Credentials::from_env()?)?;
    let description = crate::train::job_status(&client, settings, &args.job, args.wait)?;
    println!("=== rf - status ===\n{}", crate::report::format_job_status(&description));
    Ok(())
}

fn handle_predict(settings: &Settings, args: PredictArgs) -> Result<(), AppError> {
    let mut model = match &args.model {
        Some(path) => crate::io::read_model_ref_json(path)?,
        None if settings.model_ref_path.exists() => crate::io::read_model_ref_json(&settings.model_ref_path)?,
        None => {
            warn!(
                path = %settings.model_ref_path.display(),
                "no training summary found; using endpoint and quantiles from settings"
            );
            crate::predict::model_ref_from_settings(settings, args.period_type.unwrap_or(PeriodType::Month))
        }
    };
    if let Some(endpoint) = args.endpoint {
        model.endpoint_name = endpoint;
    }

    let request = ForecastRequest {
        partner_id: args.partner,
        period_type: args.period_type.unwrap_or(model.period_type),
        horizon: args.horizon.unwrap_or(model.horizon),
        quantiles: args.quantiles.map(|q| q.0).unwrap_or_else(|| model.quantiles.clone()),
    };
    // Reject bad requests before reading history or touching the network.
    crate::predict::validate_request(&request, &model)?;

    let history_path = args.history.unwrap_or_else(|| {
        crate::predict::default_history_path(settings, &request.partner_id, request.period_type)
    });
    let history = crate::predict::load_history(&history_path, &request.partner_id, request.period_type)?;

    let client = SageMakerClient::from_settings(settings, Credentials::from_env()?)?;
    let results = crate::predict::Predictor::new(&client, settings).predict(&request, &model, &history)?;

    println!("{}", crate::report::format_forecast_table(&results));
    if let Some(path) = &args.output {
        crate::io::write_forecast_csv(path, &results)?;
        info!(path = %path.display(), rows = results.len(), "wrote forecast");
    }
    Ok(())
}
