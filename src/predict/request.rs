//! Request validation and the endpoint input body.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::Settings;
use crate::domain::{ForecastRequest, ModelRef, PeriodType, RevenueRecord, RowErrorPolicy, SeriesKey};
use crate::error::AppError;
use crate::io::{load_revenue_records, read_recorded_outputs};

/// Model reference built from settings alone, for endpoints deployed outside `rf train`.
pub fn model_ref_from_settings(settings: &Settings, period_type: PeriodType) -> ModelRef {
    ModelRef {
        job_name: None,
        candidate: None,
        endpoint_name: settings.endpoint_name.clone(),
        period_type,
        horizon: settings.horizon,
        quantiles: settings.quantiles.clone(),
    }
}

/// Check a request against what the model was trained for.
pub fn validate_request(request: &ForecastRequest, model: &ModelRef) -> Result<(), AppError> {
    if request.partner_id.trim().is_empty() {
        return Err(AppError::InvalidRequest("partner id must not be empty".to_string()));
    }
    if request.horizon == 0 || request.horizon > model.horizon {
        return Err(AppError::InvalidRequest(format!(
            "horizon {} is outside 1..={} supported by the model",
            request.horizon, model.horizon
        )));
    }
    if request.period_type != model.period_type {
        return Err(AppError::InvalidRequest(format!(
            "period type {} does not match the model's {}",
            request.period_type, model.period_type
        )));
    }
    if request.quantiles.is_empty() {
        return Err(AppError::InvalidRequest("at least one quantile is required".to_string()));
    }
    if let Some(q) = request.quantiles.iter().find(|q| !model.quantiles.contains(q)) {
        return Err(AppError::UnsupportedQuantile {
            quantile: *q,
            supported: model.quantiles.clone(),
        });
    }
    Ok(())
}

/// Context rows for one series, ascending by date.
pub fn load_history(path: &Path, partner_id: &str, period_type: PeriodType) -> Result<Vec<RevenueRecord>, AppError> {
    let data = load_revenue_records(path, RowErrorPolicy::Abort)?;
    let mut history: Vec<RevenueRecord> = data
        .records
        .into_iter()
        .filter(|r| r.partner_id == partner_id && r.period_type == period_type)
        .collect();
    if history.is_empty() {
        return Err(AppError::InvalidRequest(format!(
            "no {period_type} history for partner '{partner_id}' in '{}'",
            path.display()
        )));
    }
    history.sort_by_key(|r| r.start_date);
    Ok(history)
}

/// Default history file: the partner's processed train split.
///
/// The split directory's manifest wins over the computed name, since the
/// preprocessor may have renamed a colliding series.
pub fn default_history_path(settings: &Settings, partner_id: &str, period_type: PeriodType) -> PathBuf {
    let recorded = match read_recorded_outputs(&settings.split_dir) {
        Ok(recorded) => recorded,
        Err(e) => {
            warn!("ignoring manifest in {}: {e}", settings.split_dir.display());
            None
        }
    };
    if let Some(name) = recorded.as_ref().and_then(|r| r.train_file(partner_id, period_type)) {
        return settings.split_dir.join(name);
    }
    let key = SeriesKey::new(partner_id, period_type);
    settings.split_dir.join(format!("{}_train.csv", key.file_stem()))
}

/// `text/csv` body with item id, timestamp and target columns.
///
/// Values are serialized like the processed splits, so `10` is sent as `10.0`.
pub fn history_csv_body(history: &[RevenueRecord], settings: &Settings) -> Result<Vec<u8>, AppError> {
    let encode_err = |e: csv::Error| AppError::InvalidRequest(format!("failed to encode history: {e}"));
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            settings.item_attribute.as_str(),
            settings.timestamp_attribute.as_str(),
            settings.target_attribute.as_str(),
        ])
        .map_err(encode_err)?;
    for r in history {
        writer
            .serialize((r.partner_id.as_str(), r.start_date, r.revenue))
            .map_err(encode_err)?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::InvalidRequest(format!("failed to finish history body: {e}")))
}
