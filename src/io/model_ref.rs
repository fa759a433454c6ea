//! Read/write the training summary.
//!
//! The summary is the portable hand-off between `rf train` and `rf predict`:
//! - the job that produced the model and its best candidate
//! - the endpoint serving it
//! - the cadence, horizon and quantiles it was trained for
//!
//! The schema is defined by `domain::ModelRef`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::domain::ModelRef;
use crate::error::AppError;

/// Write a training summary JSON file, creating parent directories as needed.
pub fn write_model_ref_json(path: &Path, model: &ModelRef) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| AppError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, model).map_err(|e| AppError::io(path, e.into()))?;
    writer
        .write_all(b"\n")
        .and_then(|_| writer.flush())
        .map_err(|e| AppError::io(path, e))?;
    Ok(())
}

/// Read a training summary JSON file.
pub fn read_model_ref_json(path: &Path) -> Result<ModelRef, AppError> {
    let file = File::open(path).map_err(|e| AppError::io(path, e))?;
    let model: ModelRef = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::config(format!("invalid training summary '{}': {e}", path.display())))?;
    if model.horizon == 0 || model.quantiles.is_empty() {
        return Err(AppError::config(format!(
            "training summary '{}' must declare a horizon >= 1 and at least one quantile",
            path.display()
        )));
    }
    Ok(model)
}
