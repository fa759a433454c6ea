//! Preprocessing manifest (JSON).
//!
//! Lists every series with its inclusion status, plus the rows rejected at
//! ingest. Contains no timestamps so identical runs produce identical bytes.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{GapPolicy, PeriodType, RowErrorPolicy};
use crate::error::AppError;
use crate::io::ingest::RowError;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesStatus {
    Included,
    Excluded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub partner_id: String,
    pub period_type: PeriodType,
    pub status: SeriesStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Records after cadence handling.
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub train_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub train_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_file: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub filled_periods: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub horizon: usize,
    pub min_train_length: usize,
    pub max_gap: u32,
    pub gap_policy: GapPolicy,
    pub row_error_policy: RowErrorPolicy,
    pub rows_read: usize,
    pub rows_valid: usize,
    pub rejected_rows: Vec<RowError>,
    /// Combined per-period training files, the datasets uploaded by `rf train`.
    pub training_files: Vec<String>,
    pub series: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn included(&self) -> usize {
        self.series
            .iter()
            .filter(|e| e.status == SeriesStatus::Included)
            .count()
    }

    pub fn excluded(&self) -> usize {
        self.series.len() - self.included()
    }
}

pub fn write_manifest_json(path: &Path, manifest: &Manifest) -> Result<(), AppError> {
    let file = File::create(path).map_err(|e| AppError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, manifest).map_err(|e| AppError::io(path, e.into()))?;
    writer
        .write_all(b"\n")
        .and_then(|_| writer.flush())
        .map_err(|e| AppError::io(path, e))?;
    Ok(())
}

/// Output files recorded by an earlier run. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct RecordedOutputs {
    #[serde(default)]
    pub training_files: Vec<String>,
    #[serde(default)]
    pub series: Vec<RecordedSeries>,
}

#[derive(Debug, Deserialize)]
pub struct RecordedSeries {
    pub partner_id: String,
    pub period_type: PeriodType,
    #[serde(default)]
    pub train_file: Option<String>,
    #[serde(default)]
    pub test_file: Option<String>,
}

impl RecordedOutputs {
    /// Every file name the run wrote, manifest excluded.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.training_files.iter().map(String::as_str).chain(
            self.series
                .iter()
                .flat_map(|s| s.train_file.iter().chain(s.test_file.iter()))
                .map(String::as_str),
        )
    }

    pub fn train_file(&self, partner_id: &str, period_type: PeriodType) -> Option<&str> {
        self.series
            .iter()
            .find(|s| s.partner_id == partner_id && s.period_type == period_type)
            .and_then(|s| s.train_file.as_deref())
    }
}

/// Read `manifest.json` from `dir`; `Ok(None)` when there is none.
pub fn read_recorded_outputs(dir: &Path) -> Result<Option<RecordedOutputs>, AppError> {
    let path = dir.join(MANIFEST_FILE);
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(AppError::io(&path, e)),
    };
    serde_json::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|e| AppError::config(format!("invalid manifest '{}': {e}", path.display())))
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}
