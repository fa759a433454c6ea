//! Preprocessing pipeline shared by the CLI and tests.
//!
//! raw CSV -> validated records -> series -> cadence + split -> files + manifest

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::domain::{PeriodType, RevenueRecord, RowErrorPolicy};
use crate::error::AppError;
use crate::io::{
    Manifest, ManifestEntry, SeriesStatus, MANIFEST_FILE, load_revenue_records, read_recorded_outputs,
    write_manifest_json, write_records_csv,
};
use crate::prep::{PrepareConfig, SeriesOutcome, group_records, prepare_all};

/// Everything `rf preprocess` needs, resolved from settings and flags.
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub prepare: PrepareConfig,
    pub row_error_policy: RowErrorPolicy,
}

#[derive(Debug, Clone)]
pub struct PreprocessRun {
    pub manifest: Manifest,
    pub output_dir: PathBuf,
    pub manifest_path: PathBuf,
}

/// File name of the combined training dataset for one cadence.
pub fn training_file_name(period: PeriodType) -> String {
    format!("train_{period}.csv")
}

pub fn run_preprocess(config: &PreprocessConfig) -> Result<PreprocessRun, AppError> {
    let ingest = load_revenue_records(&config.input, config.row_error_policy)?;
    let rows_valid = ingest.records.len();

    let series = group_records(ingest.records);
    info!(series = series.len(), "grouped records by partner and period type");

    let outcomes = prepare_all(series, config.prepare);

    std::fs::create_dir_all(&config.output_dir).map_err(|e| AppError::io(&config.output_dir, e))?;
    remove_previous_outputs(&config.output_dir)?;

    let mut entries = Vec::with_capacity(outcomes.len());
    let mut training_rows: BTreeMap<PeriodType, Vec<RevenueRecord>> = BTreeMap::new();
    let mut stems = BTreeSet::new();

    for outcome in outcomes {
        entries.push(write_outcome(&config.output_dir, outcome, &mut training_rows, &mut stems)?);
    }

    let mut training_files = Vec::new();
    for (period, rows) in &training_rows {
        let name = training_file_name(*period);
        write_records_csv(&config.output_dir.join(&name), rows)?;
        info!(file = %name, rows = rows.len(), "wrote training dataset");
        training_files.push(name);
    }

    let manifest = Manifest {
        horizon: config.prepare.split.horizon,
        min_train_length: config.prepare.split.min_train_length,
        max_gap: config.prepare.cadence.max_gap,
        gap_policy: config.prepare.cadence.policy,
        row_error_policy: config.row_error_policy,
        rows_read: ingest.rows_read,
        rows_valid,
        rejected_rows: ingest.rejected,
        training_files,
        series: entries,
    };

    let manifest_path = config.output_dir.join(MANIFEST_FILE);
    write_manifest_json(&manifest_path, &manifest)?;
    info!(
        included = manifest.included(),
        excluded = manifest.excluded(),
        path = %manifest_path.display(),
        "preprocessing complete"
    );

    Ok(PreprocessRun {
        manifest,
        output_dir: config.output_dir.clone(),
        manifest_path,
    })
}

/// Delete the files listed by the manifest of an earlier run in `output_dir`.
///
/// Only bare file names are touched; anything else in the directory is left alone.
fn remove_previous_outputs(output_dir: &Path) -> Result<(), AppError> {
    let Some(previous) = read_recorded_outputs(output_dir)? else {
        return Ok(());
    };
    let mut removed = 0usize;
    for name in previous.file_names() {
        if Path::new(name).file_name().and_then(|n| n.to_str()) != Some(name) {
            warn!(file = name, "ignoring non-local file name in previous manifest");
            continue;
        }
        let path = output_dir.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AppError::io(&path, e)),
        }
    }
    info!(removed, dir = %output_dir.display(), "removed outputs of previous run");
    Ok(())
}

/// Per-series file stem, unique within the run even on case-insensitive filesystems.
fn unique_stem(base: String, stems: &mut BTreeSet<String>) -> String {
    if stems.insert(base.to_ascii_lowercase()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if stems.insert(candidate.to_ascii_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

fn write_outcome(
    output_dir: &Path,
    outcome: SeriesOutcome,
    training_rows: &mut BTreeMap<PeriodType, Vec<RevenueRecord>>,
    stems: &mut BTreeSet<String>,
) -> Result<ManifestEntry, AppError> {
    match outcome {
        SeriesOutcome::Included {
            split,
            filled,
            missing_periods,
        } => {
            let key = split.train.key.clone();
            let base = key.file_stem();
            let stem = unique_stem(base.clone(), stems);
            if stem != base {
                warn!(series = %key, stem = %stem, "file stem already taken in this run");
            }
            let train_file = format!("{stem}_train.csv");
            let test_file = format!("{stem}_test.csv");

            write_records_csv(&output_dir.join(&train_file), &split.train.records)?;
            write_records_csv(&output_dir.join(&test_file), &split.test.records)?;

            if missing_periods > 0 {
                info!(series = %key, missing_periods, filled, "series has tolerated gaps");
            }

            let entry = ManifestEntry {
                partner_id: key.partner_id.clone(),
                period_type: key.period_type,
                status: SeriesStatus::Included,
                reason: None,
                records: split.train.len() + split.test.len(),
                train_rows: Some(split.train.len()),
                test_rows: Some(split.test.len()),
                train_file: Some(train_file),
                test_file: Some(test_file),
                filled_periods: filled,
            };
            training_rows
                .entry(key.period_type)
                .or_default()
                .extend(split.train.records);
            Ok(entry)
        }
        SeriesOutcome::Excluded { key, len, reason } => {
            warn!(series = %key, records = len, "excluded: {reason}");
            Ok(ManifestEntry {
                partner_id: key.partner_id,
                period_type: key.period_type,
                status: SeriesStatus::Excluded,
                reason: Some(reason.to_string()),
                records: len,
                train_rows: None,
                test_rows: None,
                train_file: None,
                test_file: None,
                filled_periods: 0,
            })
        }
    }
}
