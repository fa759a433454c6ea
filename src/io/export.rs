//! CSV writers for processed splits and forecast results.
//!
//! Output is deterministic: rows are written in the order given, the header
//! comes from the row type and floats use the shortest round-trip formatting.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::Serialize;

use crate::domain::{ForecastResult, RevenueRecord};
use crate::error::AppError;

/// Write records in the canonical `partner_id,start_date,revenue,period_type,report_type` schema.
pub fn write_records_csv(path: &Path, records: &[RevenueRecord]) -> Result<(), AppError> {
    write_rows(path, records)
}

/// Write forecast rows as `partner_id,timestamp,quantile,value`.
pub fn write_forecast_csv(path: &Path, rows: &[ForecastResult]) -> Result<(), AppError> {
    write_rows(path, rows)
}

/// Serialize rows to an in-memory CSV body.
pub fn records_to_csv_bytes<T: Serialize>(rows: &[T]) -> Result<Vec<u8>, AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| AppError::config(format!("failed to encode CSV row: {e}")))?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::config(format!("failed to finish CSV body: {e}")))
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), AppError> {
    let file = File::create(path).map_err(|e| AppError::io(path, e))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for row in rows {
        writer.serialize(row).map_err(|e| csv_error(path, e))?;
    }
    writer.flush().map_err(|e| AppError::io(path, e))?;
    Ok(())
}

fn csv_error(path: &Path, e: csv::Error) -> AppError {
    let source = match e.into_kind() {
        csv::ErrorKind::Io(io) => io,
        other => std::io::Error::other(format!("{other:?}")),
    };
    AppError::io(path, source)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::domain::PeriodType;

    #[test]
    fn records_use_canonical_header_and_formatting() {
        let records = vec![RevenueRecord {
            partner_id: "P1".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            revenue: 227.12,
            period_type: PeriodType::Month,
            report_type: "RevenueShare".to_string(),
        }];
        let body = String::from_utf8(records_to_csv_bytes(&records).unwrap()).unwrap();
        assert_eq!(
            body,
            "partner_id,start_date,revenue,period_type,report_type\nP1,2024-07-01,227.12,MONTH,RevenueShare\n"
        );
    }
}
