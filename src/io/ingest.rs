//! CSV ingest and validation.
//!
//! Turns a raw revenue export into validated `RevenueRecord`s.
//!
//! Two layouts are accepted, detected from the header:
//! - canonical: `partner_id, start_date, revenue, period_type, report_type`
//! - raw export: `partner_id, period, report_type, value`, where `period` is an
//!   attribute map such as `{'type': {'S': 'MONTH'}, 'start_date': {'S': '2024-01-01'}}`
//!
//! Rows that fail validation are handled per `RowErrorPolicy`: either the
//! whole load fails, or the row is logged and reported back in `rejected`.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::{PeriodType, RevenueRecord, RowErrorPolicy};
use crate::error::AppError;

/// A row that failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RowError {
    /// 1-based file line; the header is line 1.
    pub line: usize,
    pub field: String,
    pub message: String,
}

impl RowError {
    fn new(line: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            line,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<RowError> for AppError {
    fn from(e: RowError) -> Self {
        AppError::SchemaValidation {
            line: e.line,
            field: e.field,
            message: e.message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    Canonical,
    RawExport,
}

/// Ingest output: valid records plus everything that was rejected.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub layout: InputLayout,
    pub records: Vec<RevenueRecord>,
    pub rejected: Vec<RowError>,
    pub rows_read: usize,
}

/// Load and validate a revenue CSV file.
pub fn load_revenue_records(path: &Path, policy: RowErrorPolicy) -> Result<IngestedData, AppError> {
    let file = std::fs::File::open(path).map_err(|e| AppError::io(path, e))?;
    let data = read_revenue_records(file, policy)?;
    info!(
        path = %path.display(),
        rows = data.rows_read,
        valid = data.records.len(),
        rejected = data.rejected.len(),
        "loaded revenue records"
    );
    Ok(data)
}

/// Validate revenue records from any reader.
pub fn read_revenue_records<R: Read>(reader: R, policy: RowErrorPolicy) -> Result<IngestedData, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| RowError::new(1, "header", format!("failed to read CSV header: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    let layout = detect_layout(&header_map)?;

    let mut records = Vec::new();
    let mut rejected = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;

        let parsed = match result {
            Ok(record) => match layout {
                InputLayout::Canonical => parse_canonical_row(&record, &header_map, line),
                InputLayout::RawExport => parse_raw_export_row(&record, &header_map, line),
            },
            Err(e) => Err(RowError::new(line, "row", format!("CSV parse error: {e}"))),
        };

        match parsed {
            Ok(rec) => records.push(rec),
            Err(e) => match policy {
                RowErrorPolicy::Abort => return Err(e.into()),
                RowErrorPolicy::Skip => {
                    warn!(line = e.line, field = %e.field, "rejected row: {}", e.message);
                    rejected.push(e);
                }
            },
        }
    }

    if records.is_empty() {
        return Err(AppError::NoValidRows {
            rejected: rejected.len(),
        });
    }

    Ok(IngestedData {
        layout,
        records,
        rejected,
        rows_read,
    })
}

const CANONICAL_COLUMNS: [&str; 5] = ["partner_id", "start_date", "revenue", "period_type", "report_type"];
const RAW_EXPORT_COLUMNS: [&str; 4] = ["partner_id", "period", "report_type", "value"];

fn detect_layout(header_map: &HashMap<String, usize>) -> Result<InputLayout, AppError> {
    let has_all = |cols: &[&str]| cols.iter().all(|c| header_map.contains_key(*c));
    if has_all(&CANONICAL_COLUMNS) {
        return Ok(InputLayout::Canonical);
    }
    if has_all(&RAW_EXPORT_COLUMNS) {
        return Ok(InputLayout::RawExport);
    }
    let missing: Vec<&str> = CANONICAL_COLUMNS
        .iter()
        .copied()
        .filter(|c| !header_map.contains_key(*c))
        .collect();
    Err(RowError::new(
        1,
        missing.first().copied().unwrap_or("header"),
        format!(
            "missing required columns: {} (expected `{}` or `{}`)",
            missing.join(", "),
            CANONICAL_COLUMNS.join(","),
            RAW_EXPORT_COLUMNS.join(",")
        ),
    )
    .into())
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn parse_canonical_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    line: usize,
) -> Result<RevenueRecord, RowError> {
    let partner_id = get_required(record, header_map, "partner_id", line)?.to_string();
    let start_date = parse_date(get_required(record, header_map, "start_date", line)?)
        .map_err(|m| RowError::new(line, "start_date", m))?;
    let revenue = parse_revenue(get_required(record, header_map, "revenue", line)?)
        .map_err(|m| RowError::new(line, "revenue", m))?;
    let period_type: PeriodType = get_required(record, header_map, "period_type", line)?
        .parse()
        .map_err(|m| RowError::new(line, "period_type", m))?;
    let report_type = get_optional(record, header_map, "report_type").unwrap_or_default().to_string();

    Ok(RevenueRecord {
        partner_id,
        start_date,
        revenue,
        period_type,
        report_type,
    })
}

/// `{'type': {'S': 'MONTH'}, 'start_date': {'S': '2024-01-01'}}`
#[derive(Debug, Deserialize)]
struct PeriodAttr {
    #[serde(rename = "type")]
    period_type: Option<StringAttr>,
    start_date: Option<StringAttr>,
}

#[derive(Debug, Deserialize)]
struct StringAttr {
    #[serde(rename = "S")]
    s: String,
}

fn parse_raw_export_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    line: usize,
) -> Result<RevenueRecord, RowError> {
    let partner_id = get_required(record, header_map, "partner_id", line)?.to_string();

    let raw_period = get_required(record, header_map, "period", line)?;
    let attr: PeriodAttr = serde_json::from_str(&raw_period.replace('\'', "\""))
        .map_err(|e| RowError::new(line, "period", format!("invalid period attribute '{raw_period}': {e}")))?;
    let period_type: PeriodType = attr
        .period_type
        .ok_or_else(|| RowError::new(line, "period", "period attribute has no `type`"))?
        .s
        .parse()
        .map_err(|m| RowError::new(line, "period", m))?;
    let start_date = attr
        .start_date
        .ok_or_else(|| RowError::new(line, "period", "period attribute has no `start_date`"))
        .and_then(|a| parse_date(&a.s).map_err(|m| RowError::new(line, "period", m)))?;

    let revenue = parse_revenue(get_required(record, header_map, "value", line)?)
        .map_err(|m| RowError::new(line, "value", m))?;
    let report_type = get_optional(record, header_map, "report_type").unwrap_or_default().to_string();

    Ok(RevenueRecord {
        partner_id,
        start_date,
        revenue,
        period_type,
        report_type,
    })
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
    line: usize,
) -> Result<&'a str, RowError> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| RowError::new(line, name, "missing required column"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RowError::new(line, name, "missing required value"))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, String> {
    // ISO dates are the documented format; exports also show up with a time
    // component or in day-first order.
    const FMTS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];
    for fmt in FMTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    if s.len() > 10 && s.is_char_boundary(10) {
        if let Ok(d) = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d") {
            return Ok(d);
        }
    }
    Err(format!(
        "invalid date '{s}'. Expected one of: YYYY-MM-DD, YYYY/MM/DD, DD/MM/YYYY, DD-MM-YYYY."
    ))
}

fn parse_revenue(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if !v.is_finite() {
        return Err(format!("'{s}' is not finite"));
    }
    if v < 0.0 {
        return Err(format!("revenue must be non-negative, got {v}"));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(csv: &str, policy: RowErrorPolicy) -> Result<IngestedData, AppError> {
        read_revenue_records(csv.as_bytes(), policy)
    }

    #[test]
    fn canonical_rows_parse() {
        let csv = "\u{feff}Partner_ID,start_date,revenue,period_type,report_type\n\
                   P1,2024-01-01,227.12,MONTH,RevenueShare\n\
                   P1,2024-02-01,0,month,\n";
        let data = read(csv, RowErrorPolicy::Abort).unwrap();
        assert_eq!(data.layout, InputLayout::Canonical);
        assert_eq!(data.records.len(), 2);
        assert_eq!(data.records[0].revenue, 227.12);
        assert_eq!(data.records[1].period_type, PeriodType::Month);
        assert_eq!(data.records[1].report_type, "");
    }

    #[test]
    fn negative_revenue_is_a_schema_error_naming_line_and_field() {
        let csv = "partner_id,start_date,revenue,period_type,report_type\n\
                   P1,2024-01-01,10,MONTH,R\n\
                   P1,2024-02-01,-10,MONTH,R\n";
        let err = read(csv, RowErrorPolicy::Abort).unwrap_err();
        match err {
            AppError::SchemaValidation { line, field, .. } => {
                assert_eq!(line, 3);
                assert_eq!(field, "revenue");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn skip_policy_records_rejections_and_continues() {
        let csv = "partner_id,start_date,revenue,period_type,report_type\n\
                   P1,2024-13-01,10,MONTH,R\n\
                   P1,2024-02-01,abc,MONTH,R\n\
                   P1,2024-03-01,5,DAY,R\n\
                   ,2024-04-01,5,MONTH,R\n\
                   P1,2024-05-01,5,WEEK,R\n";
        let data = read(csv, RowErrorPolicy::Skip).unwrap();
        assert_eq!(data.rows_read, 5);
        assert_eq!(data.records.len(), 1);
        let fields: Vec<(usize, &str)> = data.rejected.iter().map(|e| (e.line, e.field.as_str())).collect();
        assert_eq!(
            fields,
            [(2, "start_date"), (3, "revenue"), (4, "period_type"), (5, "partner_id")]
        );
    }

    #[test]
    fn all_rows_rejected_is_fatal() {
        let csv = "partner_id,start_date,revenue,period_type,report_type\nP1,x,1,MONTH,R\n";
        let err = read(csv, RowErrorPolicy::Skip).unwrap_err();
        assert!(matches!(err, AppError::NoValidRows { rejected: 1 }));
    }

    #[test]
    fn raw_export_layout_is_decoded() {
        let csv = "partner_id,period,report_type,value\n\
                   ACC-1,\"{'type': {'S': 'MONTH'}, 'start_date': {'S': '2024-07-01'}}\",RevenueShare,227.12\n\
                   ACC-1,\"{'type': {'S': 'MONTH'}}\",RevenueShare,1\n";
        let data = read(csv, RowErrorPolicy::Skip).unwrap();
        assert_eq!(data.layout, InputLayout::RawExport);
        assert_eq!(data.records.len(), 1);
        assert_eq!(data.records[0].start_date, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(data.records[0].revenue, 227.12);
        assert_eq!(data.rejected[0].field, "period");
    }

    #[test]
    fn missing_columns_fail_on_header_line() {
        let csv = "partner_id,start_date,revenue\nP1,2024-01-01,1\n";
        let err = read(csv, RowErrorPolicy::Skip).unwrap_err();
        match err {
            AppError::SchemaValidation { line, field, message } => {
                assert_eq!(line, 1);
                assert_eq!(field, "period_type");
                assert!(message.contains("report_type"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dates_accept_common_export_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        for s in ["2024-03-01", "2024/03/01", "01/03/2024", "01-03-2024", "2024-03-01 00:00:00"] {
            assert_eq!(parse_date(s).unwrap(), expected, "{s}");
        }
        assert!(parse_date("March 2024").is_err());
    }
}
