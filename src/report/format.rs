//! Formatted terminal output.
//!
//! Formatting lives in one place so the pipeline stays testable and output
//! changes stay localized. Reports go to stdout; logs go to stderr.

use crate::app::pipeline::PreprocessRun;
use crate::cloud::JobDescription;
use crate::domain::ForecastResult;
use crate::io::SeriesStatus;
use crate::train::TrainOutcome;

/// Preprocessing summary: dataset counts plus one line per series.
pub fn format_preprocess_summary(run: &PreprocessRun) -> String {
    let m = &run.manifest;
    let mut out = String::new();

    out.push_str("=== rf - preprocess ===\n");
    out.push_str(&format!(
        "Rows: read={} | valid={} | rejected={}\n",
        m.rows_read,
        m.rows_valid,
        m.rejected_rows.len()
    ));
    out.push_str(&format!(
        "Split: horizon={} | min_train_length={} | max_gap={} ({:?})\n",
        m.horizon, m.min_train_length, m.max_gap, m.gap_policy
    ));
    out.push_str(&format!(
        "Series: included={} | excluded={}\n\n",
        m.included(),
        m.excluded()
    ));

    out.push_str(&table_line(&format!(
        "{:<24} {:<6} {:<9} {:>7} {:>6} {:>5}  {}",
        "partner_id", "period", "status", "records", "train", "test", "note"
    )));
    out.push_str(&table_line(&format!(
        "{:-<24} {:-<6} {:-<9} {:->7} {:->6} {:->5}  {:-<4}",
        "", "", "", "", "", "", ""
    )));
    for e in &m.series {
        let status = match e.status {
            SeriesStatus::Included => "included",
            SeriesStatus::Excluded => "excluded",
        };
        let note = match (&e.reason, e.filled_periods) {
            (Some(reason), _) => reason.clone(),
            (None, 0) => String::new(),
            (None, n) => format!("{n} period(s) zero-filled"),
        };
        out.push_str(&table_line(&format!(
            "{:<24} {:<6} {:<9} {:>7} {:>6} {:>5}  {}",
            truncate(&e.partner_id, 24),
            e.period_type.as_str(),
            status,
            e.records,
            opt_count(e.train_rows),
            opt_count(e.test_rows),
            note
        )));
    }

    if !m.rejected_rows.is_empty() {
        out.push_str("\nRejected rows:\n");
        for r in &m.rejected_rows {
            out.push_str(&format!("- line {} `{}`: {}\n", r.line, r.field, r.message));
        }
    }

    out.push_str("\nOutputs:\n");
    for f in &m.training_files {
        out.push_str(&format!("- {}\n", run.output_dir.join(f).display()));
    }
    out.push_str(&format!("- {}\n", run.manifest_path.display()));
    out
}

/// Training outcome: job, best candidate and where the summary went.
pub fn format_training_outcome(outcome: &TrainOutcome) -> String {
    let mut out = String::new();
    out.push_str("=== rf - train ===\n");
    out.push_str(&format_job_status(&outcome.description));
    out.push_str(&format!("Arn: {}\n", outcome.job_arn));
    out.push_str(&format!("Waited: {}s\n", outcome.waited.as_secs()));
    out.push_str(&format!("Endpoint: {}\n", outcome.model_ref.endpoint_name));
    out.push_str(&format!("Summary: {}\n", outcome.summary_path.display()));
    out
}

/// One job's status block.
pub fn format_job_status(desc: &JobDescription) -> String {
    let mut out = String::new();
    out.push_str(&format!("Job: {}\n", desc.job_name));
    out.push_str(&format!("Status: {}\n", desc.status_line()));
    if let Some(reason) = &desc.failure_reason {
        out.push_str(&format!("Failure: {reason}\n"));
    }
    if let Some(minutes) = desc.duration_minutes() {
        out.push_str(&format!("Duration: {minutes} min\n"));
    }
    if let Some(c) = &desc.best_candidate {
        let metric = match (&c.metric_name, c.metric_value) {
            (Some(name), Some(v)) => format!(" ({name}={v:.6})"),
            (None, Some(v)) => format!(" (objective={v:.6})"),
            _ => String::new(),
        };
        out.push_str(&format!("Best candidate: {}{metric}\n", c.name));
    }
    out
}

/// Forecast table, one row per timestamp and quantile.
pub fn format_forecast_table(rows: &[ForecastResult]) -> String {
    let mut out = String::new();
    out.push_str(&table_line(&format!(
        "{:<24} {:<10} {:>8} {:>14}",
        "partner_id", "timestamp", "quantile", "value"
    )));
    out.push_str(&table_line(&format!("{:-<24} {:-<10} {:->8} {:->14}", "", "", "", "")));
    for r in rows {
        out.push_str(&table_line(&format!(
            "{:<24} {:<10} {:>8} {:>14.2}",
            truncate(&r.partner_id, 24),
            r.timestamp,
            r.quantile.label(),
            r.value
        )));
    }
    out
}

fn table_line(s: &str) -> String {
    format!("{}\n", s.trim_end())
}

fn opt_count(n: Option<usize>) -> String {
    n.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::cloud::JobStatus;
    use crate::domain::{Candidate, Quantile};

    #[test]
    fn forecast_table_has_one_line_per_row() {
        let rows = vec![ForecastResult {
            partner_id: "P1".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
            quantile: Quantile::new(0.5).unwrap(),
            value: 1234.5,
        }];
        let table = format_forecast_table(&rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("P1"));
        assert!(lines[2].contains("2024-08-01"));
        assert!(lines[2].contains("p50"));
        assert!(lines[2].ends_with("1234.50"));
    }

    #[test]
    fn job_status_shows_candidate_and_reason() {
        let desc = JobDescription {
            job_name: "rf-240101000000".to_string(),
            job_arn: None,
            status: JobStatus::Failed,
            secondary_status: Some("Failed".to_string()),
            failure_reason: Some("ClientError: bad input".to_string()),
            best_candidate: Some(Candidate {
                name: "c1".to_string(),
                metric_name: Some("AverageWeightedQuantileLoss".to_string()),
                metric_value: Some(0.25),
            }),
            created: None,
            ended: None,
        };
        let text = format_job_status(&desc);
        assert!(text.contains("Status: failed (Failed)"));
        assert!(text.contains("Failure: ClientError: bad input"));
        assert!(text.contains("Best candidate: c1 (AverageWeightedQuantileLoss=0.250000)"));
    }

    #[test]
    fn truncate_marks_cut_ids() {
        assert_eq!(truncate("ABCDEFGH", 5), "ABCD.");
        assert_eq!(truncate("ABC", 5), "ABC");
    }
}
