//! Endpoint response decoding.
//!
//! Accepted shapes:
//! - `{"predictions": [ {...}, ... ]}`
//! - a top-level array of the same objects
//!
//! Each object carries the item id (`partner_id` or `item_id`), a timestamp
//! (`start_date` or `timestamp`) and one field per quantile label (`p10`, ...)
//! whose value is a number or a numeric string.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::domain::{ForecastRequest, ForecastResult, Quantile};
use crate::io::ingest::parse_date;

const ITEM_KEYS: [&str; 2] = ["partner_id", "item_id"];
const TIMESTAMP_KEYS: [&str; 2] = ["start_date", "timestamp"];

/// Decode forecast rows for the requested partner and quantiles.
///
/// Keeps the first `horizon` timestamps; output is sorted by timestamp, then quantile.
pub fn parse_forecast_response(body: &[u8], request: &ForecastRequest) -> Result<Vec<ForecastResult>, String> {
    let root: Value = serde_json::from_slice(body).map_err(|e| format!("response is not JSON: {e}"))?;
    let rows = match &root {
        Value::Array(rows) => rows,
        Value::Object(obj) => match obj.get("predictions") {
            Some(Value::Array(rows)) => rows,
            _ => return Err("response object has no `predictions` array".to_string()),
        },
        _ => return Err("response must be a JSON array or object".to_string()),
    };

    let mut by_timestamp: BTreeMap<NaiveDate, Vec<(Quantile, f64)>> = BTreeMap::new();
    for (idx, row) in rows.iter().enumerate() {
        let obj = row
            .as_object()
            .ok_or_else(|| format!("prediction {idx} is not an object"))?;

        // Rows without an item id belong to the single requested series.
        if let Some(item) = first_of(obj, &ITEM_KEYS) {
            if scalar_text(item).as_deref() != Some(request.partner_id.as_str()) {
                continue;
            }
        }

        let raw_ts = first_of(obj, &TIMESTAMP_KEYS)
            .and_then(scalar_text)
            .ok_or_else(|| format!("prediction {idx} has no timestamp"))?;
        let timestamp = parse_date(&raw_ts).map_err(|e| format!("prediction {idx}: {e}"))?;

        if by_timestamp.contains_key(&timestamp) {
            continue;
        }

        let mut values = Vec::with_capacity(request.quantiles.len());
        for q in &request.quantiles {
            let label = q.label();
            let value = obj
                .get(&label)
                .and_then(numeric)
                .ok_or_else(|| format!("prediction {idx} ({timestamp}) has no numeric `{label}`"))?;
            values.push((*q, value));
        }
        by_timestamp.insert(timestamp, values);
    }

    if by_timestamp.is_empty() {
        return Err(format!("response has no predictions for partner '{}'", request.partner_id));
    }

    let mut out: Vec<ForecastResult> = by_timestamp
        .into_iter()
        .take(request.horizon)
        .flat_map(|(timestamp, values)| {
            values.into_iter().map(move |(quantile, value)| ForecastResult {
                partner_id: request.partner_id.clone(),
                timestamp,
                quantile,
                value,
            })
        })
        .collect();
    out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.quantile.cmp(&b.quantile)));
    Ok(out)
}

fn first_of<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn numeric(v: &Value) -> Option<f64> {
    let x = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    x.is_finite().then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PeriodType, parse_quantile_list};

    fn request(horizon: usize) -> ForecastRequest {
        ForecastRequest {
            partner_id: "P1".to_string(),
            period_type: PeriodType::Month,
            horizon,
            quantiles: parse_quantile_list("p90,p10").unwrap(),
        }
    }

    #[test]
    fn predictions_object_is_decoded_and_sorted() {
        let body = br#"{"predictions": [
            {"partner_id": "P1", "start_date": "2024-09-01", "p10": 90, "p50": 100, "p90": "110.5"},
            {"partner_id": "P2", "start_date": "2024-08-01", "p10": 1, "p90": 2},
            {"partner_id": "P1", "start_date": "2024-08-01T00:00:00Z", "p10": 80.0, "p90": 120.0}
        ]}"#;
        let out = parse_forecast_response(body, &request(3)).unwrap();
        let rows: Vec<(String, String, f64)> = out
            .iter()
            .map(|r| (r.timestamp.to_string(), r.quantile.label(), r.value))
            .collect();
        assert_eq!(
            rows,
            [
                ("2024-08-01".to_string(), "p10".to_string(), 80.0),
                ("2024-08-01".to_string(), "p90".to_string(), 120.0),
                ("2024-09-01".to_string(), "p10".to_string(), 90.0),
                ("2024-09-01".to_string(), "p90".to_string(), 110.5),
            ]
        );
    }

    #[test]
    fn top_level_array_with_item_id_is_truncated_to_horizon() {
        let body = br#"[
            {"item_id": "P1", "timestamp": "2024-08-01", "p10": 1, "p90": 2},
            {"item_id": "P1", "timestamp": "2024-09-01", "p10": 3, "p90": 4},
            {"item_id": "P1", "timestamp": "2024-10-01", "p10": 5, "p90": 6}
        ]"#;
        let out = parse_forecast_response(body, &request(2)).unwrap();
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|r| r.timestamp < NaiveDate::from_ymd_opt(2024, 10, 1).unwrap()));
    }

    #[test]
    fn missing_quantile_is_malformed() {
        let body = br#"[{"partner_id": "P1", "start_date": "2024-08-01", "p10": 1}]"#;
        let err = parse_forecast_response(body, &request(1)).unwrap_err();
        assert!(err.contains("p90"), "{err}");
    }

    #[test]
    fn other_shapes_are_rejected() {
        assert!(parse_forecast_response(b"not json", &request(1)).is_err());
        assert!(parse_forecast_response(br#"{"result": []}"#, &request(1)).is_err());
        assert!(parse_forecast_response(br#"[{"partner_id": "P2", "start_date": "2024-08-01"}]"#, &request(1)).is_err());
    }
}
