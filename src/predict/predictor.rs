//! Synchronous inference against a deployed endpoint.

use tracing::{info, warn};

use crate::cloud::AutoMlClient;
use crate::config::Settings;
use crate::domain::{ForecastRequest, ForecastResult, ModelRef, RevenueRecord};
use crate::error::{AppError, EndpointErrorKind};
use crate::predict::request::{history_csv_body, validate_request};
use crate::predict::response::parse_forecast_response;

const CSV_CONTENT_TYPE: &str = "text/csv";

pub struct Predictor<'a, C> {
    client: &'a C,
    settings: &'a Settings,
}

impl<'a, C: AutoMlClient> Predictor<'a, C> {
    pub fn new(client: &'a C, settings: &'a Settings) -> Self {
        Self { client, settings }
    }

    /// Validate, invoke and decode. Nothing is sent when validation fails.
    pub fn predict(
        &self,
        request: &ForecastRequest,
        model: &ModelRef,
        history: &[RevenueRecord],
    ) -> Result<Vec<ForecastResult>, AppError> {
        validate_request(request, model)?;
        if history.is_empty() {
            return Err(AppError::InvalidRequest(format!(
                "no history for partner '{}'",
                request.partner_id
            )));
        }

        let body = history_csv_body(history, self.settings)?;
        info!(
            endpoint = %model.endpoint_name,
            partner = %request.partner_id,
            horizon = request.horizon,
            context_rows = history.len(),
            "requesting forecast"
        );
        let raw = self.client.invoke_endpoint(&model.endpoint_name, CSV_CONTENT_TYPE, body)?;

        let results = parse_forecast_response(&raw, request).map_err(|message| AppError::Endpoint {
            kind: EndpointErrorKind::MalformedResponse,
            endpoint: model.endpoint_name.clone(),
            request_id: None,
            message,
        })?;

        let periods = results.len() / request.quantiles.len();
        if periods < request.horizon {
            warn!(
                requested = request.horizon,
                returned = periods,
                "endpoint returned fewer periods than requested"
            );
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use chrono::NaiveDate;

    use super::*;
    use crate::cloud::JobDescription;
    use crate::domain::{PeriodType, parse_quantile_list};
    use crate::predict::request::model_ref_from_settings;
    use crate::train::JobSpec;

    struct StubEndpoint {
        response: Result<Vec<u8>, EndpointErrorKind>,
        calls: RefCell<Vec<(String, String, String)>>,
    }

    impl StubEndpoint {
        fn answering(body: &str) -> Self {
            Self {
                response: Ok(body.as_bytes().to_vec()),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn failing(kind: EndpointErrorKind) -> Self {
            Self {
                response: Err(kind),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl AutoMlClient for StubEndpoint {
        fn submit_job(&self, _: &JobSpec) -> Result<String, AppError> {
            unreachable!("prediction never submits jobs")
        }

        fn describe_job(&self, _: &str) -> Result<JobDescription, AppError> {
            unreachable!("prediction never describes jobs")
        }

        fn invoke_endpoint(&self, endpoint: &str, content_type: &str, body: Vec<u8>) -> Result<Vec<u8>, AppError> {
            self.calls.borrow_mut().push((
                endpoint.to_string(),
                content_type.to_string(),
                String::from_utf8(body).unwrap(),
            ));
            self.response.clone().map_err(|kind| AppError::Endpoint {
                kind,
                endpoint: endpoint.to_string(),
                request_id: Some("req-1".to_string()),
                message: "stubbed failure".to_string(),
            })
        }
    }

    fn settings() -> Settings {
        Settings::from_lookup(|_| None).unwrap()
    }

    fn history() -> Vec<RevenueRecord> {
        (1..=3)
            .map(|m| RevenueRecord {
                partner_id: "P1".to_string(),
                start_date: NaiveDate::from_ymd_opt(2024, m, 1).unwrap(),
                revenue: f64::from(m) * 10.0,
                period_type: PeriodType::Month,
                report_type: "RevenueShare".to_string(),
            })
            .collect()
    }

    fn request(quantiles: &str) -> ForecastRequest {
        ForecastRequest {
            partner_id: "P1".to_string(),
            period_type: PeriodType::Month,
            horizon: 2,
            quantiles: parse_quantile_list(quantiles).unwrap(),
        }
    }

    #[test]
    fn unsupported_quantile_makes_no_call() {
        let settings = settings();
        let client = StubEndpoint::answering("[]");
        let model = model_ref_from_settings(&settings, PeriodType::Month);

        let err = Predictor::new(&client, &settings)
            .predict(&request("0.99"), &model, &history())
            .unwrap_err();

        assert!(matches!(err, AppError::UnsupportedQuantile { .. }));
        assert!(client.calls.borrow().is_empty());
    }

    #[test]
    fn forecast_rows_come_back_sorted() {
        let settings = settings();
        let client = StubEndpoint::answering(
            r#"{"predictions": [
                {"partner_id": "P1", "start_date": "2024-05-01", "p10": 35, "p50": 40, "p90": 45},
                {"partner_id": "P1", "start_date": "2024-04-01", "p10": 30, "p50": 35, "p90": 40}
            ]}"#,
        );
        let model = model_ref_from_settings(&settings, PeriodType::Month);

        let out = Predictor::new(&client, &settings)
            .predict(&request("p50,p10"), &model, &history())
            .unwrap();

        let values: Vec<f64> = out.iter().map(|r| r.value).collect();
        assert_eq!(values, [30.0, 35.0, 35.0, 40.0]);

        let calls = client.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "canvas-prediction-test-model");
        assert_eq!(calls[0].1, "text/csv");
        assert!(calls[0].2.starts_with("partner_id,start_date,revenue\nP1,2024-01-01,10.0\n"), "{}", calls[0].2);
    }

    #[test]
    fn endpoint_errors_pass_through() {
        let settings = settings();
        let client = StubEndpoint::failing(EndpointErrorKind::Throttled);
        let model = model_ref_from_settings(&settings, PeriodType::Month);

        let err = Predictor::new(&client, &settings)
            .predict(&request("p50"), &model, &history())
            .unwrap_err();
        assert!(matches!(err, AppError::Endpoint { kind: EndpointErrorKind::Throttled, .. }));
        assert_eq!(err.exit_code(), 8);
        assert!(err.to_string().contains("request id req-1"));
    }

    #[test]
    fn undecodable_response_is_malformed() {
        let settings = settings();
        let client = StubEndpoint::answering("<html>oops</html>");
        let model = model_ref_from_settings(&settings, PeriodType::Month);

        let err = Predictor::new(&client, &settings)
            .predict(&request("p50"), &model, &history())
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Endpoint { kind: EndpointErrorKind::MalformedResponse, .. }
        ));
    }
}
