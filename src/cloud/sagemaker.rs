//! SageMaker Autopilot V2 control plane and runtime endpoint adapter.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::cloud::http::{AwsHttp, RawResponse, TRANSPORT_ERROR_CODE, parse_error_body};
use crate::cloud::sigv4::{Credentials, SigV4Signer, uri_encode};
use crate::cloud::{AutoMlClient, JobDescription, JobStatus};
use crate::config::Settings;
use crate::domain::{AlgorithmSelection, Candidate};
use crate::error::{AppError, EndpointErrorKind};
use crate::train::JobSpec;

const SERVICE: &str = "sagemaker";
const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const OBJECTIVE_METRIC: &str = "AverageWeightedQuantileLoss";

pub struct SageMakerClient {
    http: AwsHttp,
    api_url: String,
    runtime_url: String,
}

impl SageMakerClient {
    pub fn from_settings(settings: &Settings, credentials: Credentials) -> Result<Self, AppError> {
        let signer = SigV4Signer::new(credentials, settings.region.clone(), SERVICE);
        let http = AwsHttp::new(signer).map_err(AppError::Config)?;
        let api_url = settings
            .sagemaker_api_url
            .clone()
            .unwrap_or_else(|| format!("https://api.sagemaker.{}.amazonaws.com", settings.region));
        let runtime_url = settings
            .sagemaker_runtime_url
            .clone()
            .unwrap_or_else(|| format!("https://runtime.sagemaker.{}.amazonaws.com", settings.region));
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            runtime_url: runtime_url.trim_end_matches('/').to_string(),
        })
    }

    fn call(&self, operation: &'static str, body: &Value) -> Result<RawResponse, AppError> {
        let payload = serde_json::to_vec(body).map_err(|e| AppError::Service {
            operation,
            code: "SerializationError".to_string(),
            message: e.to_string(),
            request_id: None,
        })?;
        let headers = [
            ("content-type".to_string(), JSON_CONTENT_TYPE.to_string()),
            ("x-amz-target".to_string(), format!("SageMaker.{operation}")),
        ];
        let url = format!("{}/", self.api_url);

        debug!(operation, bytes = payload.len(), "calling control plane");
        let resp = self
            .http
            .send(Method::POST, &url, &headers, payload)
            .map_err(|message| AppError::Service {
                operation,
                code: TRANSPORT_ERROR_CODE.to_string(),
                message,
                request_id: None,
            })?;

        if resp.is_success() {
            return Ok(resp);
        }
        let (code, message) = parse_error_body(&resp.body);
        Err(AppError::Service {
            operation,
            code,
            message: format!("HTTP {}: {message}", resp.status),
            request_id: resp.request_id,
        })
    }
}

impl AutoMlClient for SageMakerClient {
    fn submit_job(&self, spec: &JobSpec) -> Result<String, AppError> {
        const OP: &str = "CreateAutoMLJobV2";
        let resp = self.call(OP, &create_job_request(spec))?;
        let parsed: CreateJobResponse = parse_json(OP, &resp)?;
        Ok(parsed.job_arn)
    }

    fn describe_job(&self, job_name: &str) -> Result<JobDescription, AppError> {
        const OP: &str = "DescribeAutoMLJobV2";
        let resp = self.call(OP, &json!({ "AutoMLJobName": job_name }))?;
        let parsed: DescribeJobResponse = parse_json(OP, &resp)?;
        parsed.into_description().map_err(|message| AppError::Service {
            operation: OP,
            code: "UnexpectedResponse".to_string(),
            message,
            request_id: resp.request_id,
        })
    }

    fn invoke_endpoint(&self, endpoint: &str, content_type: &str, body: Vec<u8>) -> Result<Vec<u8>, AppError> {
        let url = format!("{}/endpoints/{}/invocations", self.runtime_url, uri_encode(endpoint, true));
        let headers = [
            ("content-type".to_string(), content_type.to_string()),
            ("accept".to_string(), "application/json".to_string()),
        ];

        debug!(endpoint, bytes = body.len(), "invoking endpoint");
        let resp = self
            .http
            .send(Method::POST, &url, &headers, body)
            .map_err(|message| AppError::Endpoint {
                kind: EndpointErrorKind::Transport,
                endpoint: endpoint.to_string(),
                request_id: None,
                message,
            })?;

        if resp.is_success() {
            return Ok(resp.body);
        }
        let (code, message) = parse_error_body(&resp.body);
        Err(AppError::Endpoint {
            kind: classify_endpoint_failure(resp.status, &code, &message),
            endpoint: endpoint.to_string(),
            request_id: resp.request_id,
            message: format!("HTTP {} {code}: {message}", resp.status),
        })
    }
}

/// CreateAutoMLJobV2 request body for a time-series forecasting job.
pub fn create_job_request(spec: &JobSpec) -> Value {
    let mut ts_config = json!({
        "CompletionCriteria": {
            "MaxAutoMLJobRuntimeInSeconds": spec.max_runtime.as_secs(),
        },
        "ForecastFrequency": spec.period_type.forecast_frequency(),
        "ForecastHorizon": spec.horizon,
        "ForecastQuantiles": spec.quantiles.iter().map(|q| q.label()).collect::<Vec<_>>(),
        "Transformations": {
            "Filling": {
                (spec.target_attribute.clone()): {
                    "middlefill": "zero",
                    "backfill": "zero",
                },
            },
        },
        "TimeSeriesConfig": {
            "TargetAttributeName": spec.target_attribute,
            "TimestampAttributeName": spec.timestamp_attribute,
            "ItemIdentifierAttributeName": spec.item_attribute,
        },
    });

    if let AlgorithmSelection::Only(algorithms) = &spec.algorithms {
        ts_config["CandidateGenerationConfig"] = json!({
            "AlgorithmsConfig": [{
                "AutoMLAlgorithms": algorithms.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
            }],
        });
    }

    json!({
        "AutoMLJobName": spec.job_name,
        "AutoMLJobInputDataConfig": [{
            "ChannelType": "training",
            "ContentType": "text/csv;header=present",
            "CompressionType": "None",
            "DataSource": {
                "S3DataSource": {
                    "S3DataType": "S3Prefix",
                    "S3Uri": spec.input_uri,
                },
            },
        }],
        "OutputDataConfig": { "S3OutputPath": spec.output_uri },
        "AutoMLProblemTypeConfig": { "TimeSeriesForecastingJobConfig": ts_config },
        "AutoMLJobObjective": { "MetricName": OBJECTIVE_METRIC },
        "RoleArn": spec.role_arn,
    })
}

/// Map a failed invocation to an error kind.
pub fn classify_endpoint_failure(status: u16, code: &str, message: &str) -> EndpointErrorKind {
    let code_lc = code.to_ascii_lowercase();
    let message_lc = message.to_ascii_lowercase();
    if status == 429 || code_lc.contains("throttl") {
        EndpointErrorKind::Throttled
    } else if status == 404 || message_lc.contains("not found") || code_lc.contains("notfound") {
        EndpointErrorKind::NotFound
    } else if (400..500).contains(&status) || code_lc == "modelerror" || code_lc.contains("validation") {
        EndpointErrorKind::MalformedInput
    } else {
        EndpointErrorKind::Service
    }
}

fn parse_json<'a, T: Deserialize<'a>>(operation: &'static str, resp: &'a RawResponse) -> Result<T, AppError> {
    serde_json::from_slice(&resp.body).map_err(|e| AppError::Service {
        operation,
        code: "UnexpectedResponse".to_string(),
        message: format!("failed to parse response: {e}"),
        request_id: resp.request_id.clone(),
    })
}

#[derive(Debug, Deserialize)]
struct CreateJobResponse {
    #[serde(rename = "AutoMLJobArn")]
    job_arn: String,
}

#[derive(Debug, Deserialize)]
struct DescribeJobResponse {
    #[serde(rename = "AutoMLJobName")]
    job_name: String,
    #[serde(rename = "AutoMLJobArn", default)]
    job_arn: Option<String>,
    #[serde(rename = "AutoMLJobStatus")]
    status: String,
    #[serde(rename = "AutoMLJobSecondaryStatus", default)]
    secondary_status: Option<String>,
    #[serde(rename = "FailureReason", default)]
    failure_reason: Option<String>,
    #[serde(rename = "BestCandidate", default)]
    best_candidate: Option<WireCandidate>,
    #[serde(rename = "CreationTime", default)]
    creation_time: Option<f64>,
    #[serde(rename = "EndTime", default)]
    end_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    #[serde(rename = "CandidateName")]
    name: String,
    #[serde(rename = "FinalAutoMLJobObjectiveMetric", default)]
    objective: Option<WireMetric>,
}

#[derive(Debug, Deserialize)]
struct WireMetric {
    #[serde(rename = "MetricName", default)]
    name: Option<String>,
    #[serde(rename = "Value", default)]
    value: Option<f64>,
}

impl DescribeJobResponse {
    fn into_description(self) -> Result<JobDescription, String> {
        let status = JobStatus::from_service(&self.status, self.secondary_status.as_deref())?;
        let best_candidate = self.best_candidate.map(|c| {
            let (metric_name, metric_value) = match c.objective {
                Some(m) => (m.name, m.value),
                None => (None, None),
            };
            Candidate {
                name: c.name,
                metric_name,
                metric_value,
            }
        });
        Ok(JobDescription {
            job_name: self.job_name,
            job_arn: self.job_arn,
            status,
            secondary_status: self.secondary_status,
            failure_reason: self.failure_reason,
            best_candidate,
            created: self.creation_time.and_then(epoch_seconds),
            ended: self.end_time.and_then(epoch_seconds),
        })
    }
}

fn epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::{Algorithm, PeriodType, parse_quantile_list};

    fn spec(algorithms: AlgorithmSelection) -> JobSpec {
        JobSpec {
            job_name: "rf-test-240101000000".to_string(),
            input_uri: "s3://bucket/data/train_MONTH.csv".to_string(),
            output_uri: "s3://bucket/artifact".to_string(),
            role_arn: "arn:aws:iam::123456789012:role/automl".to_string(),
            target_attribute: "revenue".to_string(),
            timestamp_attribute: "start_date".to_string(),
            item_attribute: "partner_id".to_string(),
            period_type: PeriodType::Month,
            horizon: 4,
            quantiles: parse_quantile_list("p10,p50,p90").unwrap(),
            algorithms,
            max_runtime: Duration::from_secs(1800),
        }
    }

    #[test]
    fn create_request_shape() {
        let body = create_job_request(&spec(AlgorithmSelection::Only(vec![Algorithm::CnnQr, Algorithm::Ets])));
        let ts = &body["AutoMLProblemTypeConfig"]["TimeSeriesForecastingJobConfig"];
        assert_eq!(ts["ForecastFrequency"], "1M");
        assert_eq!(ts["ForecastHorizon"], 4);
        assert_eq!(ts["ForecastQuantiles"], json!(["p10", "p50", "p90"]));
        assert_eq!(ts["CompletionCriteria"]["MaxAutoMLJobRuntimeInSeconds"], 1800);
        assert_eq!(ts["Transformations"]["Filling"]["revenue"]["middlefill"], "zero");
        assert_eq!(ts["TimeSeriesConfig"]["ItemIdentifierAttributeName"], "partner_id");
        assert_eq!(
            ts["CandidateGenerationConfig"]["AlgorithmsConfig"][0]["AutoMLAlgorithms"],
            json!(["cnn-qr", "ets"])
        );
        assert_eq!(
            body["AutoMLJobInputDataConfig"][0]["DataSource"]["S3DataSource"]["S3Uri"],
            "s3://bucket/data/train_MONTH.csv"
        );
        assert_eq!(body["AutoMLJobObjective"]["MetricName"], OBJECTIVE_METRIC);
    }

    #[test]
    fn auto_selection_omits_candidates() {
        let body = create_job_request(&spec(AlgorithmSelection::Auto));
        let ts = &body["AutoMLProblemTypeConfig"]["TimeSeriesForecastingJobConfig"];
        assert!(ts.get("CandidateGenerationConfig").is_none());
    }

    #[test]
    fn describe_response_maps_candidate() {
        let raw = br#"{
            "AutoMLJobName": "rf-240101000000",
            "AutoMLJobArn": "arn:aws:sagemaker:eu-west-1:1:automl-job/rf-240101000000",
            "AutoMLJobStatus": "Completed",
            "AutoMLJobSecondaryStatus": "Completed",
            "CreationTime": 1704067200.0,
            "EndTime": 1704069000.5,
            "BestCandidate": {
                "CandidateName": "rf-240101000000-trial-1",
                "FinalAutoMLJobObjectiveMetric": {"MetricName": "AverageWeightedQuantileLoss", "Value": 0.12}
            }
        }"#;
        let parsed: DescribeJobResponse = serde_json::from_slice(raw).unwrap();
        let desc = parsed.into_description().unwrap();
        assert_eq!(desc.status, JobStatus::Succeeded);
        assert_eq!(desc.duration_minutes(), Some(30));
        let best = desc.best_candidate.unwrap();
        assert_eq!(best.name, "rf-240101000000-trial-1");
        assert_eq!(best.metric_value, Some(0.12));
    }

    #[test]
    fn endpoint_failures_are_classified() {
        use EndpointErrorKind::*;
        assert_eq!(classify_endpoint_failure(429, "ThrottlingException", ""), Throttled);
        assert_eq!(
            classify_endpoint_failure(400, "ValidationError", "Endpoint foo of account 1 not found."),
            NotFound
        );
        assert_eq!(classify_endpoint_failure(424, "ModelError", "bad csv"), MalformedInput);
        assert_eq!(classify_endpoint_failure(400, "ValidationError", "bad body"), MalformedInput);
        assert_eq!(classify_endpoint_failure(503, "ServiceUnavailable", ""), Service);
    }
}
