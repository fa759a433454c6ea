//! Application error type.
//!
//! Every fatal failure maps to a stable process exit code so wrapper scripts can
//! tell a bad input file apart from a failed training job.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::Quantile;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("schema validation failed at line {line}, field `{field}`: {message}")]
    SchemaValidation {
        line: usize,
        field: String,
        message: String,
    },

    #[error("no valid rows remain after validation ({rejected} rejected)")]
    NoValidRows { rejected: usize },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage error for s3://{bucket}/{key}: {message}{}", request_suffix(request_id))]
    Storage {
        bucket: String,
        key: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("{operation} failed: {code}: {message}{}", request_suffix(request_id))]
    Service {
        operation: &'static str,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("training job {job_name} ended with status {status}: {reason}")]
    TrainingFailed {
        job_name: String,
        status: String,
        reason: String,
    },

    #[error(
        "training job {job_name} still {last_status} after {}s; the job was not cancelled",
        waited.as_secs()
    )]
    TrainingTimedOut {
        job_name: String,
        last_status: String,
        waited: Duration,
    },

    #[error("quantile {quantile} is not supported by the model (supported: {})", join_quantiles(supported))]
    UnsupportedQuantile {
        quantile: Quantile,
        supported: Vec<Quantile>,
    },

    #[error("invalid forecast request: {0}")]
    InvalidRequest(String),

    #[error("endpoint {endpoint} {kind}: {message}{}", request_suffix(request_id))]
    Endpoint {
        kind: EndpointErrorKind,
        endpoint: String,
        request_id: Option<String>,
        message: String,
    },
}

/// Distinct inference failure classes surfaced by the endpoint adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointErrorKind {
    Throttled,
    NotFound,
    MalformedInput,
    Service,
    Transport,
    MalformedResponse,
}

impl fmt::Display for EndpointErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointErrorKind::Throttled => "throttled",
            EndpointErrorKind::NotFound => "not-found",
            EndpointErrorKind::MalformedInput => "malformed-input",
            EndpointErrorKind::Service => "service",
            EndpointErrorKind::Transport => "transport",
            EndpointErrorKind::MalformedResponse => "malformed-response",
        };
        f.write_str(s)
    }
}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        AppError::Config(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) => 2,
            AppError::SchemaValidation { .. } | AppError::NoValidRows { .. } => 3,
            AppError::Io { .. } | AppError::Storage { .. } => 4,
            AppError::Service { .. } | AppError::TrainingFailed { .. } => 5,
            AppError::TrainingTimedOut { .. } => 6,
            AppError::UnsupportedQuantile { .. } | AppError::InvalidRequest(_) => 7,
            AppError::Endpoint { .. } => 8,
        }
    }
}

fn request_suffix(request_id: &Option<String>) -> String {
    match request_id {
        Some(id) => format!(" (request id {id})"),
        None => String::new(),
    }
}

fn join_quantiles(qs: &[Quantile]) -> String {
    qs.iter().map(|q| q.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_stage() {
        assert_eq!(AppError::config("x").exit_code(), 2);
        let timed_out = AppError::TrainingTimedOut {
            job_name: "job".into(),
            last_status: "running".into(),
            waited: Duration::from_secs(10),
        };
        assert_eq!(timed_out.exit_code(), 6);
        assert!(timed_out.to_string().contains("after 10s"));
    }

    #[test]
    fn service_errors_carry_request_id() {
        let err = AppError::Storage {
            bucket: "b".into(),
            key: "data/x.csv".into(),
            message: "AccessDenied".into(),
            request_id: Some("REQ1".into()),
        };
        assert_eq!(
            err.to_string(),
            "storage error for s3://b/data/x.csv: AccessDenied (request id REQ1)"
        );
    }
}
