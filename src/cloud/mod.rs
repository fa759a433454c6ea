//! External AutoML service and object storage.
//!
//! The trainer and predictor depend only on the two traits below. The SageMaker
//! and S3 adapters implement them over signed HTTPS; tests substitute stubs.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::domain::Candidate;
use crate::error::AppError;
use crate::train::JobSpec;

pub mod http;
pub mod s3;
pub mod sagemaker;
pub mod sigv4;

pub use s3::S3Store;
pub use sagemaker::SageMakerClient;
pub use sigv4::Credentials;

/// Submit, poll and invoke: the whole surface the pipeline needs from the service.
pub trait AutoMlClient {
    /// Start a training job; returns the job ARN.
    fn submit_job(&self, spec: &JobSpec) -> Result<String, AppError>;

    fn describe_job(&self, job_name: &str) -> Result<JobDescription, AppError>;

    /// Synchronous inference. Returns the raw response body.
    fn invoke_endpoint(&self, endpoint: &str, content_type: &str, body: Vec<u8>) -> Result<Vec<u8>, AppError>;
}

pub trait ObjectStore {
    fn put_object(&self, bucket: &str, key: &str, content_type: &str, body: Vec<u8>) -> Result<(), AppError>;
}

/// Service job status, normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl JobStatus {
    /// Map the service's `AutoMLJobStatus` / `AutoMLJobSecondaryStatus` pair.
    pub fn from_service(status: &str, secondary: Option<&str>) -> Result<Self, String> {
        match status {
            "Completed" => Ok(JobStatus::Succeeded),
            "Failed" => Ok(JobStatus::Failed),
            "Stopped" => Ok(JobStatus::Stopped),
            "InProgress" if secondary == Some("Starting") => Ok(JobStatus::Pending),
            "InProgress" | "Stopping" => Ok(JobStatus::Running),
            other => Err(format!("unknown job status '{other}'")),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Stopped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobDescription {
    pub job_name: String,
    pub job_arn: Option<String>,
    pub status: JobStatus,
    pub secondary_status: Option<String>,
    pub failure_reason: Option<String>,
    pub best_candidate: Option<Candidate>,
    pub created: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
}

impl JobDescription {
    /// Status plus secondary status, e.g. `running (TrainingModels)`.
    pub fn status_line(&self) -> String {
        match &self.secondary_status {
            Some(s) => format!("{} ({s})", self.status),
            None => self.status.to_string(),
        }
    }

    pub fn duration_minutes(&self) -> Option<i64> {
        Some((self.ended? - self.created?).num_minutes())
    }
}

/// Build the production adapters from settings and environment credentials.
pub fn connect(settings: &crate::config::Settings) -> Result<(SageMakerClient, S3Store), AppError> {
    let credentials = Credentials::from_env()?;
    let sagemaker = SageMakerClient::from_settings(settings, credentials.clone())?;
    let store = S3Store::from_settings(settings, credentials)?;
    Ok((sagemaker, store))
}
