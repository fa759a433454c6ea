//! Upload, submit and poll one training job.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::cloud::http::is_transient_code;
use crate::cloud::{AutoMlClient, JobDescription, JobStatus, ObjectStore};
use crate::config::Settings;
use crate::domain::{ModelRef, PeriodType};
use crate::error::AppError;
use crate::io::write_model_ref_json;
use crate::train::job::{JobSpec, job_name};

const CSV_CONTENT_TYPE: &str = "text/csv";

/// Consecutive transient describe failures tolerated while polling.
const MAX_DESCRIBE_FAILURES: u32 = 3;

/// One `rf train` invocation.
#[derive(Debug, Clone)]
pub struct TrainRequest {
    /// Combined training CSV produced by preprocessing.
    pub data_file: PathBuf,
    pub period_type: PeriodType,
    pub job_suffix: Option<String>,
    /// When false the file is assumed to be in the bucket already.
    pub upload: bool,
    pub summary_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub job_arn: String,
    pub description: JobDescription,
    pub model_ref: ModelRef,
    pub summary_path: PathBuf,
    pub waited: Duration,
}

pub struct Trainer<'a, C, S> {
    client: &'a C,
    store: &'a S,
    settings: &'a Settings,
}

impl<'a, C: AutoMlClient, S: ObjectStore> Trainer<'a, C, S> {
    pub fn new(client: &'a C, store: &'a S, settings: &'a Settings) -> Self {
        Self {
            client,
            store,
            settings,
        }
    }

    pub fn train(&self, request: &TrainRequest) -> Result<TrainOutcome, AppError> {
        let settings = self.settings;
        let file_name = request
            .data_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                AppError::config(format!("invalid training data path '{}'", request.data_file.display()))
            })?;

        let name = job_name(request.job_suffix.as_deref(), Utc::now());
        let spec = JobSpec::from_settings(settings, name, settings.data_uri(file_name), request.period_type)?;

        if request.upload {
            let body = std::fs::read(&request.data_file).map_err(|e| AppError::io(&request.data_file, e))?;
            let key = settings.data_key(file_name);
            info!(bucket = %settings.bucket, key = %key, bytes = body.len(), "uploading training data");
            self.store.put_object(&settings.bucket, &key, CSV_CONTENT_TYPE, body)?;
        } else {
            info!(uri = %spec.input_uri, "skipping upload; using existing object");
        }

        let job_arn = self.client.submit_job(&spec)?;
        info!(job = %spec.job_name, arn = %job_arn, "submitted training job");

        let started = Instant::now();
        let description = wait_for_job(self.client, &spec.job_name, settings.poll_interval, settings.poll_timeout)?;
        ensure_succeeded(&description)?;

        let model_ref = ModelRef {
            job_name: Some(description.job_name.clone()),
            candidate: description.best_candidate.clone(),
            endpoint_name: settings.endpoint_name.clone(),
            period_type: request.period_type,
            horizon: settings.horizon,
            quantiles: settings.quantiles.clone(),
        };
        if model_ref.candidate.is_none() {
            warn!(job = %spec.job_name, "job completed without a best candidate");
        }
        write_model_ref_json(&request.summary_path, &model_ref)?;
        info!(path = %request.summary_path.display(), "wrote training summary");

        Ok(TrainOutcome {
            job_arn,
            description,
            model_ref,
            summary_path: request.summary_path.clone(),
            waited: started.elapsed(),
        })
    }
}

/// Poll until the job is terminal or `timeout` has elapsed.
///
/// The job is described at least once. A timed-out job keeps running.
/// Throttling and transport failures are polled through, up to
/// `MAX_DESCRIBE_FAILURES` in a row.
pub fn wait_for_job<C: AutoMlClient>(
    client: &C,
    job_name: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<JobDescription, AppError> {
    let started = Instant::now();
    let mut failures = 0;
    loop {
        let description = match client.describe_job(job_name) {
            Ok(description) => {
                failures = 0;
                description
            }
            Err(e) if is_transient(&e) && failures < MAX_DESCRIBE_FAILURES && started.elapsed() < timeout => {
                failures += 1;
                warn!(job = job_name, failures, "describe failed, polling again: {e}");
                std::thread::sleep(interval.min(timeout.saturating_sub(started.elapsed())));
                continue;
            }
            Err(e) => return Err(e),
        };
        if description.status.is_terminal() {
            info!(job = job_name, status = %description.status_line(), "training job finished");
            return Ok(description);
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(AppError::TrainingTimedOut {
                job_name: job_name.to_string(),
                last_status: description.status_line(),
                waited: elapsed,
            });
        }

        info!(
            job = job_name,
            status = %description.status_line(),
            elapsed_secs = elapsed.as_secs(),
            "training in progress"
        );
        std::thread::sleep(interval.min(timeout - elapsed));
    }
}

fn is_transient(err: &AppError) -> bool {
    matches!(err, AppError::Service { code, .. } if is_transient_code(code))
}

/// Turn a failed or stopped job into `TrainingFailed`.
pub fn ensure_succeeded(description: &JobDescription) -> Result<(), AppError> {
    match description.status {
        JobStatus::Succeeded => Ok(()),
        status => Err(AppError::TrainingFailed {
            job_name: description.job_name.clone(),
            status: status.to_string(),
            reason: description
                .failure_reason
                .clone()
                .unwrap_or_else(|| "no failure reason reported".to_string()),
        }),
    }
}

/// `rf status`: describe once, or keep polling with `wait`.
pub fn job_status<C: AutoMlClient>(
    client: &C,
    settings: &Settings,
    job_name: &str,
    wait: bool,
) -> Result<JobDescription, AppError> {
    if !wait {
        return client.describe_job(job_name);
    }
    let description = wait_for_job(client, job_name, settings.poll_interval, settings.poll_timeout)?;
    ensure_succeeded(&description)?;
    Ok(description)
}
