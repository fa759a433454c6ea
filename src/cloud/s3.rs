//! S3 object upload.

use reqwest::Method;
use tracing::debug;

use crate::cloud::ObjectStore;
use crate::cloud::http::{AwsHttp, parse_error_body};
use crate::cloud::sigv4::{Credentials, SigV4Signer, uri_encode};
use crate::config::Settings;
use crate::error::AppError;

pub struct S3Store {
    http: AwsHttp,
    region: String,
    /// Path-style base URL (`{base}/{bucket}/{key}`) when set, virtual-hosted otherwise.
    endpoint_override: Option<String>,
}

impl S3Store {
    pub fn from_settings(settings: &Settings, credentials: Credentials) -> Result<Self, AppError> {
        let signer = SigV4Signer::new(credentials, settings.region.clone(), "s3").with_content_sha256();
        Ok(Self {
            http: AwsHttp::new(signer).map_err(AppError::Config)?,
            region: settings.region.clone(),
            endpoint_override: settings
                .s3_endpoint_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        let key = uri_encode(key.trim_start_matches('/'), false);
        match &self.endpoint_override {
            Some(base) => format!("{base}/{bucket}/{key}"),
            None => format!("https://{bucket}.s3.{}.amazonaws.com/{key}", self.region),
        }
    }
}

impl ObjectStore for S3Store {
    fn put_object(&self, bucket: &str, key: &str, content_type: &str, body: Vec<u8>) -> Result<(), AppError> {
        let url = self.object_url(bucket, key);
        let headers = [("content-type".to_string(), content_type.to_string())];
        let storage_error = |message: String, request_id: Option<String>| AppError::Storage {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
            request_id,
        };

        debug!(bucket, key, bytes = body.len(), "uploading object");
        let resp = self
            .http
            .send(Method::PUT, &url, &headers, body)
            .map_err(|message| storage_error(message, None))?;

        if resp.is_success() {
            return Ok(());
        }
        let (code, message) = parse_error_body(&resp.body);
        Err(storage_error(
            format!("HTTP {} {code}: {message}", resp.status),
            resp.request_id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(endpoint: Option<&str>) -> Settings {
        let endpoint = endpoint.map(str::to_string);
        Settings::from_lookup(|k| match k {
            "S3_ENDPOINT_URL" => endpoint.clone(),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn virtual_hosted_urls() {
        let store = S3Store::from_settings(&settings(None), Credentials::new("AK", "SK")).unwrap();
        assert_eq!(
            store.object_url("prediction-test-bucket-01", "data/train_MONTH.csv"),
            "https://prediction-test-bucket-01.s3.eu-west-1.amazonaws.com/data/train_MONTH.csv"
        );
    }

    #[test]
    fn path_style_urls_for_local_endpoints() {
        let store =
            S3Store::from_settings(&settings(Some("http://localhost:4566/")), Credentials::new("AK", "SK")).unwrap();
        assert_eq!(
            store.object_url("b", "forecast/data/P 1_MONTH_train.csv"),
            "http://localhost:4566/b/forecast/data/P%201_MONTH_train.csv"
        );
    }
}
