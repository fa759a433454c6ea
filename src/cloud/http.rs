//! Signed blocking HTTP shared by the AWS adapters.

use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::Deserialize;
use tracing::warn;

use crate::cloud::sigv4::{SigV4Signer, SignableRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Attempts per request, the first included.
const MAX_ATTEMPTS: u32 = 4;
/// Delay before the first retry; doubles on each further retry.
const BASE_BACKOFF: Duration = Duration::from_millis(250);

/// Code reported when no HTTP response came back at all.
pub const TRANSPORT_ERROR_CODE: &str = "TransportError";

const THROTTLING_CODES: [&str; 7] = [
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestThrottled",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "SlowDown",
];

const SERVER_FAULT_CODES: [&str; 4] = ["InternalFailure", "InternalError", "InternalServerError", "ServiceUnavailable"];

/// Error codes worth another attempt: throttling, server faults and lost connections.
pub fn is_transient_code(code: &str) -> bool {
    code == TRANSPORT_ERROR_CODE || THROTTLING_CODES.contains(&code) || SERVER_FAULT_CODES.contains(&code)
}

/// Response with the bits every adapter inspects.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub request_id: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct AwsHttp {
    client: Client,
    signer: SigV4Signer,
}

impl AwsHttp {
    pub fn new(signer: SigV4Signer) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self { client, signer })
    }

    /// Sign and send a request. `Err` means no HTTP response was received.
    ///
    /// Throttling, 5xx responses and connection failures are retried with
    /// exponential backoff; the last response is returned as-is.
    pub fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<RawResponse, String> {
        let parsed = Url::parse(url).map_err(|e| format!("invalid URL '{url}': {e}"))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => return Err(format!("URL '{url}' has no host")),
        };

        retry_transient(MAX_ATTEMPTS, BASE_BACKOFF, |_| {
            self.send_once(method.clone(), &parsed, &host, headers, &body)
        })
    }

    fn send_once(
        &self,
        method: Method,
        url: &Url,
        host: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Result<RawResponse, SendError> {
        let signable = SignableRequest {
            method: method.as_str(),
            host,
            path: url.path(),
            headers,
            payload: body,
        };
        let auth_headers = self
            .signer
            .sign(&signable, Utc::now())
            .map_err(|e| SendError::Fatal(e.to_string()))?;

        let mut header_map = HeaderMap::new();
        for (name, value) in headers.iter().chain(auth_headers.iter()) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SendError::Fatal(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SendError::Fatal(format!("invalid header value for '{name}': {e}")))?;
            header_map.insert(name, value);
        }

        let resp = self
            .client
            .request(method, url.clone())
            .headers(header_map)
            .body(body.to_vec())
            .send()
            .map_err(|e| {
                let message = format!("request failed: {e}");
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    SendError::Transient(message)
                } else {
                    SendError::Fatal(message)
                }
            })?;

        let status = resp.status().as_u16();
        let request_id = ["x-amzn-requestid", "x-amz-request-id"]
            .iter()
            .find_map(|h| resp.headers().get(*h))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .map_err(|e| SendError::Transient(format!("failed to read response body: {e}")))?
            .to_vec();

        Ok(RawResponse {
            status,
            request_id,
            body,
        })
    }
}

/// Why an attempt produced no response.
#[derive(Debug)]
enum SendError {
    /// Worth another attempt.
    Transient(String),
    Fatal(String),
}

impl SendError {
    fn into_message(self) -> String {
        match self {
            SendError::Transient(m) | SendError::Fatal(m) => m,
        }
    }
}

/// True when a response should be retried: 429, 5xx or a throttling error code.
pub fn is_retryable(resp: &RawResponse) -> bool {
    if resp.is_success() {
        return false;
    }
    if resp.status == 429 || resp.status >= 500 {
        return true;
    }
    let (code, _) = parse_error_body(&resp.body);
    is_transient_code(&code)
}

/// Run `attempt` until it succeeds, fails for good or `max_attempts` is reached.
///
/// `attempt` receives the 1-based attempt number.
fn retry_transient<F>(max_attempts: u32, base_backoff: Duration, mut attempt: F) -> Result<RawResponse, String>
where
    F: FnMut(u32) -> Result<RawResponse, SendError>,
{
    let mut n = 1;
    loop {
        let outcome = attempt(n);
        let retry = match &outcome {
            Ok(resp) => is_retryable(resp),
            Err(SendError::Transient(_)) => true,
            Err(SendError::Fatal(_)) => false,
        };
        if !retry || n >= max_attempts {
            return outcome.map_err(SendError::into_message);
        }

        let delay = base_backoff.saturating_mul(1 << (n - 1));
        match &outcome {
            Ok(resp) => warn!(attempt = n, status = resp.status, delay_ms = delay.as_millis() as u64, "retrying AWS request"),
            Err(e) => warn!(attempt = n, delay_ms = delay.as_millis() as u64, "retrying AWS request: {e:?}"),
        }
        std::thread::sleep(delay);
        n += 1;
    }
}

/// `(code, message)` from an AWS JSON or S3 XML error body.
pub fn parse_error_body(body: &[u8]) -> (String, String) {
    #[derive(Deserialize)]
    struct JsonError {
        #[serde(rename = "__type")]
        kind: Option<String>,
        #[serde(alias = "Message")]
        message: Option<String>,
    }

    if let Ok(err) = serde_json::from_slice::<JsonError>(body) {
        let code = err
            .kind
            .map(|k| k.rsplit('#').next().unwrap_or_default().to_string())
            .unwrap_or_else(|| "UnknownError".to_string());
        return (code, err.message.unwrap_or_default());
    }

    let text = String::from_utf8_lossy(body);
    match (xml_tag(&text, "Code"), xml_tag(&text, "Message")) {
        (Some(code), message) => (code.to_string(), message.unwrap_or_default().to_string()),
        (None, _) => ("UnknownError".to_string(), text.trim().chars().take(500).collect()),
    }
}

fn xml_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = start + text[start..].find(&close)?;
    Some(&text[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_bodies() {
        let (code, msg) =
            parse_error_body(br#"{"__type":"com.amazonaws.sagemaker#ResourceLimitExceeded","Message":"too many jobs"}"#);
        assert_eq!(code, "ResourceLimitExceeded");
        assert_eq!(msg, "too many jobs");

        let (code, msg) = parse_error_body(br#"{"__type":"ValidationException","message":"bad"}"#);
        assert_eq!((code.as_str(), msg.as_str()), ("ValidationException", "bad"));
    }

    #[test]
    fn xml_error_bodies() {
        let body = b"<?xml version=\"1.0\"?><Error><Code>NoSuchBucket</Code><Message>The bucket does not exist</Message></Error>";
        let (code, msg) = parse_error_body(body);
        assert_eq!(code, "NoSuchBucket");
        assert_eq!(msg, "The bucket does not exist");
    }

    fn response(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            request_id: None,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn throttled_request_is_retried_until_success() {
        let mut calls = 0;
        let resp = retry_transient(4, Duration::ZERO, |n| {
            calls = n;
            if n == 1 {
                Ok(response(400, r#"{"__type":"ThrottlingException","message":"Rate exceeded"}"#))
            } else {
                Ok(response(200, "{}"))
            }
        })
        .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(calls, 2);
    }

    #[test]
    fn lost_connections_and_server_faults_are_retried() {
        let mut calls = 0;
        let resp = retry_transient(4, Duration::ZERO, |n| {
            calls = n;
            match n {
                1 => Err(SendError::Transient("request failed: connection reset".into())),
                2 => Ok(response(503, "")),
                _ => Ok(response(200, "{}")),
            }
        })
        .unwrap();
        assert!(resp.is_success());
        assert_eq!(calls, 3);
    }

    #[test]
    fn retries_are_bounded() {
        let mut calls = 0;
        let resp = retry_transient(3, Duration::ZERO, |n| {
            calls = n;
            Ok(response(500, r#"{"__type":"InternalFailure"}"#))
        })
        .unwrap();
        assert_eq!(resp.status, 500);
        assert_eq!(calls, 3);

        let err = retry_transient(2, Duration::ZERO, |_| Err(SendError::Transient("timed out".into()))).unwrap_err();
        assert_eq!(err, "timed out");
    }

    #[test]
    fn client_errors_are_not_retried() {
        let mut calls = 0;
        let resp = retry_transient(4, Duration::ZERO, |n| {
            calls = n;
            Ok(response(400, r#"{"__type":"ValidationException","message":"bad"}"#))
        })
        .unwrap();
        assert_eq!(resp.status, 400);
        assert_eq!(calls, 1);

        let err = retry_transient(4, Duration::ZERO, |n| {
            calls = n;
            Err(SendError::Fatal("invalid header".into()))
        })
        .unwrap_err();
        assert_eq!(err, "invalid header");
        assert_eq!(calls, 1);
    }

    #[test]
    fn transient_codes() {
        assert!(is_transient_code("ThrottlingException"));
        assert!(is_transient_code(TRANSPORT_ERROR_CODE));
        assert!(is_transient_code("ServiceUnavailable"));
        assert!(!is_transient_code("ValidationException"));
        assert!(!is_transient_code("ResourceNotFound"));
    }

    #[test]
    fn opaque_error_bodies() {
        let (code, msg) = parse_error_body(b"upstream timeout");
        assert_eq!(code, "UnknownError");
        assert_eq!(msg, "upstream timeout");
    }
}
