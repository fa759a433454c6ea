//! AWS Signature Version 4 request signing.
//!
//! Only what the adapters need: no query strings, caller-supplied paths that are
//! already URI-encoded, and an optional `x-amz-content-sha256` header (S3).

use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Read the standard `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN` variables.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, AppError> {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        let access_key_id =
            get("AWS_ACCESS_KEY_ID").ok_or_else(|| AppError::config("missing AWS_ACCESS_KEY_ID in environment (.env)"))?;
        let secret = get("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| AppError::config("missing AWS_SECRET_ACCESS_KEY in environment (.env)"))?;
        let mut creds = Credentials::new(access_key_id, secret);
        creds.session_token = get("AWS_SESSION_TOKEN");
        Ok(creds)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The parts of an HTTP request covered by the signature.
#[derive(Debug, Clone)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    /// Host header value, including a non-default port.
    pub host: &'a str,
    /// URI-encoded absolute path.
    pub path: &'a str,
    /// Extra headers to sign (and send).
    pub headers: &'a [(String, String)],
    pub payload: &'a [u8],
}

#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: Credentials,
    region: String,
    service: String,
    sign_content_sha256: bool,
}

impl SigV4Signer {
    pub fn new(credentials: Credentials, region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: service.into(),
            sign_content_sha256: false,
        }
    }

    /// Also sign and emit `x-amz-content-sha256` (required by S3).
    pub fn with_content_sha256(mut self) -> Self {
        self.sign_content_sha256 = true;
        self
    }

    /// Headers to add to the request: `x-amz-date`, optional token/content hash, `authorization`.
    pub fn sign(&self, req: &SignableRequest<'_>, now: DateTime<Utc>) -> Result<Vec<(String, String)>, AppError> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(Sha256::digest(req.payload));

        let mut added: Vec<(String, String)> = vec![("x-amz-date".to_string(), amz_date.clone())];
        if self.sign_content_sha256 {
            added.push(("x-amz-content-sha256".to_string(), payload_hash.clone()));
        }
        if let Some(token) = &self.credentials.session_token {
            added.push(("x-amz-security-token".to_string(), token.clone()));
        }

        let mut signed: Vec<(String, String)> = req
            .headers
            .iter()
            .chain(added.iter())
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        signed.push(("host".to_string(), req.host.to_string()));
        signed.sort();

        let canonical_headers: String = signed.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();
        let signed_headers = signed
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            req.method, req.path, canonical_headers, signed_headers, payload_hash
        );

        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac(format!("AWS4{}", self.credentials.secret_access_key).as_bytes(), date.as_bytes())?;
        let k_region = hmac(&k_date, self.region.as_bytes())?;
        let k_service = hmac(&k_region, self.service.as_bytes())?;
        let k_signing = hmac(&k_service, b"aws4_request")?;
        let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

        added.push((
            "authorization".to_string(),
            format!(
                "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                self.credentials.access_key_id
            ),
        ));
        Ok(added)
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, AppError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| AppError::config(format!("invalid signing key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Percent-encode per SigV4 rules; `/` is kept when `encode_slash` is false.
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
