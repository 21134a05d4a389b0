//! AWS Signature Version 4 for object-store requests
//!
//! Only the header-based flavour is implemented: every request carries
//! `x-amz-date`, `x-amz-content-sha256` and an `Authorization` header
//! scoped to `<date>/<region>/s3/aws4_request`.

use crate::config::StorageConfig;
use crate::error::{PageSnapError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const DEFAULT_REGION: &str = "us-east-1";

/// Hex SHA-256 of an empty body
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[derive(Clone, PartialEq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Keys from `output.storage`, else `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
    ///
    /// A pair is only used when both halves are present.
    pub fn resolve(storage: &StorageConfig) -> Option<Self> {
        Self::resolve_with(storage, |name| std::env::var(name).ok())
    }

    pub(crate) fn resolve_with(
        storage: &StorageConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Option<Self> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());

        if let (Some(id), Some(secret)) = (
            non_empty(storage.access_key_id.clone()),
            non_empty(storage.secret_access_key.clone()),
        ) {
            return Some(Self {
                access_key_id: id,
                secret_access_key: secret,
                session_token: non_empty(storage.session_token.clone()),
            });
        }

        let id = non_empty(env("AWS_ACCESS_KEY_ID"))?;
        let secret = non_empty(env("AWS_SECRET_ACCESS_KEY"))?;
        Some(Self {
            access_key_id: id,
            secret_access_key: secret,
            session_token: non_empty(env("AWS_SESSION_TOKEN")),
        })
    }
}

/// `storage.region`, then `AWS_REGION`, then `AWS_DEFAULT_REGION`, then us-east-1
pub fn resolve_region(storage: &StorageConfig) -> String {
    resolve_region_with(storage, |name| std::env::var(name).ok())
}

pub(crate) fn resolve_region_with(
    storage: &StorageConfig,
    env: impl Fn(&str) -> Option<String>,
) -> String {
    storage
        .region
        .clone()
        .or_else(|| env("AWS_REGION"))
        .or_else(|| env("AWS_DEFAULT_REGION"))
        .filter(|region| !region.is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

/// The parts of an HTTP request that go into the signature
#[derive(Debug, Clone)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    /// `host` or `host:port`, exactly as sent in the Host header
    pub host: &'a str,
    /// Already URI-encoded absolute path
    pub path: &'a str,
    /// Already canonical query string, see [`canonical_query`]
    pub query: &'a str,
    /// Additional headers to sign
    pub headers: &'a [(&'a str, &'a str)],
    pub payload_sha256: &'a str,
}

pub struct RequestSigner {
    credentials: AwsCredentials,
    region: String,
}

impl RequestSigner {
    pub fn new(credentials: AwsCredentials, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Headers to add to the request, `authorization` included.
    pub fn sign(
        &self,
        request: &SignableRequest<'_>,
        at: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>> {
        let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
        let date = at.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/{SERVICE}/aws4_request", self.region);

        let mut headers: Vec<(String, String)> = vec![
            ("host".to_string(), request.host.to_string()),
            (
                "x-amz-content-sha256".to_string(),
                request.payload_sha256.to_string(),
            ),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        for (name, value) in request.headers {
            headers.push((name.to_ascii_lowercase(), value.trim().to_string()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();
        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method,
            request.path,
            request.query,
            canonical_headers,
            signed_headers,
            request.payload_sha256
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac(secret.as_bytes(), date.as_bytes())?;
        let k_region = hmac(&k_date, self.region.as_bytes())?;
        let k_service = hmac(&k_region, SERVICE.as_bytes())?;
        let k_signing = hmac(&k_service, b"aws4_request")?;
        let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

        let authorization = format!(
            "{ALGORITHM} Credential={}/{scope},SignedHeaders={signed_headers},Signature={signature}",
            self.credentials.access_key_id
        );

        let mut out = vec![
            ("x-amz-date".to_string(), amz_date),
            (
                "x-amz-content-sha256".to_string(),
                request.payload_sha256.to_string(),
            ),
        ];
        if let Some(token) = &self.credentials.session_token {
            out.push(("x-amz-security-token".to_string(), token.clone()));
        }
        out.push(("authorization".to_string(), authorization));
        Ok(out)
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| PageSnapError::Storage(format!("request signing failed: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Hex SHA-256 of a request body
pub fn payload_sha256(body: &[u8]) -> String {
    if body.is_empty() {
        return EMPTY_PAYLOAD_SHA256.to_string();
    }
    hex::encode(Sha256::digest(body))
}

/// Percent-encode everything but unreserved characters (and `/` unless `encode_slash`).
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Encode and sort query parameters the way the signature expects.
pub fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(name, value)| (uri_encode(name, true), uri_encode(value, true)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}
