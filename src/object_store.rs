//! Object-store storage variant
//!
//! Artifacts are uploaded under their file name as the object key. Network
//! access goes through [`ObjectStoreClient`] so the variant's semantics can
//! be exercised without a live bucket; [`HttpObjectStoreClient`] talks to
//! any S3-compatible endpoint using path-style addressing, signing each
//! request with AWS Signature Version 4 when credentials are available.

use crate::config::StorageConfig;
use crate::error::{PageSnapError, Result};
use crate::sigv4::{
    self, canonical_query, payload_sha256, uri_encode, AwsCredentials, RequestSigner,
    SignableRequest,
};
use crate::storage::StorageProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

pub struct ObjectStoreStorage {
    bucket: String,
    client: Box<dyn ObjectStoreClient>,
    ttl: Option<Duration>,
}

impl ObjectStoreStorage {
    pub fn new(bucket: impl Into<String>, client: Box<dyn ObjectStoreClient>) -> Self {
        Self {
            bucket: bucket.into(),
            client,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// The bucket comes from `storage.bucket`, falling back to `storage.location`.
    ///
    /// AWS itself (no `endpoint`) requires credentials; a custom endpoint
    /// without credentials gets unsigned requests.
    pub fn from_config(storage: &StorageConfig) -> Result<Self> {
        Self::from_config_with_env(storage, |name| std::env::var(name).ok())
    }

    fn from_config_with_env(
        storage: &StorageConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let bucket = storage
            .bucket
            .as_deref()
            .or(storage.location.as_deref())
            .filter(|bucket| !bucket.is_empty())
            .ok_or_else(|| {
                PageSnapError::Configuration(
                    "the s3 storage provider requires output.storage.bucket".to_string(),
                )
            })?;

        let region = sigv4::resolve_region_with(storage, &env);
        let endpoint = match &storage.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://s3.{region}.amazonaws.com"),
        };

        let mut client = HttpObjectStoreClient::new(&endpoint, &storage.headers)?;
        match AwsCredentials::resolve_with(storage, &env) {
            Some(credentials) => {
                debug!(
                    "Signing object store requests as {} in {}",
                    credentials.access_key_id, region
                );
                client = client.with_signer(RequestSigner::new(credentials, region));
            }
            None if storage.endpoint.is_none() => {
                return Err(PageSnapError::Configuration(
                    "the s3 storage provider requires credentials: set \
                     output.storage.accessKeyId and secretAccessKey, or \
                     AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY"
                        .to_string(),
                ));
            }
            None => warn!(
                "No object store credentials found, requests to {} are sent unsigned",
                endpoint
            ),
        }

        Ok(Self::new(bucket, Box::new(client)).with_ttl(storage.ttl.map(Duration::from_secs)))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl StorageProvider for ObjectStoreStorage {
    async fn save(&self, file_name: &str, data: Vec<u8>) -> Result<String> {
        let content_type = content_type_for(file_name);
        let size = data.len();

        if let Err(e) = self
            .client
            .put_object(&self.bucket, file_name, data, content_type)
            .await
        {
            error!("Failed to upload {} to bucket {}: {}", file_name, self.bucket, e);
            return Err(e);
        }

        debug!("Uploaded {} ({} bytes) to {}", file_name, size, self.bucket);
        Ok(format!("s3://{}/{}", self.bucket, file_name))
    }

    /// Listing or deletion failures are logged, never raised.
    async fn cleanup(&self) -> Result<()> {
        let Some(ttl) = self.ttl else {
            info!("Cleanup skipped: no TTL configured for bucket {}", self.bucket);
            return Ok(());
        };

        let objects = match self.client.list_objects(&self.bucket).await {
            Ok(objects) => objects,
            Err(e) => {
                warn!("Cleanup of bucket {} failed to list objects: {}", self.bucket, e);
                return Ok(());
            }
        };

        let now = Utc::now();
        let mut removed = 0usize;
        for object in objects {
            let expired = (now - object.last_modified)
                .to_std()
                .map(|age| age >= ttl)
                .unwrap_or(false);
            if !expired {
                continue;
            }

            info!("Removing expired object {}/{}", self.bucket, object.key);
            match self.client.delete_object(&self.bucket, &object.key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to delete {}/{}: {}", self.bucket, object.key, e),
            }
        }

        info!("Object store cleanup removed {} object(s)", removed);
        Ok(())
    }
}

/// Content type for an artifact, from its extension
pub fn content_type_for(file_name: &str) -> &'static str {
    match Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Path-style S3-compatible REST client
pub struct HttpObjectStoreClient {
    http: reqwest::Client,
    endpoint: Url,
    /// `host[:port]` as sent in the Host header
    authority: String,
    signer: Option<RequestSigner>,
}

impl HttpObjectStoreClient {
    /// `headers` are sent with every request (e.g. credentials for a gateway).
    pub fn new(endpoint: &str, headers: &BTreeMap<String, String>) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            PageSnapError::Configuration(format!("invalid storage endpoint '{endpoint}': {e}"))
        })?;
        let host = endpoint.host_str().ok_or_else(|| {
            PageSnapError::Configuration(format!("storage endpoint '{endpoint}' has no host"))
        })?;
        let authority = match endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                PageSnapError::Configuration(format!("invalid storage header '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                PageSnapError::Configuration(format!("invalid value for header '{name}': {e}"))
            })?;
            header_map.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| PageSnapError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            authority,
            signer: None,
        })
    }

    pub fn with_signer(mut self, signer: RequestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn is_signed(&self) -> bool {
        self.signer.is_some()
    }

    /// Encoded request path for a bucket, or for one object in it
    fn resource_path(&self, bucket: &str, key: Option<&str>) -> String {
        let mut path = self.endpoint.path().trim_end_matches('/').to_string();
        path.push('/');
        path.push_str(&uri_encode(bucket, true));
        if let Some(key) = key {
            path.push('/');
            path.push_str(&uri_encode(key, false));
        }
        path
    }

    fn request_url(&self, path: &str, query: &str) -> String {
        let mut url = format!("{}://{}{}", self.endpoint.scheme(), self.authority, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<reqwest::RequestBuilder> {
        let query = canonical_query(params);
        let mut request = self
            .http
            .request(method.clone(), self.request_url(path, &query));

        if let Some(signer) = &self.signer {
            let payload = payload_sha256(&body);
            let signed = signer.sign(
                &SignableRequest {
                    method: method.as_str(),
                    host: &self.authority,
                    path,
                    query: &query,
                    headers: &[],
                    payload_sha256: &payload,
                },
                Utc::now(),
            )?;
            for (name, value) in signed {
                request = request.header(name, value);
            }
        }

        if !body.is_empty() {
            request = request.body(body);
        }
        Ok(request)
    }
}

#[async_trait]
impl ObjectStoreClient for HttpObjectStoreClient {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let path = self.resource_path(bucket, Some(key));
        self.request(Method::PUT, &path, &[], body)?
            .header(CONTENT_TYPE, content_type)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| PageSnapError::Storage(format!("upload of {key} failed: {e}")))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>> {
        let path = self.resource_path(bucket, None);
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut params = vec![("list-type", "2")];
            if let Some(token) = &continuation {
                params.push(("continuation-token", token.as_str()));
            }

            let body = self
                .request(Method::GET, &path, &params, Vec::new())?
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(|e| PageSnapError::Storage(format!("listing {bucket} failed: {e}")))?
                .text()
                .await
                .map_err(|e| PageSnapError::Storage(e.to_string()))?;

            let page = parse_list_response(&body)?;
            objects.extend(page.objects);

            match page.next_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        Ok(objects)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.resource_path(bucket, Some(key));
        self.request(Method::DELETE, &path, &[], Vec::new())?
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| PageSnapError::Storage(format!("delete of {key} failed: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub next_token: Option<String>,
}

/// Parse a `ListObjectsV2` XML body.
pub fn parse_list_response(body: &str) -> Result<ListPage> {
    let invalid = |e: regex::Error| PageSnapError::Storage(e.to_string());
    let contents_re = Regex::new(r"(?s)<Contents>(.*?)</Contents>").map_err(invalid)?;
    let key_re = Regex::new(r"(?s)<Key>(.*?)</Key>").map_err(invalid)?;
    let modified_re = Regex::new(r"<LastModified>(.*?)</LastModified>").map_err(invalid)?;
    let truncated_re = Regex::new(r"<IsTruncated>\s*true\s*</IsTruncated>").map_err(invalid)?;
    let token_re =
        Regex::new(r"<NextContinuationToken>(.*?)</NextContinuationToken>").map_err(invalid)?;

    let mut page = ListPage::default();
    for block in contents_re.captures_iter(body) {
        let block = &block[1];
        let Some(key) = key_re.captures(block).map(|c| xml_unescape(&c[1])) else {
            continue;
        };
        let Some(last_modified) = modified_re
            .captures(block)
            .and_then(|c| DateTime::parse_from_rfc3339(c[1].trim()).ok())
        else {
            warn!("Skipping object {} with unreadable LastModified", key);
            continue;
        };

        page.objects.push(ObjectSummary {
            key,
            last_modified: last_modified.with_timezone(&Utc),
        });
    }

    if truncated_re.is_match(body) {
        page.next_token = token_re.captures(body).map(|c| xml_unescape(&c[1]));
    }

    Ok(page)
}

fn xml_unescape(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_save_uploads_with_content_type() {
        let mut client = MockObjectStoreClient::new();
        client
            .expect_put_object()
            .withf(|bucket, key, body, content_type| {
                bucket == "snaps" && key == "a_test_page.jpg" && body == &vec![9u8, 9]
                    && content_type == "image/jpeg"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let storage = ObjectStoreStorage::new("snaps", Box::new(client));
        let locator = storage.save("a_test_page.jpg", vec![9, 9]).await.unwrap();
        assert_eq!(locator, "s3://snaps/a_test_page.jpg");
    }

    #[tokio::test]
    async fn test_upload_failure_is_reraised() {
        let mut client = MockObjectStoreClient::new();
        client
            .expect_put_object()
            .returning(|_, _, _, _| Err(PageSnapError::Storage("access denied".to_string())));

        let storage = ObjectStoreStorage::new("snaps", Box::new(client));
        let err = storage.save("x.png", vec![1]).await.unwrap_err();
        assert!(matches!(err, PageSnapError::Storage(ref m) if m == "access denied"));
    }

    #[tokio::test]
    async fn test_cleanup_deletes_only_expired_objects() {
        let now = Utc::now();
        let listing = vec![
            ObjectSummary {
                key: "old.png".to_string(),
                last_modified: now - chrono::Duration::hours(2),
            },
            ObjectSummary {
                key: "fresh.png".to_string(),
                last_modified: now,
            },
        ];

        let mut client = MockObjectStoreClient::new();
        client
            .expect_list_objects()
            .with(eq("snaps"))
            .returning(move |_| Ok(listing.clone()));
        client
            .expect_delete_object()
            .with(eq("snaps"), eq("old.png"))
            .times(1)
            .returning(|_, _| Ok(()));

        let storage = ObjectStoreStorage::new("snaps", Box::new(client))
            .with_ttl(Some(Duration::from_secs(3600)));
        storage.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_swallows_listing_errors() {
        let mut client = MockObjectStoreClient::new();
        client
            .expect_list_objects()
            .returning(|_| Err(PageSnapError::Storage("timeout".to_string())));
        client.expect_delete_object().never();

        let storage = ObjectStoreStorage::new("snaps", Box::new(client))
            .with_ttl(Some(Duration::from_secs(1)));
        assert!(storage.cleanup().await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_without_ttl_touches_nothing() {
        let mut client = MockObjectStoreClient::new();
        client.expect_list_objects().never();

        let storage = ObjectStoreStorage::new("snaps", Box::new(client));
        assert!(storage.cleanup().await.is_ok());
    }

    #[test]
    fn test_missing_bucket_is_a_configuration_error() {
        let storage = StorageConfig {
            provider: "s3".to_string(),
            ..Default::default()
        };
        let err = ObjectStoreStorage::from_config(&storage).err().unwrap();
        assert!(matches!(err, PageSnapError::Configuration(_)));
    }

    #[test]
    fn test_from_config_with_bucket() {
        let storage = StorageConfig {
            provider: "s3".to_string(),
            bucket: Some("snaps".to_string()),
            endpoint: Some("http://localhost:9000/".to_string()),
            ..Default::default()
        };
        let storage = ObjectStoreStorage::from_config_with_env(&storage, |_| None).unwrap();
        assert_eq!(storage.bucket(), "snaps");
    }

    #[test]
    fn test_aws_without_credentials_is_a_configuration_error() {
        let storage = StorageConfig {
            provider: "s3".to_string(),
            bucket: Some("snaps".to_string()),
            ..Default::default()
        };
        let err = ObjectStoreStorage::from_config_with_env(&storage, |_| None)
            .err()
            .unwrap();
        assert!(matches!(err, PageSnapError::Configuration(ref m) if m.contains("credentials")));

        let env = |name: &str| match name {
            "AWS_ACCESS_KEY_ID" => Some("AKID".to_string()),
            "AWS_SECRET_ACCESS_KEY" => Some("secret".to_string()),
            _ => None,
        };
        assert!(ObjectStoreStorage::from_config_with_env(&storage, env).is_ok());
    }

    #[test]
    fn test_resource_paths_keep_endpoint_prefix_and_port() {
        let client =
            HttpObjectStoreClient::new("http://localhost:9000/gateway/", &BTreeMap::new())
                .unwrap();
        assert!(!client.is_signed());
        assert_eq!(client.authority, "localhost:9000");

        let path = client.resource_path("snaps", Some("a test.png"));
        assert_eq!(path, "/gateway/snaps/a%20test.png");
        assert_eq!(
            client.request_url(&path, "list-type=2"),
            "http://localhost:9000/gateway/snaps/a%20test.png?list-type=2"
        );

        let aws = HttpObjectStoreClient::new("https://s3.us-east-1.amazonaws.com", &BTreeMap::new())
            .unwrap()
            .with_signer(RequestSigner::new(AwsCredentials::new("AKID", "secret"), "us-east-1"));
        assert!(aws.is_signed());
        assert_eq!(aws.authority, "s3.us-east-1.amazonaws.com");
        assert_eq!(aws.resource_path("snaps", None), "/snaps");
    }

    #[test]
    fn test_signed_request_carries_authorization() {
        let client = HttpObjectStoreClient::new("http://localhost:9000", &BTreeMap::new())
            .unwrap()
            .with_signer(RequestSigner::new(AwsCredentials::new("AKID", "secret"), "us-east-1"));

        let request = client
            .request(Method::PUT, "/snaps/a.png", &[], b"png".to_vec())
            .unwrap()
            .build()
            .unwrap();

        let headers = request.headers();
        let authorization = headers["authorization"].to_str().unwrap();
        assert!(authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKID/"));
        assert_eq!(
            headers["x-amz-content-sha256"].to_str().unwrap(),
            payload_sha256(b"png")
        );
        assert!(headers.contains_key("x-amz-date"));
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        assert!(matches!(
            HttpObjectStoreClient::new("not a url", &BTreeMap::new()),
            Err(PageSnapError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            HttpObjectStoreClient::new("http://localhost:9000", &headers),
            Err(PageSnapError::Configuration(_))
        ));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.jpg"), "image/jpeg");
        assert_eq!(content_type_for("a.pdf"), "application/pdf");
        assert_eq!(content_type_for("a"), "application/octet-stream");
    }

    #[test]
    fn test_parse_list_response() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Name>snaps</Name>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>abc&amp;def</NextContinuationToken>
  <Contents>
    <Key>example_com.png</Key>
    <LastModified>2024-03-01T12:00:00.000Z</LastModified>
    <Size>1024</Size>
  </Contents>
  <Contents>
    <Key>a_test_page.pdf</Key>
    <LastModified>2024-03-02T08:30:00Z</LastModified>
  </Contents>
</ListBucketResult>"#;

        let page = parse_list_response(body).unwrap();
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.objects[0].key, "example_com.png");
        assert_eq!(
            page.objects[1].last_modified,
            DateTime::parse_from_rfc3339("2024-03-02T08:30:00Z")
                .unwrap()
                .with_timezone(&Utc)
        );
        assert_eq!(page.next_token.as_deref(), Some("abc&def"));
    }
}
