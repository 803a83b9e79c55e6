//! Signed object-storage client.
//!
//! Persists personality document bytes to an S3-compatible HTTP endpoint
//! (Cloudflare R2, MinIO, AWS S3) using AWS Signature V4 authentication.
//! Only the three operations the registry needs are implemented: PUT, GET,
//! and DELETE of a single object.
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for AWS signing — no
//! vendor SDK and no C library dependencies, making it compatible with
//! all build environments including Nix.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! endpoint_url = "https://<account>.r2.cloudflarestorage.com"
//! bucket = "opensoul"
//! region = "auto"
//! timeout_secs = 30
//! ```
//!
//! Credentials come from the config file or, when absent there, from the
//! `OPENSOUL_STORAGE_ACCESS_KEY_ID` and `OPENSOUL_STORAGE_SECRET_ACCESS_KEY`
//! environment variables.
//!
//! # Signing
//!
//! Requests are signed with
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html)
//! using HMAC-SHA256 (`hmac` + `sha2` crates). The payload is never
//! hashed — the canonical request carries the literal `UNSIGNED-PAYLOAD`
//! token. Transport is TLS and object identity is content-addressed at a
//! higher layer, so payload signing buys nothing here. Query parameters
//! are never signed; every request addresses a bare object path.
//!
//! # Failure semantics
//!
//! A non-2xx response on PUT or DELETE raises an error carrying the status
//! and response body. GET folds every non-2xx response (404 included) into
//! "absent": the only caller behavior on absence is "treat as missing",
//! never retry-with-backoff, so the distinction carries no information.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// A signed storage client bound to one bucket on one endpoint.
///
/// Holds no connection pool or retry state; each call is independent and
/// idempotent (PUT/DELETE), or naturally idempotent (GET).
pub struct StorageClient {
    scheme: String,
    host: String,
    bucket: String,
    region: String,
    access_key_id: String,
    secret_access_key: String,
    http: reqwest::Client,
}

/// Headers produced by signing one request at one instant.
struct SignedRequest {
    amz_date: String,
    authorization: String,
    /// Hex HMAC signature, exposed separately for the golden-vector test.
    signature: String,
}

impl StorageClient {
    /// Build a client from configuration, resolving credentials from the
    /// config file first and the environment second.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        if config.endpoint_url.trim().is_empty() {
            bail!("storage.endpoint_url is not configured");
        }

        let access_key_id = match &config.access_key_id {
            Some(key) => key.clone(),
            None => std::env::var("OPENSOUL_STORAGE_ACCESS_KEY_ID")
                .context("storage access key not set (config or OPENSOUL_STORAGE_ACCESS_KEY_ID)")?,
        };
        let secret_access_key = match &config.secret_access_key {
            Some(key) => key.clone(),
            None => std::env::var("OPENSOUL_STORAGE_SECRET_ACCESS_KEY").context(
                "storage secret key not set (config or OPENSOUL_STORAGE_SECRET_ACCESS_KEY)",
            )?,
        };

        let scheme = if config.endpoint_url.starts_with("http://") {
            "http"
        } else {
            "https"
        };
        let host = config
            .endpoint_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            scheme: scheme.to_string(),
            host,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            access_key_id,
            secret_access_key,
            http,
        })
    }

    /// Upload an object. Returns its location URL.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.object_path(key);
        let url = self.url_for(&path);
        let signed = self.sign("PUT", &path, Utc::now());

        let resp = self
            .http
            .put(&url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header("x-amz-date", &signed.amz_date)
            .body(bytes.to_vec())
            .send()
            .await
            .with_context(|| format!("Failed to PUT storage object '{}'", key))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "storage PUT failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }

        Ok(url)
    }

    /// Download an object. Any non-2xx response (404 included) is "absent".
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(key);
        let signed = self.sign("GET", &path, Utc::now());

        let resp = self
            .http
            .get(self.url_for(&path))
            .header("Authorization", &signed.authorization)
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header("x-amz-date", &signed.amz_date)
            .send()
            .await
            .with_context(|| format!("Failed to GET storage object '{}'", key))?;

        if !resp.status().is_success() {
            return Ok(None);
        }

        Ok(Some(resp.bytes().await?.to_vec()))
    }

    /// Delete an object. Deleting a missing key succeeds (S3 returns 204).
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key);
        let signed = self.sign("DELETE", &path, Utc::now());

        let resp = self
            .http
            .delete(self.url_for(&path))
            .header("Authorization", &signed.authorization)
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header("x-amz-date", &signed.amz_date)
            .send()
            .await
            .with_context(|| format!("Failed to DELETE storage object '{}'", key))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "storage DELETE failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }

        Ok(())
    }

    /// Public URL of an object (path-style addressing).
    pub fn object_url(&self, key: &str) -> String {
        self.url_for(&self.object_path(key))
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.host, path)
    }

    /// Path-style canonical URI: `/{bucket}/{encoded key}`.
    fn object_path(&self, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        format!("/{}/{}", self.bucket, encoded_key)
    }

    /// Sign one request at one instant.
    ///
    /// The canonical request is built from the method, the path, an empty
    /// query string, the sorted signed-header block (`host`,
    /// `x-amz-content-sha256`, `x-amz-date`), and the `UNSIGNED-PAYLOAD`
    /// token. A pure function of (credentials, method, path, timestamp),
    /// so the output is deterministic for a fixed clock.
    fn sign(&self, method: &str, path: &str, now: DateTime<Utc>) -> SignedRequest {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), self.host.clone()),
            (
                "x-amz-content-sha256".to_string(),
                UNSIGNED_PAYLOAD.to_string(),
            ),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, path, canonical_headers, signed_headers, UNSIGNED_PAYLOAD
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key_id, credential_scope, signed_headers, signature
        );

        SignedRequest {
            amz_date,
            authorization,
            signature,
        }
    }
}

// ============ AWS SigV4 Helpers ============

/// Compute the hex-encoded SHA-256 hash of data.
pub fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute hex-encoded HMAC-SHA256.
fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986 (used in SigV4 canonical requests).
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
