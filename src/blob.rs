//! Image bytes by storage key.
//!
//! Three backends ship with the daemon: a private S3 bucket, an HTTP object
//! endpoint and a plain directory. Each classifies failures so the retry
//! policy knows whether another attempt can help.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::error::FetchError;
use crate::retry::{Attempt, RetryPolicy};

pub trait BlobStore {
    fn fetch(&self, key: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

impl<T: BlobStore + Send + Sync> BlobStore for Arc<T> {
    fn fetch(&self, key: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send {
        (**self).fetch(key)
    }
}

/// Fetches `key`, retrying transient failures per `policy`.
pub async fn fetch_with_retry<B: BlobStore + Sync>(
    policy: &RetryPolicy,
    store: &B,
    key: &str,
) -> Result<Vec<u8>, FetchError> {
    policy
        .run("blob fetch", move |_| async move {
            match store.fetch(key).await {
                Ok(bytes) => Attempt::Ok(bytes),
                Err(err) if err.is_retryable() => Attempt::Retryable(err),
                Err(err) => Attempt::Fatal(err),
            }
        })
        .await
        .into_result()
}

/// `GET {base-url}/{key}` with an optional bearer token.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(base_url: &str, bearer_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token,
        })
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }
}

impl BlobStore for HttpBlobStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.url_for(key);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, key));
        }
        let body = response.bytes().await.map_err(classify_transport)?;
        debug!(key, bytes = body.len(), "fetched blob over http");
        Ok(body.to_vec())
    }
}

fn classify_transport(err: reqwest::Error) -> FetchError {
    if let Some(status) = err.status() {
        return FetchError::Retryable(format!("http {status}: {err}"));
    }
    if err.is_builder() {
        FetchError::Fatal(err.to_string())
    } else {
        FetchError::Retryable(err.to_string())
    }
}

/// Missing objects are permanent; server trouble, throttling and auth
/// hiccups (expired tokens get refreshed out of band) are worth retrying.
pub fn classify_status(status: StatusCode, key: &str) -> FetchError {
    let message = format!("http {status} for {key}");
    if status.is_server_error()
        || matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::REQUEST_TIMEOUT
                | StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
        )
    {
        FetchError::Retryable(message)
    } else {
        FetchError::Fatal(message)
    }
}

/// Objects in a private S3 bucket, keyed by the catalog's storage key.
/// Credentials come from the standard AWS chain (`AWS_ACCESS_KEY_ID` and
/// `AWS_SECRET_ACCESS_KEY`, profile files, instance roles).
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(
        bucket: &str,
        region: Option<&str>,
        endpoint_url: Option<&str>,
        force_path_style: bool,
        timeout: Duration,
    ) -> Self {
        // Attempts are driven by our own retry policy.
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::disabled())
            .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        if let Some(url) = endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let shared = loader.load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(force_path_style)
            .build();
        info!(bucket, region = ?shared.region(), "using s3 photo storage");
        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: bucket.to_string(),
        }
    }
}

impl BlobStore for S3BlobStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify_s3(err, key))?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|err| FetchError::Retryable(format!("s3 body for {key}: {err}")))?
            .into_bytes();
        debug!(key, bytes = body.len(), "fetched blob from s3");
        Ok(body.to_vec())
    }
}

fn classify_s3(err: SdkError<GetObjectError, HttpResponse>, key: &str) -> FetchError {
    let message = format!("s3 get {key}: {}", DisplayErrorContext(&err));
    match err {
        SdkError::ServiceError(service) => classify_s3_status(
            service.raw().status().as_u16(),
            service.err().is_no_such_key(),
            key,
        ),
        SdkError::ConstructionFailure(_) => FetchError::Fatal(message),
        _ => FetchError::Retryable(message),
    }
}

/// S3 answers with the same status codes as any object endpoint; a missing
/// key is permanent whatever the status says.
pub fn classify_s3_status(status: u16, no_such_key: bool, key: &str) -> FetchError {
    if no_such_key {
        return FetchError::Fatal(format!("no s3 object {key}"));
    }
    match StatusCode::from_u16(status) {
        Ok(status) => classify_status(status, key),
        Err(_) => FetchError::Retryable(format!("s3 status {status} for {key}")),
    }
}

/// Objects stored as `{root}/{key}`.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, FetchError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(FetchError::Fatal(format!("unusable storage key {key:?}")));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for DirBlobStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(FetchError::Fatal(
                format!("{} does not exist", path.display()),
            )),
            Err(err) => Err(FetchError::Retryable(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }
}

/// The backend selected by `storage.type`.
#[derive(Debug, Clone)]
pub enum ConfiguredBlobStore {
    S3(S3BlobStore),
    Http(HttpBlobStore),
    Directory(DirBlobStore),
}

impl ConfiguredBlobStore {
    pub async fn from_config(cfg: &StorageConfig) -> Result<Self> {
        match cfg {
            StorageConfig::S3 {
                bucket,
                region,
                endpoint_url,
                force_path_style,
                timeout,
            } => Ok(Self::S3(
                S3BlobStore::new(
                    bucket,
                    region.as_deref(),
                    endpoint_url.as_deref(),
                    *force_path_style,
                    *timeout,
                )
                .await,
            )),
            StorageConfig::Http {
                base_url,
                bearer_token_env,
                timeout,
            } => {
                let token = match bearer_token_env {
                    Some(var) => Some(std::env::var(var).with_context(|| {
                        format!("storage.bearer-token-env names {var}, which is not set")
                    })?),
                    None => None,
                };
                Ok(Self::Http(HttpBlobStore::new(base_url, token, *timeout)?))
            }
            StorageConfig::Directory { root } => Ok(Self::Directory(DirBlobStore::new(root))),
        }
    }
}

impl BlobStore for ConfiguredBlobStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        match self {
            Self::S3(store) => store.fetch(key).await,
            Self::Http(store) => store.fetch(key).await,
            Self::Directory(store) => store.fetch(key).await,
        }
    }
}

/// In-memory backend for tests and dry runs. Unknown keys are fatal.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: std::sync::Mutex<HashMap<String, Vec<u8>>>,
    transient_failures: std::sync::Mutex<HashMap<String, u32>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(key.into(), bytes);
        }
    }

    /// Makes the next `count` fetches of `key` fail with a retryable error.
    pub fn fail_transiently(&self, key: impl Into<String>, count: u32) {
        if let Ok(mut failures) = self.transient_failures.lock() {
            failures.insert(key.into(), count);
        }
    }

    fn lookup(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        if let Ok(mut failures) = self.transient_failures.lock()
            && let Some(remaining) = failures.get_mut(key)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(FetchError::Retryable(format!("simulated outage for {key}")));
        }
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| FetchError::Fatal("blob map poisoned".to_string()))?;
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| FetchError::Fatal(format!("no blob stored under {key}")))
    }
}

impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        self.lookup(key)
    }
}
