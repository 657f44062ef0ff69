//! Remote item client: fetches metadata, index document, and task-queue status for one
//! identifier, caching responses on disk and retrying transient faults with backoff.

use std::path::{Path, PathBuf};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::fs;

use crate::config::Credentials;
use crate::logsink::TaskLogger;

const MAX_ATTEMPTS: u32 = 15;
const INITIAL_INTERVAL: Duration = Duration::from_secs(1);
const BACKOFF_FACTOR: f64 = 2.0;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("remote reported an error response: {0}")]
    RemoteError(String),
    #[error("metadata endpoint returned an empty body, and the item was not confirmed 404")]
    EmptyResponseOnNon404,
    #[error("gave up after {attempts} attempts: {source}")]
    GaveUp {
        attempts: u32,
        #[source]
        source: Box<ClientError>,
    },
}

impl ClientError {
    /// Whether this failure kind is worth retrying: transport faults and malformed/erroring
    /// remote responses, but not a confirmed absence.
    fn is_retryable(&self) -> bool {
        !matches!(self, ClientError::GaveUp { .. })
    }
}

const DEFAULT_BASE_URL: &str = "https://archive.org";

/// One identifier's view onto the remote service, bound to its on-disk cache directory.
#[derive(Debug, Clone)]
pub struct RemoteItem {
    client: Client,
    identifier: String,
    task_dir: PathBuf,
    base_url: String,
}

impl RemoteItem {
    pub fn new(client: Client, identifier: impl Into<String>, task_dir: impl Into<PathBuf>) -> Self {
        Self::with_base_url(client, identifier, task_dir, DEFAULT_BASE_URL)
    }

    /// Like [`Self::new`], but against an arbitrary base URL instead of `archive.org` —
    /// the seam tests use to point at a mock server.
    pub fn with_base_url(
        client: Client,
        identifier: impl Into<String>,
        task_dir: impl Into<PathBuf>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            identifier: identifier.into(),
            task_dir: task_dir.into(),
            base_url: base_url.into(),
        }
    }

    fn metadata_cache_path(&self) -> PathBuf {
        self.task_dir.join("ia_metadata.json")
    }

    fn index_cache_path(&self) -> PathBuf {
        self.task_dir.join("index.json")
    }

    /// Fetches (or loads from cache) the remote metadata document.
    pub async fn metadata(&self, log: &TaskLogger) -> Result<Value, ClientError> {
        if let Some(cached) = read_cached_json(&self.metadata_cache_path()).await {
            return Ok(cached);
        }

        let bytes = self
            .retry("metadata", log, || self.fetch_metadata())
            .await?;
        fs::write(&self.metadata_cache_path(), &bytes).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn fetch_metadata(&self) -> Result<Vec<u8>, ClientError> {
        let url = format!("{}/metadata/{}", self.base_url, self.identifier);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let bytes = resp.bytes().await?;

        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|_| ClientError::RemoteError("malformed JSON body".into()))?;
        if let Some(err) = value.get("error").and_then(Value::as_str) {
            return Err(ClientError::RemoteError(err.to_string()));
        }
        if value.as_object().map(|o| o.is_empty()).unwrap_or(false) {
            if self.is_confirmed_404().await? {
                return Ok(bytes.to_vec());
            }
            return Err(ClientError::EmptyResponseOnNon404);
        }
        Ok(bytes.to_vec())
    }

    async fn is_confirmed_404(&self) -> Result<bool, ClientError> {
        let url = format!("{}/details/{}", self.base_url, self.identifier);
        let resp = self.client.get(&url).send().await?;
        Ok(resp.status() == StatusCode::NOT_FOUND)
    }

    /// Fetches (or loads from cache) the raw bytes of `index.json`, or `None` if the remote
    /// confirms the document does not exist.
    pub async fn caa_index(&self, log: &TaskLogger) -> Result<Option<Vec<u8>>, ClientError> {
        let cache_path = self.index_cache_path();
        if let Ok(bytes) = fs::read(&cache_path).await {
            return Ok(Some(bytes));
        }

        let url = format!("{}/download/{}/index.json", self.base_url, self.identifier);
        let bytes = self
            .retry("index", log, || async {
                let resp = self.client.get(&url).send().await?;
                if resp.status() == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                let resp = resp.error_for_status()?;
                Ok(Some(resp.bytes().await?.to_vec()))
            })
            .await?;

        if let Some(bytes) = &bytes {
            fs::write(&cache_path, bytes).await?;
        }
        Ok(bytes)
    }

    /// True iff the remote reports any pending administrative task for this identifier.
    pub async fn has_pending_tasks(&self, log: &TaskLogger) -> Result<bool, ClientError> {
        let url = format!(
            "{}/services/tasks.php?summary=1&identifier={}",
            self.base_url, self.identifier
        );
        self.retry("pending-tasks", log, || async {
            let resp = self.client.get(&url).send().await?;
            let body: Value = resp.json().await?;
            let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
            if !success {
                return Err(ClientError::RemoteError("tasks.php success=false".into()));
            }
            let summary = body
                .pointer("/value/summary")
                .and_then(Value::as_object)
                .ok_or_else(|| ClientError::RemoteError("missing /value/summary".into()))?;
            Ok(summary.values().any(|v| v.as_i64().unwrap_or(0) != 0))
        })
        .await
    }

    /// Runs `op` under the shared retry policy, logging every retry and give-up.
    async fn retry<T, F, Fut>(&self, op_name: &str, log: &TaskLogger, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ClientError>>,
    {
        let mut backoff = ExponentialBackoff {
            initial_interval: INITIAL_INTERVAL,
            multiplier: BACKOFF_FACTOR,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let started = std::time::Instant::now();
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = backoff.next_backoff().unwrap_or(INITIAL_INTERVAL);
                    log.error(format!(
                        "{op_name}: attempt {attempt} failed ({err}) after {:?}, retrying in {delay:?}",
                        started.elapsed()
                    ));
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    log.error(format!(
                        "{op_name}: giving up after {attempt} attempts ({err}) after {:?}",
                        started.elapsed()
                    ));
                    return Err(ClientError::GaveUp {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
            }
        }
    }
}

async fn read_cached_json(path: &Path) -> Option<Value> {
    let bytes = fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Builds the shared connection pool used by all workers, with a connection limit matched
/// to the dispatcher's concurrency and the `Authorization` header attached to every request.
pub fn build_client(concurrency: usize, credentials: &Credentials) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    let mut auth = HeaderValue::from_str(&credentials.auth_header())
        .expect("credentials contain no control characters");
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    Client::builder()
        .default_headers(headers)
        .pool_max_idle_per_host(concurrency)
        .timeout(Duration::from_secs(30))
        .build()
}
