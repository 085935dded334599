//! File Server API Client
//!
//! Authenticated access to folder metadata and file previews. The server
//! runs on low-end hardware, so failed requests back off before retrying.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::errors::ApiError;
use super::types::{
    encode_preview, previews_from_bulk, FileId, FolderId, FolderPreviews, FolderRecord,
    VersionInfo,
};
use super::PreviewSource;
use crate::config::{Config, VersionPattern};

/// Maximum number of retries for retryable errors
const MAX_RETRIES: u32 = 3;

/// Delay before each retry
const BACKOFF_MS: [u64; 3] = [500, 1000, 2000];

/// Maximum number of recent errors to track
const MAX_ERROR_HISTORY: usize = 10;

/// Health status values
pub const HEALTH_HEALTHY: u8 = 0;
pub const HEALTH_DEGRADED: u8 = 1;
pub const HEALTH_UNHEALTHY: u8 = 2;

/// A recent error entry for tracking
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub timestamp: u64,
    pub operation: String,
    pub path: String,
    pub error: String,
}

/// File server API client
#[derive(Clone)]
pub struct ServerClient {
    /// HTTP client for making requests
    http_client: Client,
    /// Server base URL without trailing slash
    base_url: String,
    /// Precomputed `Authorization` header, if credentials are configured
    auth_header: Option<String>,
    /// Connection health (0=healthy, 1=degraded, 2=unhealthy)
    health: Arc<AtomicU8>,
    /// Recent error log
    error_log: Arc<RwLock<VecDeque<ErrorEntry>>>,
}

impl ServerClient {
    /// Create a client from configuration
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        let auth_header = match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some(basic_auth(username, password)),
            _ => None,
        };

        Ok(Self {
            http_client,
            base_url: config.address.trim_end_matches('/').to_string(),
            auth_header,
            health: Arc::new(AtomicU8::new(HEALTH_HEALTHY)),
            error_log: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_ERROR_HISTORY))),
        })
    }

    /// Absolute URL for an API path
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Issue a GET and map non-success statuses to [`ApiError`]
    async fn request(&self, path: &str) -> Result<Response, ApiError> {
        let mut request = self.http_client.get(self.url(path));
        if let Some(auth) = &self.auth_header {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::from_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status.as_u16(), &body))
    }

    async fn request_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(path)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Execute an operation with retry logic and backoff
    async fn with_retry<F, Fut, T>(&self, operation: &str, path: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(result) => {
                    self.health.store(HEALTH_HEALTHY, Ordering::Relaxed);
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    let delay = BACKOFF_MS
                        .get(attempt as usize)
                        .copied()
                        .unwrap_or(2000);
                    warn!(
                        operation = operation,
                        path = path,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_ms = delay,
                        error = %e,
                        "Retrying file server request"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    match e {
                        ApiError::Network(_) | ApiError::Timeout => {
                            self.health.store(HEALTH_UNHEALTHY, Ordering::Relaxed)
                        }
                        ApiError::RateLimited | ApiError::Server(_, _) => {
                            self.health.store(HEALTH_DEGRADED, Ordering::Relaxed)
                        }
                        _ => {}
                    }
                    self.log_error(operation, path, &e.to_string());
                    return Err(anyhow::Error::new(e)
                        .context(format!("{} failed for {}", operation, path)));
                }
            }
        }
    }

    /// Log an error to the error history ring buffer
    fn log_error(&self, operation: &str, path: &str, error: &str) {
        let entry = ErrorEntry {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            operation: operation.to_string(),
            path: path.to_string(),
            error: error.to_string(),
        };

        if let Ok(mut log) = self.error_log.write() {
            if log.len() >= MAX_ERROR_HISTORY {
                log.pop_front();
            }
            log.push_back(entry);
        }
    }

    /// Get connection health status string
    pub fn health_status(&self) -> &'static str {
        match self.health.load(Ordering::Relaxed) {
            HEALTH_HEALTHY => "healthy",
            HEALTH_DEGRADED => "degraded",
            _ => "unhealthy",
        }
    }

    /// Get recent errors
    pub fn recent_errors(&self) -> Vec<ErrorEntry> {
        self.error_log
            .read()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Fetch the server version
    pub async fn get_version(&self) -> Result<VersionInfo> {
        let path = "/api/version";
        self.with_retry("version", path, move || {
            self.request_json::<VersionInfo>(path)
        })
        .await
    }

    /// Whether the server version satisfies `pattern`
    pub async fn is_compatible(&self, pattern: &VersionPattern) -> Result<bool> {
        let version = self.get_version().await?;
        let compatible = pattern.matches(&version.version);
        info!(
            server_version = %version.version,
            accepted = %pattern,
            compatible = compatible,
            "Checked server version"
        );
        Ok(compatible)
    }
}

/// Build a Basic `Authorization` header value
fn basic_auth(username: &str, password: &str) -> String {
    let credentials = format!("{}:{}", username, password);
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(credentials)
    )
}

#[async_trait]
impl PreviewSource for ServerClient {
    async fn fetch_folder_metadata(&self, folder_id: FolderId) -> Result<FolderRecord> {
        let path = format!("/folders/metadata/{}", folder_id);
        let p = path.as_str();
        let folder: FolderRecord = self
            .with_retry("folder_metadata", p, move || {
                self.request_json::<FolderRecord>(p)
            })
            .await?;

        debug!(
            folder_id = folder_id,
            files = folder.files.len(),
            subfolders = folder.subfolders.len(),
            "Fetched folder metadata"
        );
        Ok(folder)
    }

    async fn fetch_file_preview(&self, file_id: FileId) -> Result<Option<String>> {
        let path = format!("/files/preview/{}", file_id);
        let p = path.as_str();
        let preview = self
            .with_retry("file_preview", p, move || async move {
                match self.request(p).await {
                    Ok(response) => {
                        let bytes = response
                            .bytes()
                            .await
                            .map_err(|e| ApiError::from_transport(&e))?;
                        Ok(Some(encode_preview(&bytes)))
                    }
                    // No preview exists for this file
                    Err(ApiError::NotFound(_)) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;

        debug!(file_id = file_id, found = preview.is_some(), "Fetched file preview");
        Ok(preview)
    }

    async fn fetch_folder_previews_bulk(&self, folder_id: FolderId) -> Result<FolderPreviews> {
        let path = format!("/folders/preview/{}", folder_id);
        let p = path.as_str();
        let raw: HashMap<String, Vec<u8>> = self
            .with_retry("folder_previews", p, move || {
                self.request_json::<HashMap<String, Vec<u8>>>(p)
            })
            .await?;

        let previews = previews_from_bulk(raw);
        info!(
            folder_id = folder_id,
            count = previews.len(),
            "Fetched folder previews in bulk"
        );
        Ok(previews)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(basic_auth("user", "pass"), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_url_joining() {
        let client = ServerClient::new(&Config::new("https://files.local:8000/")).unwrap();
        assert_eq!(
            client.url("/folders/metadata/0"),
            "https://files.local:8000/folders/metadata/0"
        );
        assert_eq!(
            client.url("files/preview/3"),
            "https://files.local:8000/files/preview/3"
        );
    }

    #[test]
    fn test_credentials_are_optional() {
        let client = ServerClient::new(&Config::new("http://server")).unwrap();
        assert!(client.auth_header.is_none());

        let mut config = Config::new("http://server");
        config.username = Some("user".to_string());
        config.password = Some("pass".to_string());
        let client = ServerClient::new(&config).unwrap();
        assert_eq!(client.auth_header.as_deref(), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn test_error_log_is_bounded() {
        let client = ServerClient::new(&Config::new("http://server")).unwrap();
        for i in 0..(MAX_ERROR_HISTORY + 5) {
            client.log_error("file_preview", &format!("/files/preview/{}", i), "boom");
        }
        let errors = client.recent_errors();
        assert_eq!(errors.len(), MAX_ERROR_HISTORY);
        assert_eq!(errors[0].path, "/files/preview/5");
        assert_eq!(client.health_status(), "healthy");
    }
}
