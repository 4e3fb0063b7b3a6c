use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ApiError;
use crate::state::{Citation, VersionSnapshot};

const ASK_PATH: &str = "/v1/ask";
const UPLOAD_PATH: &str = "/v1/docs/upload";
const HEALTH_PATH: &str = "/healthz";
const METRICS_PATH: &str = "/v1/metrics";
const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// How much of a failed response body is kept for the log
const EXCERPT_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_snapshot_id: Option<String>,
}

/// Every field is optional; the backend sends nulls for whatever doesn't apply
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct AskResponse {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub answer_text: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub citations: Option<Vec<Citation>>,
    #[serde(default)]
    pub refusal_code: Option<String>,
    #[serde(default)]
    pub version_snapshot: Option<VersionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadResponse {
    pub docs_snapshot_id: String,
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub doc_sha256: Option<String>,
}

/// Rolling telemetry window reported by the admin metrics endpoint
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct MetricsResponse {
    pub window_start_utc: String,
    pub window_end_utc: String,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub avg_cost_per_query: f64,
    pub refusals_by_code: BTreeMap<String, u64>,
    pub cache_hit_rate: f64,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
}

/// The remote DocQ&A service, as seen by the client
#[async_trait]
pub trait Backend: Send + Sync {
    /// Upload one document, returning the snapshot that now contains it
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<UploadResponse, ApiError>;

    /// Ask a question against a snapshot (or the backend's default)
    async fn ask(&self, request: &AskRequest) -> Result<AskResponse, ApiError>;

    /// True when the service reports itself healthy
    async fn health(&self) -> Result<bool, ApiError>;
}

#[derive(Clone)]
pub struct DocQaClient {
    client: Client,
    base_url: String,
    upload_timeout: Duration,
}

impl DocQaClient {
    pub fn new(base_url: &str, upload_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            upload_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetch the telemetry window. Only operators need this, so it lives
    /// outside `Backend`.
    pub async fn metrics(&self, admin_token: Option<&str>) -> Result<MetricsResponse, ApiError> {
        let mut request = self.client.get(self.url(METRICS_PATH));
        if let Some(token) = admin_token {
            request = request.header(ADMIN_TOKEN_HEADER, token);
        }
        let response = request.send().await?;
        decode(METRICS_PATH, response).await
    }
}

#[async_trait]
impl Backend for DocQaClient {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<UploadResponse, ApiError> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.url(UPLOAD_PATH))
            .multipart(form)
            .timeout(self.upload_timeout)
            .send()
            .await?;

        decode(UPLOAD_PATH, response).await
    }

    async fn ask(&self, request: &AskRequest) -> Result<AskResponse, ApiError> {
        let response = self
            .client
            .post(self.url(ASK_PATH))
            .json(request)
            .send()
            .await?;

        decode(ASK_PATH, response).await
    }

    async fn health(&self) -> Result<bool, ApiError> {
        let response = self.client.get(self.url(HEALTH_PATH)).send().await?;
        let health: HealthResponse = decode(HEALTH_PATH, response).await?;
        Ok(health.status == "ok")
    }
}

async fn decode<T: DeserializeOwned>(endpoint: &'static str, response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ApiError::Status {
            endpoint,
            status,
            excerpt: body.chars().take(EXCERPT_LEN).collect(),
        });
    }

    serde_json::from_str(&body).map_err(|source| ApiError::Decode { endpoint, source })
}

/// Read a document from disk for upload, returning its display name and bytes
pub async fn read_document(path: &Path) -> Result<(String, Vec<u8>), ApiError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::File {
        path: path.to_path_buf(),
        source,
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.pdf".to_string());

    Ok((file_name, bytes))
}
