//! Conversion service API
//!
//! The backend is a black box reached through four endpoints. `DownloadApi` is
//! the seam the controller depends on; `HttpApi` is the reqwest implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::error::ClientError;
use crate::models::{DownloadRequest, JobStatus, ProgressReport, StartedJob, VideoInfo};
use crate::settings::Settings;
use crate::url_utils;

const INFO_FALLBACK: &str = "Failed to fetch info";
const START_FALLBACK: &str = "Failed to start download";
const PROGRESS_FALLBACK: &str = "Failed to fetch progress";
const FILE_FALLBACK: &str = "Failed to retrieve file";

#[async_trait]
pub trait DownloadApi: Send + Sync + 'static {
    /// `POST /api/info`
    async fn video_info(&self, url: &str) -> Result<VideoInfo, ClientError>;

    /// `POST /api/start_download`
    async fn start_download(&self, request: &DownloadRequest) -> Result<StartedJob, ClientError>;

    /// `GET /api/progress/{job_id}`
    async fn job_progress(&self, job_id: &str) -> Result<ProgressReport, ClientError>;

    /// URL of `GET /api/get_file/{filename}` for a finished job.
    fn file_url(&self, filename: &str) -> Result<String, ClientError>;
}

/// Error body the server sends with non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Where to find the service and how long to wait for it.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: Url,
    /// Per-request timeout; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl ApiConfig {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: url_utils::parse_base_url(base_url)?,
            timeout: Some(Duration::from_secs(30)),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: url_utils::parse_base_url(&settings.server.base_url)?,
            timeout: settings.request_timeout(),
        })
    }
}

/// reqwest-backed client for the conversion service.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base_url: Url,
}

impl HttpApi {
    pub fn new(config: ApiConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        url_utils::endpoint(&self.base_url, segments)
    }

    /// Stream a finished file into `dir`, returning the written path.
    ///
    /// The body goes to a `.part` file first and is renamed once complete, so a
    /// dropped connection never leaves a truncated file under the final name.
    pub async fn save_file(&self, filename: &str, dir: &Path) -> Result<PathBuf, ClientError> {
        let url = self.endpoint(&["api", "get_file", filename])?;
        log::info!("Retrieving {} into {}", url, dir.display());

        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(request_error(response, FILE_FALLBACK).await);
        }

        fs::create_dir_all(dir).await?;
        let final_path = dir.join(url_utils::local_file_name(filename));
        let temp_path = final_path.with_extension(match final_path.extension() {
            Some(ext) => format!("{}.part", ext.to_string_lossy()),
            None => "part".to_string(),
        });

        let mut file = fs::File::create(&temp_path).await?;
        let mut written: u64 = 0;
        let result: Result<(), ClientError> = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            drop(file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        drop(file);

        fs::rename(&temp_path, &final_path).await?;
        log::info!("Saved {} ({} bytes)", final_path.display(), written);
        Ok(final_path)
    }
}

#[async_trait]
impl DownloadApi for HttpApi {
    async fn video_info(&self, url: &str) -> Result<VideoInfo, ClientError> {
        let endpoint = self.endpoint(&["api", "info"])?;
        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await?;
        read_json(response, INFO_FALLBACK).await
    }

    async fn start_download(&self, request: &DownloadRequest) -> Result<StartedJob, ClientError> {
        let endpoint = self.endpoint(&["api", "start_download"])?;
        let response = self.client.post(endpoint).json(request).send().await?;
        read_json(response, START_FALLBACK).await
    }

    async fn job_progress(&self, job_id: &str) -> Result<ProgressReport, ClientError> {
        let endpoint = self.endpoint(&["api", "progress", job_id])?;
        let response = self.client.get(endpoint).send().await?;
        let status = response.status();
        if status.is_success() {
            return read_json(response, PROGRESS_FALLBACK).await;
        }

        // Failure responses may still carry the job shape with status="error".
        let body = response.text().await?;
        if let Ok(report) = serde_json::from_str::<ProgressReport>(&body) {
            if report.status == JobStatus::Error {
                return Ok(report);
            }
        }
        Err(error_from_body(status, &body, PROGRESS_FALLBACK))
    }

    fn file_url(&self, filename: &str) -> Result<String, ClientError> {
        Ok(self.endpoint(&["api", "get_file", filename])?.to_string())
    }
}

/// Decode a success body, or turn a failure status into `ClientError::Request`.
async fn read_json<T: DeserializeOwned>(
    response: Response,
    fallback: &str,
) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        return Err(request_error(response, fallback).await);
    }
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        log::warn!("Malformed response body ({}): {}", e, truncate(&body, 200));
        ClientError::protocol(format!("Unexpected response from server: {e}"))
    })
}

async fn request_error(response: Response, fallback: &str) -> ClientError {
    let status = response.status();
    match response.text().await {
        Ok(body) => error_from_body(status, &body, fallback),
        Err(e) => {
            log::warn!("Failed to read error body: {}", e);
            ClientError::Request {
                status: status.as_u16(),
                message: fallback.to_string(),
            }
        }
    }
}

fn error_from_body(status: StatusCode, body: &str, fallback: &str) -> ClientError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());
    ClientError::Request {
        status: status.as_u16(),
        message,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
