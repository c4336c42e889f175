use std::sync::Arc;

use crate::api::DownloadApi;
use crate::error::ClientError;
use crate::models::VideoInfo;
use crate::url_utils;

pub const EMPTY_URL_MESSAGE: &str = "Please enter a valid URL";

/// Validates input and fetches metadata. One attempt per call, no retries.
pub struct InfoFetcher<A: DownloadApi> {
    api: Arc<A>,
}

impl<A: DownloadApi> InfoFetcher<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// Returns the trimmed URL alongside the info so callers can remember it.
    pub async fn fetch(&self, input: &str) -> Result<(String, VideoInfo), ClientError> {
        let url = url_utils::normalize_input(input)
            .ok_or_else(|| ClientError::validation(EMPTY_URL_MESSAGE))?;
        if !url_utils::looks_like_http_url(&url) {
            log::warn!("{:?} does not look like an http(s) URL, sending anyway", url);
        }

        log::info!("Fetching info for {}", url);
        let info = self.api.video_info(&url).await?;
        log::info!("Fetched info for {}: title={:?}", url, info.title);
        Ok((url, info))
    }
}
