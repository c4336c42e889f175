use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Helper to deserialize a JSON `null` string field as an empty string.
fn deserialize_null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Metadata shown in the results view after a successful info fetch.
///
/// Values are displayed exactly as the server returned them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoInfo {
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub uploader: String,
    /// Human readable duration string (e.g. "3:00"), not seconds.
    #[serde(default, deserialize_with = "deserialize_null_as_empty")]
    pub duration: String,
    #[serde(
        rename = "thumbnail",
        default,
        deserialize_with = "deserialize_null_as_empty"
    )]
    pub thumbnail_url: String,
}

/// Output format requested from the conversion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadFormat {
    #[default]
    Audio,
    Video,
}

impl DownloadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadFormat::Audio => "audio",
            DownloadFormat::Video => "video",
        }
    }

    /// Label for the download control when it is idle.
    pub fn button_label(&self) -> &'static str {
        match self {
            DownloadFormat::Audio => "Download MP3",
            DownloadFormat::Video => "Download MP4",
        }
    }

    /// Loading text shown once progress reaches the conversion tail.
    pub fn converting_text(&self) -> &'static str {
        match self {
            DownloadFormat::Audio => "Converting to MP3... (This may take a moment)",
            DownloadFormat::Video => "Converting to MP4... (This may take a moment)",
        }
    }
}

impl FromStr for DownloadFormat {
    type Err = String;

    /// Accepts `audio`/`video` and the `mp3`/`mp4` aliases, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" | "mp3" => Ok(DownloadFormat::Audio),
            "video" | "mp4" => Ok(DownloadFormat::Video),
            _ => Err(format!("unknown format {s:?} (use audio or video)")),
        }
    }
}

impl fmt::Display for DownloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /api/start_download`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(rename = "type")]
    pub format: DownloadFormat,
}

impl DownloadRequest {
    pub fn new<S: Into<String>>(url: S, format: DownloadFormat) -> Self {
        Self {
            url: url.into(),
            format,
        }
    }
}

/// Response of `POST /api/start_download`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedJob {
    pub job_id: String,
}

/// Server-side lifecycle status of a job. The server is the only writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Downloading,
    Processing,
    Finished,
    Error,
    /// Any status string this client does not know about.
    #[serde(other)]
    Unknown,
}

/// One response of `GET /api/progress/{job_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub status: JobStatus,
    /// 0..=100 if known.
    #[serde(default, deserialize_with = "deserialize_percent")]
    pub percent: Option<f64>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProgressReport {
    /// Percent to display; absent values count as 0.
    pub fn percent_or_zero(&self) -> f64 {
        self.percent.unwrap_or(0.0)
    }
}

/// Lenient percent decoding.
///
/// Accepts numbers, numeric strings (with or without a trailing `%`) and `null`.
/// Anything else is logged and treated as absent. Values are clamped to 0..=100.
fn deserialize_percent<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let parsed = match &value {
        serde_json::Value::Null => None,
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_percent(s),
        _ => None,
    };
    if parsed.is_none() && !value.is_null() {
        log::warn!("Ignoring non-numeric progress percent: {}", value);
    }
    Ok(parsed.and_then(clamp_percent))
}

pub(crate) fn parse_percent(s: &str) -> Option<f64> {
    let cleaned = s.trim().trim_end_matches('%').trim();
    cleaned.parse::<f64>().ok()
}

fn clamp_percent(p: f64) -> Option<f64> {
    if p.is_nan() {
        None
    } else {
        Some(p.clamp(0.0, 100.0))
    }
}

/// How a download attempt settled.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { filename: String, file_url: String },
    Failed(crate::error::ClientError),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("50.5%"), Some(50.5));
        assert_eq!(parse_percent(" 100 "), Some(100.0));
        assert_eq!(parse_percent("N/A"), None);
    }

    #[test]
    fn info_keeps_payload_verbatim() {
        let info: VideoInfo = serde_json::from_str(
            r#"{"title":"T","uploader":"U","duration":"3:00","thumbnail":"x.jpg"}"#,
        )
        .unwrap();
        assert_eq!(info.title, "T");
        assert_eq!(info.uploader, "U");
        assert_eq!(info.duration, "3:00");
        assert_eq!(info.thumbnail_url, "x.jpg");
    }

    #[test]
    fn info_null_fields_become_empty() {
        let info: VideoInfo =
            serde_json::from_str(r#"{"title":"T","uploader":null,"duration":null}"#).unwrap();
        assert_eq!(info.title, "T");
        assert_eq!(info.uploader, "");
        assert_eq!(info.thumbnail_url, "");
    }

    #[test]
    fn request_serializes_format_as_type() {
        let req = DownloadRequest::new("https://example.com/v1", DownloadFormat::Video);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"url": "https://example.com/v1", "type": "video"})
        );
    }

    #[test]
    fn progress_without_percent_is_zero() {
        let report: ProgressReport = serde_json::from_str(r#"{"status":"downloading"}"#).unwrap();
        assert_eq!(report.status, JobStatus::Downloading);
        assert_eq!(report.percent, None);
        assert_eq!(report.percent_or_zero(), 0.0);
    }

    #[test]
    fn progress_percent_is_lenient() {
        let report: ProgressReport =
            serde_json::from_str(r#"{"status":"downloading","percent":"42.5%"}"#).unwrap();
        assert_eq!(report.percent, Some(42.5));

        let report: ProgressReport =
            serde_json::from_str(r#"{"status":"processing","percent":{"x":1}}"#).unwrap();
        assert_eq!(report.percent, None);

        let report: ProgressReport =
            serde_json::from_str(r#"{"status":"processing","percent":180}"#).unwrap();
        assert_eq!(report.percent, Some(100.0));
    }

    #[test]
    fn unknown_status_is_not_an_error() {
        let report: ProgressReport =
            serde_json::from_str(r#"{"status":"paused","percent":3}"#).unwrap();
        assert_eq!(report.status, JobStatus::Unknown);
        assert_eq!(report.percent, Some(3.0));
    }

    #[test]
    fn format_labels() {
        assert_eq!(DownloadFormat::Audio.button_label(), "Download MP3");
        assert_eq!(DownloadFormat::Video.button_label(), "Download MP4");
        assert_eq!("MP4".parse::<DownloadFormat>(), Ok(DownloadFormat::Video));
        assert_eq!(" audio ".parse::<DownloadFormat>(), Ok(DownloadFormat::Audio));
        assert!("flac".parse::<DownloadFormat>().is_err());
    }
}
