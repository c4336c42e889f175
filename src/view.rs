//! View-model
//!
//! The controller never talks to a UI toolkit. It folds `Transition`s into a
//! `ViewModel` with a pure function and publishes the result; adapters render it.

use serde::Serialize;

use crate::models::{DownloadFormat, VideoInfo};

/// Percent at which the progress view switches to the conversion message.
pub const CONVERTING_THRESHOLD: f64 = 99.0;

pub const FETCHING_TEXT: &str = "Fetching video info...";
pub const INITIALIZING_TEXT: &str = "Initializing Download...";
pub const DOWNLOADING_TEXT: &str = "Downloading...";
pub const FINALIZING_TEXT: &str = "Finalizing...";
pub const COMPLETE_TEXT: &str = "Conversion Complete!";
pub const STARTING_LABEL: &str = "Starting...";

/// Which top-level area is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    /// Neither results nor loading indicator.
    Idle,
    /// Spinner or progress bar.
    Loading,
    /// Fetched metadata and the download control.
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Error,
    Success,
}

/// A transient banner. `id` increases with every notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressBar {
    /// 0..=100
    pub percent: f64,
    pub text: String,
    /// Set during the conversion tail.
    pub highlighted: bool,
}

impl ProgressBar {
    fn at(percent: f64) -> Self {
        Self {
            percent,
            text: format_percent(percent),
            highlighted: percent >= CONVERTING_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadButton {
    pub label: String,
    pub enabled: bool,
}

impl DownloadButton {
    fn ready(format: DownloadFormat) -> Self {
        Self {
            label: format.button_label().to_string(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    pub view: View,
    pub loading_text: Option<String>,
    pub progress: Option<ProgressBar>,
    pub info: Option<VideoInfo>,
    /// Selected format; the next download uses it.
    pub format: DownloadFormat,
    /// Format of the attempt on screen, fixed when it starts.
    pub job_format: Option<DownloadFormat>,
    pub download_button: DownloadButton,
    pub message: Option<Notification>,
}

impl Default for ViewModel {
    fn default() -> Self {
        Self::new(DownloadFormat::default())
    }
}

/// Everything that can happen to the view.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    FetchStarted,
    FetchSucceeded(VideoInfo),
    FetchFailed,
    FormatSelected(DownloadFormat),
    DownloadStarting(DownloadFormat),
    Progress(f64),
    Finished,
    /// Back to the results view after a finished download.
    Restored,
    Failed,
    NotificationShown(Notification),
    /// Hides the banner only if it is still the one with this id.
    NotificationHidden(u64),
}

impl ViewModel {
    pub fn new(format: DownloadFormat) -> Self {
        Self {
            view: View::Idle,
            loading_text: None,
            progress: None,
            info: None,
            format,
            job_format: None,
            download_button: DownloadButton::ready(format),
            message: None,
        }
    }

    /// Pure transition function.
    pub fn apply(&self, transition: &Transition) -> ViewModel {
        let mut next = self.clone();
        match transition {
            Transition::FetchStarted => {
                next.view = View::Loading;
                next.loading_text = Some(FETCHING_TEXT.to_string());
                next.progress = None;
            }
            Transition::FetchSucceeded(info) => {
                next.view = View::Results;
                next.loading_text = None;
                next.info = Some(info.clone());
                next.download_button = DownloadButton::ready(next.format);
            }
            Transition::FetchFailed => {
                next.view = View::Idle;
                next.loading_text = None;
            }
            Transition::FormatSelected(format) => {
                next.format = *format;
                if next.download_button.enabled {
                    next.download_button.label = format.button_label().to_string();
                }
            }
            Transition::DownloadStarting(format) => {
                next.view = View::Loading;
                next.job_format = Some(*format);
                next.loading_text = Some(INITIALIZING_TEXT.to_string());
                next.progress = Some(ProgressBar::at(0.0));
                next.download_button = DownloadButton {
                    label: STARTING_LABEL.to_string(),
                    enabled: false,
                };
            }
            Transition::Progress(percent) => {
                let bar = ProgressBar::at(*percent);
                let format = next.job_format.unwrap_or(next.format);
                next.loading_text = Some(if bar.highlighted {
                    format.converting_text().to_string()
                } else {
                    DOWNLOADING_TEXT.to_string()
                });
                next.progress = Some(bar);
            }
            Transition::Finished => {
                next.loading_text = Some(FINALIZING_TEXT.to_string());
                next.progress = Some(ProgressBar {
                    percent: 100.0,
                    text: COMPLETE_TEXT.to_string(),
                    highlighted: false,
                });
            }
            Transition::Restored | Transition::Failed => {
                next.view = View::Results;
                next.loading_text = None;
                next.progress = None;
                next.job_format = None;
                next.download_button = DownloadButton::ready(next.format);
            }
            Transition::NotificationShown(n) => {
                next.message = Some(n.clone());
            }
            Transition::NotificationHidden(id) => {
                if next.message.as_ref().map(|m| m.id) == Some(*id) {
                    next.message = None;
                }
            }
        }
        next
    }
}

/// Progress text with one decimal, e.g. `40.0%`.
pub fn format_percent(percent: f64) -> String {
    format!("{:.1}%", percent)
}
