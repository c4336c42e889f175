use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::models::{DownloadFormat, VideoInfo};
use crate::view::{Notification, ViewModel};

/// Why a poll task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStopReason {
    Finished,
    JobError,
    QueryFailed,
    Cancelled,
}

/// Controller -> UI events. Adapters subscribe once and switch on `event`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ControllerEvent {
    // Metadata
    InfoRequested {
        url: String,
    },
    InfoReady {
        url: String,
        info: VideoInfo,
    },
    InfoFailed {
        error_code: ErrorCode,
        user_message: String,
    },

    // Download attempt lifecycle
    DownloadStarting {
        attempt: Uuid,
        url: String,
        format: DownloadFormat,
    },
    JobStarted {
        attempt: Uuid,
        job_id: String,
    },
    JobProgress {
        attempt: Uuid,
        job_id: String,
        percent: f64,
    },
    /// Emitted exactly once per poll task.
    PollStopped {
        attempt: Uuid,
        job_id: String,
        reason: PollStopReason,
    },
    /// The file is ready; adapters retrieve `file_url`.
    FileReady {
        attempt: Uuid,
        filename: String,
        file_url: String,
    },
    DownloadCompleted {
        attempt: Uuid,
    },
    DownloadFailed {
        attempt: Uuid,
        error_code: ErrorCode,
        user_message: String,
    },

    // Banner
    Notification {
        notification: Notification,
        at: DateTime<Utc>,
    },
    NotificationHidden {
        id: u64,
    },

    ViewChanged {
        view: ViewModel,
    },
}

/// Cheap clonable handle used by every component to publish events.
///
/// A sink without a receiver (or whose receiver was dropped) silently discards.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ControllerEvent>>,
}

impl EventSink {
    /// Create a sink and the receiving end adapters listen on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ControllerEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                log::debug!("Event receiver dropped, discarding event");
            }
        }
    }
}
