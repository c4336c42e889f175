//! Controller
//!
//! The session object an adapter talks to: constructed once, driven by user
//! actions, observed through `ControllerEvent`s or `view()`, stopped with
//! `shutdown()`.

use std::sync::Arc;
use std::time::Duration;

use crate::api::DownloadApi;
use crate::download_manager::{AttemptHandle, DownloadManager, DownloadPhase, PollConfig};
use crate::error::ClientError;
use crate::events::{ControllerEvent, EventSink};
use crate::info::{InfoFetcher, EMPTY_URL_MESSAGE};
use crate::models::{DownloadFormat, VideoInfo};
use crate::notifier::Notifier;
use crate::session::SessionHandle;
use crate::settings::Settings;
use crate::url_utils;
use crate::view::{NotificationKind, Transition, ViewModel};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub poll: PollConfig,
    pub notification_hide_after: Duration,
    pub default_format: DownloadFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            notification_hide_after: Duration::from_millis(5000),
            default_format: DownloadFormat::default(),
        }
    }
}

impl ControllerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            poll: PollConfig::from_settings(settings),
            notification_hide_after: settings.notification_hide_after(),
            default_format: settings.general.default_format,
        }
    }
}

pub struct Controller<A: DownloadApi> {
    session: SessionHandle,
    events: EventSink,
    notifier: Notifier,
    info: InfoFetcher<A>,
    downloads: DownloadManager<A>,
}

impl<A: DownloadApi> Controller<A> {
    pub fn new(api: A, config: ControllerConfig, events: EventSink) -> Self {
        let api = Arc::new(api);
        let session = SessionHandle::new(config.default_format);
        let notifier = Notifier::new(
            session.clone(),
            events.clone(),
            config.notification_hide_after,
        );
        let downloads = DownloadManager::new(
            api.clone(),
            config.poll,
            session.clone(),
            notifier.clone(),
            events.clone(),
        );
        Self {
            session,
            events,
            notifier,
            info: InfoFetcher::new(api),
            downloads,
        }
    }

    /// Fetch metadata for `input` and show it.
    ///
    /// Empty input fails without a network call. Any failure is shown as an
    /// error notification and the view returns to `Idle`. While the fetch is in
    /// flight `download()` does nothing.
    pub async fn fetch_info(&self, input: &str) -> Result<VideoInfo, ClientError> {
        let started = {
            let mut session = self.session.lock().await;
            if !session.phase.is_idle() {
                Err(ClientError::Busy)
            } else if let Some(url) = url_utils::normalize_input(input) {
                // Marked under the same lock as `FetchStarted`.
                let fetch = self.session.begin_fetch();
                session.apply(&self.events, Transition::FetchStarted);
                Ok((url, fetch))
            } else {
                Err(ClientError::validation(EMPTY_URL_MESSAGE))
            }
        };
        let (url, fetch) = match started {
            Ok(started) => started,
            Err(err) => {
                self.report_info_error(&err).await;
                return Err(err);
            }
        };
        self.events
            .emit(ControllerEvent::InfoRequested { url: url.clone() });

        match self.info.fetch(&url).await {
            Ok((url, info)) => {
                {
                    let mut session = self.session.lock().await;
                    drop(fetch);
                    session.current_url = Some(url.clone());
                    session.apply(&self.events, Transition::FetchSucceeded(info.clone()));
                }
                self.events.emit(ControllerEvent::InfoReady {
                    url,
                    info: info.clone(),
                });
                Ok(info)
            }
            Err(err) => {
                log::warn!("Info fetch for {} failed: {}", url, err);
                {
                    let mut session = self.session.lock().await;
                    drop(fetch);
                    session.apply(&self.events, Transition::FetchFailed);
                }
                self.report_info_error(&err).await;
                Err(err)
            }
        }
    }

    /// Change the output format used by the next download.
    pub async fn select_format(&self, format: DownloadFormat) {
        self.session
            .update_view(&self.events, Transition::FormatSelected(format))
            .await;
    }

    /// Start a download for the last fetched URL. See `DownloadManager::download`.
    pub async fn download(&self) -> Result<Option<AttemptHandle>, ClientError> {
        self.downloads.download().await
    }

    pub async fn notify(&self, message: impl Into<String>, kind: NotificationKind) -> u64 {
        self.notifier.notify(message, kind).await
    }

    pub async fn view(&self) -> ViewModel {
        self.session.view().await
    }

    pub async fn phase(&self) -> DownloadPhase {
        self.session.phase().await
    }

    pub async fn current_url(&self) -> Option<String> {
        self.session.current_url().await
    }

    /// Cancel any live attempt and pending timers.
    pub async fn shutdown(&self) {
        log::info!("Controller shutting down");
        self.downloads.shutdown().await;
        self.notifier.shutdown().await;
    }

    async fn report_info_error(&self, err: &ClientError) {
        self.notifier.error(err.user_message()).await;
        self.events.emit(ControllerEvent::InfoFailed {
            error_code: err.code(),
            user_message: err.user_message(),
        });
    }
}
