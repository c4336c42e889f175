//! Download Manager
//!
//! Drives one download attempt at a time through
//! `Idle -> Starting -> Polling -> Finishing -> Idle` (or straight back to
//! `Idle` on failure) and owns the repeating poll task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::api::DownloadApi;
use crate::error::ClientError;
use crate::events::{ControllerEvent, EventSink, PollStopReason};
use crate::models::{DownloadRequest, JobOutcome, JobStatus, ProgressReport};
use crate::notifier::Notifier;
use crate::session::SessionHandle;
use crate::settings::Settings;
use crate::view::Transition;

pub const COMPLETE_MESSAGE: &str = "Download Complete!";
const JOB_ERROR_FALLBACK: &str = "Download failed";

/// Where the current attempt is. At most one attempt is live per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadPhase {
    Idle,
    Starting { attempt: Uuid },
    Polling { attempt: Uuid, job_id: String },
    /// File announced; waiting out the reset delay.
    Finishing { attempt: Uuid },
}

impl DownloadPhase {
    pub fn attempt(&self) -> Option<Uuid> {
        match self {
            DownloadPhase::Idle => None,
            DownloadPhase::Starting { attempt }
            | DownloadPhase::Polling { attempt, .. }
            | DownloadPhase::Finishing { attempt } => Some(*attempt),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, DownloadPhase::Idle)
    }
}

/// Timing for the poll loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub finish_reset_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            finish_reset_delay: Duration::from_millis(2000),
        }
    }
}

impl PollConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interval: settings.poll_interval(),
            finish_reset_delay: settings.finish_reset_delay(),
        }
    }
}

/// What one poll response means for the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    /// downloading/processing: show this percent.
    Progress(f64),
    /// Queued or unrecognized status; keep polling without touching the view.
    Wait,
    Finished(String),
    Failed(ClientError),
}

/// Classify a status query result.
pub fn next_step(result: Result<ProgressReport, ClientError>) -> PollStep {
    let report = match result {
        Ok(report) => report,
        Err(e) => return PollStep::Failed(e),
    };
    match report.status {
        JobStatus::Downloading | JobStatus::Processing => {
            PollStep::Progress(report.percent_or_zero())
        }
        JobStatus::Finished => match report.filename.filter(|f| !f.trim().is_empty()) {
            Some(filename) => PollStep::Finished(filename),
            None => PollStep::Failed(ClientError::protocol(
                "Server reported a finished job without a filename",
            )),
        },
        JobStatus::Error => PollStep::Failed(ClientError::job(
            report
                .error
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| JOB_ERROR_FALLBACK.to_string()),
        )),
        JobStatus::Queued | JobStatus::Unknown => PollStep::Wait,
    }
}

/// Returned by a successful `download()`; resolves when the attempt settles.
#[derive(Debug)]
pub struct AttemptHandle {
    pub attempt: Uuid,
    pub job_id: String,
    outcome_rx: oneshot::Receiver<JobOutcome>,
}

impl AttemptHandle {
    pub async fn outcome(self) -> JobOutcome {
        self.outcome_rx.await.unwrap_or(JobOutcome::Cancelled)
    }
}

struct ActiveJob {
    attempt: Uuid,
    cancel_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Download Manager runs the start-job call and the poll task.
pub struct DownloadManager<A: DownloadApi> {
    api: Arc<A>,
    config: PollConfig,
    session: SessionHandle,
    notifier: Notifier,
    events: EventSink,
    active: Arc<Mutex<Option<ActiveJob>>>,
}

impl<A: DownloadApi> Clone for DownloadManager<A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            config: self.config.clone(),
            session: self.session.clone(),
            notifier: self.notifier.clone(),
            events: self.events.clone(),
            active: self.active.clone(),
        }
    }
}

impl<A: DownloadApi> DownloadManager<A> {
    pub fn new(
        api: Arc<A>,
        config: PollConfig,
        session: SessionHandle,
        notifier: Notifier,
        events: EventSink,
    ) -> Self {
        let mut config = config;
        // tokio's interval panics on a zero period.
        config.interval = config.interval.max(Duration::from_millis(1));
        Self {
            api,
            config,
            session,
            notifier,
            events,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Start a download for the last fetched URL with the selected format.
    ///
    /// Returns `Ok(None)` without side effects when no URL has been fetched,
    /// an info fetch is in flight, or an attempt is already live. A failed
    /// start-job call is reported through the notifier and also returned.
    pub async fn download(&self) -> Result<Option<AttemptHandle>, ClientError> {
        let (attempt, request) = {
            let mut session = self.session.lock().await;
            let Some(url) = session.current_url.clone() else {
                log::debug!("Download requested before any info fetch, ignoring");
                return Ok(None);
            };
            if !session.phase.is_idle() {
                log::info!(
                    "Download requested while {:?} is live, ignoring",
                    session.phase
                );
                return Ok(None);
            }
            if self.session.fetch_in_flight() {
                log::info!("Download requested while an info fetch is in flight, ignoring");
                return Ok(None);
            }
            let attempt = Uuid::new_v4();
            let format = session.format();
            session.phase = DownloadPhase::Starting { attempt };
            session.apply(&self.events, Transition::DownloadStarting(format));
            (attempt, DownloadRequest::new(url, format))
        };

        log::info!(
            "Starting download {} for {} as {}",
            attempt,
            request.url,
            request.format
        );
        self.events.emit(ControllerEvent::DownloadStarting {
            attempt,
            url: request.url.clone(),
            format: request.format,
        });

        let started = match self.api.start_download(&request).await {
            Ok(started) if !started.job_id.trim().is_empty() => started,
            Ok(_) => {
                let err = ClientError::protocol("Server returned an empty job id");
                self.fail(attempt, &err).await;
                return Err(err);
            }
            Err(err) => {
                log::warn!("Start download {} failed: {}", attempt, err);
                self.fail(attempt, &err).await;
                return Err(err);
            }
        };
        let job_id = started.job_id;

        {
            let mut session = self.session.lock().await;
            if session.phase.attempt() != Some(attempt) {
                log::info!("Attempt {} was cancelled while starting", attempt);
                return Ok(None);
            }
            session.phase = DownloadPhase::Polling {
                attempt,
                job_id: job_id.clone(),
            };
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        if !self.spawn_poll(attempt, job_id.clone(), outcome_tx).await {
            log::info!("Attempt {} was cancelled before polling began", attempt);
            return Ok(None);
        }

        Ok(Some(AttemptHandle {
            attempt,
            job_id,
            outcome_rx,
        }))
    }

    /// Cancel the live attempt, if any, and return to `Idle`.
    pub async fn shutdown(&self) {
        let job = {
            let mut active = self.active.lock().await;
            let job = active.take();
            if job.is_none() {
                // Under the `active` lock, so a racing `spawn_poll` sees the
                // attempt gone and never starts a task.
                self.reset_phase().await;
            }
            job
        };
        if let Some(job) = job {
            log::info!("Cancelling attempt {}", job.attempt);
            let _ = job.cancel_tx.send(());
            if let Err(e) = job.task.await {
                if !e.is_cancelled() {
                    log::error!("Poll task for {} panicked: {}", job.attempt, e);
                }
            }
        }

        // An attempt still waiting on its start-job call has no task yet.
        self.reset_phase().await;
    }

    async fn reset_phase(&self) {
        let mut session = self.session.lock().await;
        if !session.phase.is_idle() {
            session.phase = DownloadPhase::Idle;
            session.apply(&self.events, Transition::Failed);
        }
    }

    /// Start the poll task for `attempt`. Returns `false` without spawning if
    /// the attempt stopped being current before the task could be registered.
    async fn spawn_poll(
        &self,
        attempt: Uuid,
        job_id: String,
        outcome_tx: oneshot::Sender<JobOutcome>,
    ) -> bool {
        let mut active = self.active.lock().await;
        if !self.is_current(attempt).await {
            return false;
        }
        log::info!("Attempt {} started job {}", attempt, job_id);
        self.events.emit(ControllerEvent::JobStarted {
            attempt,
            job_id: job_id.clone(),
        });

        if let Some(previous) = active.take() {
            log::warn!("Cancelling stale poll task for {}", previous.attempt);
            let _ = previous.cancel_tx.send(());
            previous.task.abort();
        }

        let (cancel_tx, cancel_rx) = broadcast::channel::<()>(1);
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let outcome = manager.run_attempt(attempt, job_id, cancel_rx).await;
            let _ = outcome_tx.send(outcome);
        });

        *active = Some(ActiveJob {
            attempt,
            cancel_tx,
            task,
        });
        true
    }

    /// Poll until terminal, then settle the attempt.
    async fn run_attempt(
        &self,
        attempt: Uuid,
        job_id: String,
        mut cancel_rx: broadcast::Receiver<()>,
    ) -> JobOutcome {
        let step = self.poll_job(attempt, &job_id, &mut cancel_rx).await;

        let reason = match &step {
            Some(PollStep::Finished(_)) => PollStopReason::Finished,
            Some(PollStep::Failed(ClientError::Job(_))) => PollStopReason::JobError,
            Some(_) => PollStopReason::QueryFailed,
            None => PollStopReason::Cancelled,
        };
        log::info!("Poll for job {} stopped: {:?}", job_id, reason);
        self.events.emit(ControllerEvent::PollStopped {
            attempt,
            job_id: job_id.clone(),
            reason,
        });

        match step {
            Some(PollStep::Finished(filename)) => {
                self.finish(attempt, filename, &mut cancel_rx).await
            }
            Some(PollStep::Failed(err)) => {
                self.release(attempt).await;
                self.fail(attempt, &err).await;
                JobOutcome::Failed(err)
            }
            Some(PollStep::Progress(_)) | Some(PollStep::Wait) | None => {
                self.settle_cancelled(attempt).await;
                JobOutcome::Cancelled
            }
        }
    }

    /// The repeating status query. Returns the terminal step, or `None` if
    /// cancelled or superseded.
    async fn poll_job(
        &self,
        attempt: Uuid,
        job_id: &str,
        cancel_rx: &mut broadcast::Receiver<()>,
    ) -> Option<PollStep> {
        let period = self.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => return None,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = cancel_rx.recv() => return None,
                r = self.api.job_progress(job_id) => r,
            };

            if !self.is_current(attempt).await {
                log::warn!("Dropping poll response for superseded attempt {}", attempt);
                return None;
            }

            match next_step(result) {
                PollStep::Progress(percent) => {
                    log::debug!("Job {} at {:.1}%", job_id, percent);
                    self.session
                        .update_view(&self.events, Transition::Progress(percent))
                        .await;
                    self.events.emit(ControllerEvent::JobProgress {
                        attempt,
                        job_id: job_id.to_string(),
                        percent,
                    });
                }
                PollStep::Wait => {
                    log::debug!("Job {} not started yet", job_id);
                }
                terminal => return Some(terminal),
            }
        }
    }

    async fn finish(
        &self,
        attempt: Uuid,
        filename: String,
        cancel_rx: &mut broadcast::Receiver<()>,
    ) -> JobOutcome {
        let file_url = match self.api.file_url(&filename) {
            Ok(url) => url,
            Err(err) => {
                self.release(attempt).await;
                self.fail(attempt, &err).await;
                return JobOutcome::Failed(err);
            }
        };

        {
            let mut session = self.session.lock().await;
            if session.phase.attempt() != Some(attempt) {
                return JobOutcome::Cancelled;
            }
            session.phase = DownloadPhase::Finishing { attempt };
            session.apply(&self.events, Transition::Finished);
        }

        log::info!("Attempt {} finished, file at {}", attempt, file_url);
        self.events.emit(ControllerEvent::FileReady {
            attempt,
            filename: filename.clone(),
            file_url: file_url.clone(),
        });

        tokio::select! {
            _ = tokio::time::sleep(self.config.finish_reset_delay) => {}
            _ = cancel_rx.recv() => {
                self.settle_cancelled(attempt).await;
                return JobOutcome::Cancelled;
            }
        }

        self.release(attempt).await;
        {
            let mut session = self.session.lock().await;
            if session.phase.attempt() != Some(attempt) {
                return JobOutcome::Cancelled;
            }
            session.phase = DownloadPhase::Idle;
            session.apply(&self.events, Transition::Restored);
        }

        self.notifier.success(COMPLETE_MESSAGE).await;
        self.events.emit(ControllerEvent::DownloadCompleted { attempt });

        JobOutcome::Completed { filename, file_url }
    }

    /// Failed: restore the results view and report. Returns `false` if the
    /// attempt was no longer current.
    async fn fail(&self, attempt: Uuid, err: &ClientError) -> bool {
        {
            let mut session = self.session.lock().await;
            if session.phase.attempt() != Some(attempt) {
                log::debug!("Ignoring failure of superseded attempt {}", attempt);
                return false;
            }
            session.phase = DownloadPhase::Idle;
            session.apply(&self.events, Transition::Failed);
        }

        self.notifier.error(err.user_message()).await;
        self.events.emit(ControllerEvent::DownloadFailed {
            attempt,
            error_code: err.code(),
            user_message: err.user_message(),
        });
        true
    }

    async fn settle_cancelled(&self, attempt: Uuid) {
        self.release(attempt).await;
        let mut session = self.session.lock().await;
        if session.phase.attempt() == Some(attempt) {
            session.phase = DownloadPhase::Idle;
            session.apply(&self.events, Transition::Failed);
        }
    }

    /// Drop our own entry from `active`; never touches a newer attempt's entry.
    async fn release(&self, attempt: Uuid) {
        let mut active = self.active.lock().await;
        if active.as_ref().map(|job| job.attempt) == Some(attempt) {
            *active = None;
        }
    }

    async fn is_current(&self, attempt: Uuid) -> bool {
        self.session.phase().await.attempt() == Some(attempt)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::models::{DownloadFormat, StartedJob, VideoInfo};

    #[derive(Default)]
    struct CountingApi {
        progress_calls: AtomicUsize,
    }

    #[async_trait]
    impl DownloadApi for CountingApi {
        async fn video_info(&self, _url: &str) -> Result<VideoInfo, ClientError> {
            Ok(VideoInfo::default())
        }

        async fn start_download(
            &self,
            _request: &DownloadRequest,
        ) -> Result<StartedJob, ClientError> {
            Ok(StartedJob {
                job_id: "job".into(),
            })
        }

        async fn job_progress(&self, _job_id: &str) -> Result<ProgressReport, ClientError> {
            self.progress_calls.fetch_add(1, Ordering::SeqCst);
            Ok(report(JobStatus::Processing))
        }

        fn file_url(&self, filename: &str) -> Result<String, ClientError> {
            Ok(format!("/api/get_file/{filename}"))
        }
    }

    fn manager() -> (DownloadManager<CountingApi>, Arc<CountingApi>, SessionHandle) {
        let api = Arc::new(CountingApi::default());
        let session = SessionHandle::new(DownloadFormat::Audio);
        let notifier = Notifier::new(
            session.clone(),
            EventSink::disabled(),
            Duration::from_secs(5),
        );
        let manager = DownloadManager::new(
            api.clone(),
            PollConfig::default(),
            session.clone(),
            notifier,
            EventSink::disabled(),
        );
        (manager, api, session)
    }

    fn report(status: JobStatus) -> ProgressReport {
        ProgressReport {
            status,
            percent: None,
            filename: None,
            error: None,
        }
    }

    #[test]
    fn missing_percent_counts_as_zero() {
        assert_eq!(
            next_step(Ok(report(JobStatus::Downloading))),
            PollStep::Progress(0.0)
        );
    }

    #[test]
    fn finished_carries_filename() {
        let mut r = report(JobStatus::Finished);
        r.filename = Some("abc.mp3".into());
        assert_eq!(next_step(Ok(r)), PollStep::Finished("abc.mp3".into()));
    }

    #[test]
    fn finished_without_filename_is_protocol_error() {
        assert!(matches!(
            next_step(Ok(report(JobStatus::Finished))),
            PollStep::Failed(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn job_error_uses_server_message() {
        let mut r = report(JobStatus::Error);
        r.error = Some("ffmpeg missing".into());
        assert_eq!(
            next_step(Ok(r)),
            PollStep::Failed(ClientError::Job("ffmpeg missing".into()))
        );
        assert_eq!(
            next_step(Ok(report(JobStatus::Error))),
            PollStep::Failed(ClientError::Job(JOB_ERROR_FALLBACK.into()))
        );
    }

    #[test]
    fn queued_and_unknown_wait() {
        assert_eq!(next_step(Ok(report(JobStatus::Queued))), PollStep::Wait);
        assert_eq!(next_step(Ok(report(JobStatus::Unknown))), PollStep::Wait);
    }

    #[test]
    fn query_error_fails() {
        let err = ClientError::Network("connection reset".into());
        assert_eq!(next_step(Err(err.clone())), PollStep::Failed(err));
    }

    #[test]
    fn phase_attempt() {
        let id = Uuid::new_v4();
        assert_eq!(DownloadPhase::Idle.attempt(), None);
        assert_eq!(DownloadPhase::Finishing { attempt: id }.attempt(), Some(id));
        assert!(!DownloadPhase::Starting { attempt: id }.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn no_poll_task_for_attempt_reset_before_spawn() {
        let (manager, api, session) = manager();
        let attempt = Uuid::new_v4();
        session.lock().await.phase = DownloadPhase::Polling {
            attempt,
            job_id: "job".into(),
        };

        // Shutdown lands before the task is registered.
        manager.shutdown().await;
        assert!(session.phase().await.is_idle());

        let (tx, rx) = oneshot::channel();
        assert!(!manager.spawn_poll(attempt, "job".into(), tx).await);
        assert!(manager.active.lock().await.is_none());
        assert!(rx.await.is_err());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.progress_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn current_attempt_gets_a_poll_task() {
        let (manager, api, session) = manager();
        let attempt = Uuid::new_v4();
        session.lock().await.phase = DownloadPhase::Polling {
            attempt,
            job_id: "job".into(),
        };

        let (tx, _rx) = oneshot::channel();
        assert!(manager.spawn_poll(attempt, "job".into(), tx).await);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(api.progress_calls.load(Ordering::SeqCst), 1);

        manager.shutdown().await;
        assert!(manager.active.lock().await.is_none());
    }

    #[test]
    fn zero_interval_is_clamped() {
        let session = SessionHandle::new(DownloadFormat::Audio);
        let notifier = Notifier::new(session.clone(), EventSink::disabled(), Duration::ZERO);
        let manager = DownloadManager::new(
            Arc::new(CountingApi::default()),
            PollConfig {
                interval: Duration::ZERO,
                finish_reset_delay: Duration::ZERO,
            },
            session,
            notifier,
            EventSink::disabled(),
        );
        assert_eq!(manager.config.interval, Duration::from_millis(1));
    }
}
