use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::events::{ControllerEvent, EventSink};
use crate::session::SessionHandle;
use crate::view::{Notification, NotificationKind, Transition};

#[derive(Default)]
struct NotifierState {
    next_id: u64,
    hide_task: Option<JoinHandle<()>>,
}

/// Transient banner with an auto-hide timer.
///
/// Replace-and-reset: a new notification replaces the visible one and restarts
/// the hide timer. The previous timer is aborted, and the hide itself only
/// clears the banner whose id it was scheduled for.
#[derive(Clone)]
pub struct Notifier {
    state: Arc<Mutex<NotifierState>>,
    session: SessionHandle,
    events: EventSink,
    hide_after: Duration,
}

impl Notifier {
    pub fn new(session: SessionHandle, events: EventSink, hide_after: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(NotifierState::default())),
            session,
            events,
            hide_after,
        }
    }

    pub async fn info(&self, message: impl Into<String>) -> u64 {
        self.notify(message, NotificationKind::Info).await
    }

    pub async fn error(&self, message: impl Into<String>) -> u64 {
        self.notify(message, NotificationKind::Error).await
    }

    pub async fn success(&self, message: impl Into<String>) -> u64 {
        self.notify(message, NotificationKind::Success).await
    }

    /// Show `message` and schedule its hide. Returns the notification id.
    pub async fn notify(&self, message: impl Into<String>, kind: NotificationKind) -> u64 {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;

        if let Some(previous) = state.hide_task.take() {
            previous.abort();
        }

        let notification = Notification {
            id,
            kind,
            message: message.into(),
        };
        match kind {
            NotificationKind::Error => log::warn!("Notify [{}]: {}", id, notification.message),
            _ => log::info!("Notify [{}]: {}", id, notification.message),
        }

        self.session
            .update_view(&self.events, Transition::NotificationShown(notification.clone()))
            .await;
        self.events.emit(ControllerEvent::Notification {
            notification,
            at: Utc::now(),
        });

        let session = self.session.clone();
        let events = self.events.clone();
        let hide_after = self.hide_after;
        state.hide_task = Some(tokio::spawn(async move {
            tokio::time::sleep(hide_after).await;
            if session
                .update_view(&events, Transition::NotificationHidden(id))
                .await
            {
                events.emit(ControllerEvent::NotificationHidden { id });
            }
        }));

        id
    }

    /// Cancel the pending hide timer, leaving the banner as it is.
    pub async fn shutdown(&self) {
        if let Some(task) = self.state.lock().await.hide_task.take() {
            task.abort();
        }
    }
}
