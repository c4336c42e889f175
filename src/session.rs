use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::download_manager::DownloadPhase;
use crate::events::{ControllerEvent, EventSink};
use crate::models::DownloadFormat;
use crate::view::{Transition, ViewModel};

/// Mutable state shared by the controller's components.
#[derive(Debug)]
pub struct SessionState {
    pub view: ViewModel,
    /// Last URL whose info fetch succeeded.
    pub current_url: Option<String>,
    pub phase: DownloadPhase,
}

impl SessionState {
    /// Fold `transition` into the view. Returns `true` if anything changed.
    pub fn apply(&mut self, events: &EventSink, transition: Transition) -> bool {
        let next = self.view.apply(&transition);
        if next == self.view {
            return false;
        }
        self.view = next;
        events.emit(ControllerEvent::ViewChanged {
            view: self.view.clone(),
        });
        true
    }

    pub fn format(&self) -> DownloadFormat {
        self.view.format
    }
}

/// Clonable handle to the session. The lock is never held across network calls.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<SessionState>>,
    fetches: Arc<AtomicUsize>,
}

/// Marks an info fetch as in flight until dropped.
///
/// Take it while holding the session lock and drop it under the same lock as
/// the fetch's final transition, so a download never starts in between.
#[derive(Debug)]
pub struct FetchGuard {
    fetches: Arc<AtomicUsize>,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        self.fetches.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SessionHandle {
    pub fn new(format: DownloadFormat) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                view: ViewModel::new(format),
                current_url: None,
                phase: DownloadPhase::Idle,
            })),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn begin_fetch(&self) -> FetchGuard {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        FetchGuard {
            fetches: self.fetches.clone(),
        }
    }

    pub fn fetch_in_flight(&self) -> bool {
        self.fetches.load(Ordering::SeqCst) > 0
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().await
    }

    pub async fn view(&self) -> ViewModel {
        self.inner.lock().await.view.clone()
    }

    pub async fn phase(&self) -> DownloadPhase {
        self.inner.lock().await.phase.clone()
    }

    pub async fn current_url(&self) -> Option<String> {
        self.inner.lock().await.current_url.clone()
    }

    pub async fn update_view(&self, events: &EventSink, transition: Transition) -> bool {
        self.inner.lock().await.apply(events, transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_guard_counts_until_dropped() {
        let session = SessionHandle::new(DownloadFormat::Audio);
        assert!(!session.fetch_in_flight());

        let first = session.begin_fetch();
        let second = session.clone().begin_fetch();
        drop(first);
        assert!(session.fetch_in_flight());

        drop(second);
        assert!(!session.fetch_in_flight());
    }
}
