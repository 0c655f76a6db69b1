//! Backend message logs, modal notices and the transient auto-dismissing message.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::protocol::MessageLogEntry;
use tokio::task::JoinHandle;
use tracing::debug;

pub const NO_MESSAGES: &str = "No messages returned.";
pub const NOTICE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Severity {
    #[default]
    Information,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub title: String,
    pub text: String,
}

impl Notice {
    pub fn new(severity: Severity, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            text: text.into(),
        }
    }
}

/// Presentation collaborator. Rendering and localization live on the other side.
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Shows a modal notice and resolves once the operator has dismissed it.
    async fn show(&self, notice: Notice);

    /// Short non-blocking toast.
    fn toast(&self, text: &str);
}

pub fn is_failure(entry: &MessageLogEntry) -> bool {
    entry.is_failure()
}

pub fn has_failure(entries: &[MessageLogEntry]) -> bool {
    entries.iter().any(is_failure)
}

pub fn summarize(entries: &[MessageLogEntry]) -> String {
    if entries.is_empty() {
        return NO_MESSAGES.to_string();
    }
    entries
        .iter()
        .map(|entry| format!("{}: {}", entry.msg_type, entry.message))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone)]
pub struct MessageLogPresenter {
    presenter: Arc<dyn Presenter>,
}

impl MessageLogPresenter {
    pub fn new(presenter: Arc<dyn Presenter>) -> Self {
        Self { presenter }
    }

    /// Shows the log summary; `on_close` runs only after the notice was dismissed.
    pub async fn present<F, R>(&self, entries: &[MessageLogEntry], title: &str, on_close: F) -> R
    where
        F: FnOnce() -> R,
    {
        let severity = if has_failure(entries) {
            Severity::Error
        } else {
            Severity::Information
        };
        self.presenter
            .show(Notice::new(severity, title, summarize(entries)))
            .await;
        on_close()
    }

    pub async fn notify(&self, severity: Severity, title: &str, text: impl Into<String>) {
        self.presenter.show(Notice::new(severity, title, text)).await;
    }

    pub fn toast(&self, text: &str) {
        self.presenter.toast(text);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransientState {
    pub visible: bool,
    pub severity: Severity,
    pub text: String,
}

/// Inline message that hides itself after a fixed delay.
///
/// Showing a new message restarts the delay instead of queueing; dismissing or dropping the
/// owner cancels it. Must be used from within a Tokio runtime.
pub struct TransientNotice {
    state: Arc<Mutex<TransientState>>,
    shown: Arc<AtomicU64>,
    timer: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TransientNotice {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(TransientState::default())),
            shown: Arc::new(AtomicU64::new(0)),
            timer: Mutex::new(None),
            timeout,
        }
    }

    pub fn show(&self, severity: Severity, text: impl Into<String>) {
        self.cancel_timer();
        // A timer already past its sleep cannot be aborted; the sequence check makes it a no-op.
        let seq = self.shown.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = lock(&self.state);
            state.visible = true;
            state.severity = severity;
            state.text = text.into();
        }

        let state = Arc::clone(&self.state);
        let shown = Arc::clone(&self.shown);
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if shown.load(Ordering::SeqCst) == seq {
                lock(&state).visible = false;
                debug!(seq, "transient notice auto-dismissed");
            }
        });
        *lock(&self.timer) = Some(handle);
    }

    pub fn dismiss(&self) {
        self.cancel_timer();
        self.shown.fetch_add(1, Ordering::SeqCst);
        lock(&self.state).visible = false;
    }

    pub fn is_visible(&self) -> bool {
        lock(&self.state).visible
    }

    pub fn snapshot(&self) -> TransientState {
        lock(&self.state).clone()
    }

    fn cancel_timer(&self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
        }
    }
}

impl Drop for TransientNotice {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

#[cfg(test)]
#[path = "tests/message_log_tests.rs"]
mod tests;
