//! User-visible notifications.
//!
//! The engine never renders anything; it hands [`Notice`]s to a
//! [`Notifier`] supplied by the host (a toast surface, a status line, a log).

use jiff::Timestamp;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A notification message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// The message to display
    pub message: String,
    /// The severity level of the notice
    pub level: NoticeLevel,
    /// When the notice was raised
    pub timestamp: Timestamp,
}

/// Severity level for notices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
    Success,
}

enum_display!(NoticeLevel, {
    Info => "info",
    Warning => "warning",
    Error => "error",
    Success => "success",
});

impl Notice {
    pub fn new(message: String, level: NoticeLevel) -> Self {
        Self {
            message,
            level,
            timestamp: Timestamp::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message.into(), NoticeLevel::Info)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message.into(), NoticeLevel::Warning)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message.into(), NoticeLevel::Error)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(message.into(), NoticeLevel::Success)
    }
}

/// Receives notices. Must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Keeps every notice in memory.
#[derive(Debug, Default)]
pub struct NoticeLog {
    notices: Mutex<Vec<Notice>>,
}

impl NoticeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn errors(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .iter()
            .filter(|n| n.level == NoticeLevel::Error)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.notices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock())
    }
}

impl Notifier for NoticeLog {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// Forwards notices to a channel, e.g. a UI task.
impl Notifier for mpsc::UnboundedSender<Notice> {
    fn notify(&self, notice: Notice) {
        if self.send(notice).is_err() {
            tracing::debug!("notice receiver dropped");
        }
    }
}
