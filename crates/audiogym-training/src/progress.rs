use crate::job::{JobSlug, Stage};
use crate::runner::LogRecord;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

/// Everything the coordinator reports back to its caller while a stage runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A user-visible notification.
    Notice { level: NoticeLevel, message: String },
    /// A record relayed from the stage subprocess.
    Log { job: JobSlug, stage: Stage, record: LogRecord },
    /// The stage subprocess has exited.
    Finished { job: JobSlug, stage: Stage, success: bool },
}

impl ProgressEvent {
    pub(crate) fn info(message: impl Into<String>) -> Self {
        Self::Notice { level: NoticeLevel::Info, message: message.into() }
    }

    pub(crate) fn warn(message: impl Into<String>) -> Self {
        Self::Notice { level: NoticeLevel::Warn, message: message.into() }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self::Notice { level: NoticeLevel::Error, message: message.into() }
    }
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Buffers every event; handy for callers that render after the fact and
/// for tests.
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgressSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Text of every relayed log line, in arrival order.
    #[must_use]
    pub fn log_lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Log { record: LogRecord::Line { text, .. }, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn notices(&self, level: NoticeLevel) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Notice { level: l, message } if l == level => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for CollectingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
