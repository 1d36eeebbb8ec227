//! Violation events for the host's activity stream.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// One enforced denial.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationEvent {
    /// Path the write targeted
    pub subject_path: String,
    /// Detected mimetype, if one was probed
    pub mimetype: Option<String>,
    /// Acting principal, if known
    pub actor: Option<String>,
    /// Whether the object was removed from storage
    pub deleted: bool,
    /// Denial detail
    pub detail: String,
}

impl ViolationEvent {
    /// Human readable subject line for an activity feed.
    pub fn subject(&self) -> String {
        let file = self
            .subject_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        format!(
            "File {} has illegal mime type {}",
            file,
            self.mimetype.as_deref().unwrap_or("unknown")
        )
    }

    /// Follow-up message for an activity feed.
    pub fn message(&self) -> Option<&'static str> {
        self.deleted.then_some("The file has been removed")
    }
}

/// Receives violation events.
pub trait ViolationSink: Send + Sync + std::fmt::Debug {
    /// Publish one event.
    fn publish(&self, event: ViolationEvent);
}

/// Writes events to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl ViolationSink for LogSink {
    fn publish(&self, event: ViolationEvent) {
        tracing::info!(
            path = %event.subject_path,
            mimetype = ?event.mimetype,
            actor = ?event.actor,
            deleted = event.deleted,
            "{}",
            event.subject()
        );
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ViolationEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far.
    pub fn events(&self) -> Vec<ViolationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ViolationSink for MemorySink {
    fn publish(&self, event: ViolationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(deleted: bool) -> ViolationEvent {
        ViolationEvent {
            subject_path: "files/Folder2/report.exe".to_string(),
            mimetype: Some("application/x-msdownload".to_string()),
            actor: Some("alice".to_string()),
            deleted,
            detail: String::new(),
        }
    }

    #[test]
    fn test_subject_uses_basename() {
        assert_eq!(
            event(false).subject(),
            "File report.exe has illegal mime type application/x-msdownload"
        );
    }

    #[test]
    fn test_message_only_when_deleted() {
        assert_eq!(event(true).message(), Some("The file has been removed"));
        assert_eq!(event(false).message(), None);
    }

    #[test]
    fn test_memory_sink_records() {
        let sink = MemorySink::new();
        sink.publish(event(true));
        sink.publish(event(false));
        assert_eq!(sink.events().len(), 2);
    }
}
