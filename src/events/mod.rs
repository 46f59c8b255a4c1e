// Event broadcasting
//
// The capture pipeline announces progress to whatever transport is wired
// in (SSE bridge, test recorder, plain logs). Sinks are fire-and-forget:
// delivery problems are the sink's to log, never the pipeline's to handle.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    Normal,
    High,
}

/// Event sink collaborator. Implementations must not panic and must
/// swallow their own delivery failures.
pub trait EventSink: Send + Sync {
    fn create_event(
        &self,
        event_type: &str,
        event_data: serde_json::Value,
        priority: EventPriority,
        source: &str,
    );
}

/// Sink that writes events to the log. The default in CLI contexts.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn create_event(
        &self,
        event_type: &str,
        event_data: serde_json::Value,
        priority: EventPriority,
        source: &str,
    ) {
        log::info!(
            "event {} from {} ({:?}): {}",
            event_type,
            source,
            priority,
            event_data
        );
    }
}

/// A recorded event, as captured by [`MemoryEventSink`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub priority: EventPriority,
    pub source: String,
}

/// Sink that keeps events in memory. Used by tests and embedders that
/// drain events on their own schedule.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<RecordedEvent> {
        let mut guard = self.events.lock().unwrap();
        std::mem::take(&mut *guard)
    }

    pub fn snapshot(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for MemoryEventSink {
    fn create_event(
        &self,
        event_type: &str,
        event_data: serde_json::Value,
        priority: EventPriority,
        source: &str,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            event_type: event_type.to_string(),
            event_data,
            priority,
            source: source.to_string(),
        });
    }
}
