//! A recording event sink.

use parking_lot::Mutex;
use std::time::Duration;
use syncline_core::{EventSink, SyncEvent};

/// Collects every event an engine emits, tagged with its namespace.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, SyncEvent)>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded `(namespace, event)` pairs, in emission order.
    pub fn events(&self) -> Vec<(String, SyncEvent)> {
        self.events.lock().clone()
    }

    /// Returns true if any recorded event satisfies the predicate.
    pub fn contains(&self, predicate: impl Fn(&SyncEvent) -> bool) -> bool {
        self.events.lock().iter().any(|(_, e)| predicate(e))
    }

    /// The delays of every `ListenerRetrying` event, in emission order.
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, e)| match e {
                SyncEvent::ListenerRetrying { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }

    /// Drops everything recorded so far.
    pub fn reset(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn event(&self, namespace: &str, event: &SyncEvent) {
        self.events
            .lock()
            .push((namespace.to_string(), event.clone()));
    }
}
