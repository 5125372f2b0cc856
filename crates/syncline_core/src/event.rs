//! Structured lifecycle events.
//!
//! Events are purely observational: they never affect control flow. Engines
//! tag every event with their configured namespace so one sink can serve
//! several engines.

use std::time::Duration;

/// The kind of remote write an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Full-document save.
    Save,
    /// Partial field update.
    Update,
    /// Document deletion.
    Delete,
}

/// A lifecycle event emitted by a sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A listener was started.
    ListenerStarted,
    /// The change stream delivered its first event.
    ListenerAttached,
    /// The change stream failed or terminated.
    ListenerFailed {
        /// Description of the failure.
        error: String,
    },
    /// A re-attach has been scheduled.
    ListenerRetrying {
        /// Consecutive failures since the last success.
        retry_count: u32,
        /// Delay before the next attach attempt.
        delay: Duration,
    },
    /// The listener was explicitly stopped.
    ListenerStopped,
    /// A remote write was issued.
    WriteStarted {
        /// Kind of write.
        kind: WriteKind,
        /// Target document id, when known.
        id: Option<String>,
    },
    /// A remote write succeeded.
    WriteSucceeded {
        /// Kind of write.
        kind: WriteKind,
        /// Target document id, when known.
        id: Option<String>,
    },
    /// A remote write failed.
    WriteFailed {
        /// Kind of write.
        kind: WriteKind,
        /// Target document id, when known.
        id: Option<String>,
        /// Description of the failure.
        error: String,
    },
    /// A failed update was queued for later resend.
    PendingWriteQueued {
        /// Merge target, absent for single-document engines.
        id: Option<String>,
    },
    /// A queued write was cleared.
    PendingWriteCleared {
        /// Merge target, absent for single-document engines.
        id: Option<String>,
    },
    /// A flush of queued writes began.
    PendingFlushStarted {
        /// Number of queued entries at flush start.
        queued: usize,
    },
    /// A flush of queued writes finished.
    PendingFlushCompleted {
        /// Entries that reached the remote and were dropped.
        synced: usize,
        /// Entries that failed and remain queued.
        failed: usize,
    },
    /// In-memory and persisted caches were wiped.
    CachesCleared,
}

/// Receives lifecycle events from engines.
pub trait EventSink: Send + Sync {
    /// Called for every event, tagged with the emitting engine's namespace.
    fn event(&self, namespace: &str, event: &SyncEvent);
}
