//! Ordered, keyed buffering of failed partial updates.

use crate::error::EngineResult;
use std::future::Future;
use syncline_core::{FieldMap, PendingWrite};

/// How queue entries are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// At most one live entry regardless of target; the owning engine's
    /// bound document id is the implicit target.
    Single,
    /// At most one entry per target id.
    Keyed,
}

/// Counts reported by a flush attempt.
///
/// `synced + failed` always equals the queue size before the flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Entries that reached the remote and were dropped from the queue.
    pub synced: usize,
    /// Entries that failed and remain queued.
    pub failed: usize,
}

/// An ordered buffer of field-level mutations awaiting resend.
///
/// Repeated writes to the same target merge into one entry; the invariant
/// is at most one entry per target at any time. The queue is a plain data
/// structure with no timers of its own: flushes are attempted
/// opportunistically by the owning engine, and backoff lives in the
/// listener retry controller.
#[derive(Debug)]
pub struct PendingWriteQueue {
    mode: QueueMode,
    entries: Vec<PendingWrite>,
}

impl PendingWriteQueue {
    /// Creates an empty queue.
    pub fn new(mode: QueueMode) -> Self {
        Self {
            mode,
            entries: Vec::new(),
        }
    }

    /// Restores a queue from persisted entries, re-merging duplicates in
    /// case the persisted form predates the single-entry invariant.
    pub fn from_entries(mode: QueueMode, entries: Vec<PendingWrite>) -> Self {
        let mut queue = Self::new(mode);
        for entry in entries {
            queue.push_entry(entry);
        }
        queue
    }

    /// The queue's keying mode.
    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    /// Queues fields for `target_id`, merging into an existing entry if one
    /// is live for that target (later values win, the original entry's
    /// `created_at` is retained).
    pub fn add(&mut self, target_id: Option<&str>, fields: FieldMap) {
        self.push_entry(PendingWrite::new(target_id, fields));
    }

    /// Removes the entry for `target_id`; in single mode removes the sole
    /// entry. Returns true if an entry was removed.
    pub fn clear(&mut self, target_id: Option<&str>) -> bool {
        match self.position(target_id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes every entry.
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    /// The live entry for `target_id`, if any.
    pub fn entry(&self, target_id: Option<&str>) -> Option<&PendingWrite> {
        self.position(target_id).map(|index| &self.entries[index])
    }

    /// All queued entries, oldest first.
    pub fn entries(&self) -> &[PendingWrite] {
        &self.entries
    }

    /// Consumes the queue, yielding its entries.
    pub fn into_entries(self) -> Vec<PendingWrite> {
        self.entries
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prepends entries queued before the current contents, re-merging per
    /// target so newer field values win while the older entry's
    /// `created_at` is retained.
    ///
    /// Used to reconcile entries taken out for a flush with writes queued
    /// while the flush was in flight.
    pub fn merge_front(&mut self, older: Vec<PendingWrite>) {
        let newer = std::mem::take(&mut self.entries);
        self.entries = older;
        for entry in newer {
            self.push_entry(entry);
        }
    }

    /// Attempts to resend every queued entry sequentially.
    ///
    /// Entries that succeed are dropped; entries that fail remain queued in
    /// their original relative order. The callback receives the entry's
    /// target id and fields. There is no backoff here: a flush against an
    /// unreachable remote simply keeps everything queued.
    pub async fn flush<F, Fut>(&mut self, mut send: F) -> FlushStats
    where
        F: FnMut(Option<String>, FieldMap) -> Fut,
        Fut: Future<Output = EngineResult<()>>,
    {
        let queued = std::mem::take(&mut self.entries);
        let mut stats = FlushStats::default();

        for entry in queued {
            match send(entry.target_id.clone(), entry.fields.clone()).await {
                Ok(()) => stats.synced += 1,
                Err(_) => {
                    stats.failed += 1;
                    self.entries.push(entry);
                }
            }
        }

        stats
    }

    fn position(&self, target_id: Option<&str>) -> Option<usize> {
        match self.mode {
            QueueMode::Single => (!self.entries.is_empty()).then_some(0),
            QueueMode::Keyed => self
                .entries
                .iter()
                .position(|e| e.target_id.as_deref() == target_id),
        }
    }

    fn push_entry(&mut self, entry: PendingWrite) {
        match self.position(entry.target_id.as_deref()) {
            Some(index) => self.entries[index].merge(&entry.fields),
            None => self.entries.push(entry),
        }
    }
}
