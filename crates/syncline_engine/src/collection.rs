//! Synchronization engine for a bounded collection of remote documents.

use crate::config::EngineConfig;
use crate::document::FetchPolicy;
use crate::error::{EngineError, EngineResult};
use crate::listener::{AttachFn, AttachHandle, ListenerRetryController, ListenerState};
use crate::pending::{PendingWriteQueue, QueueMode};
use crate::remote::RemoteCollectionService;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use syncline_core::{Document, EventSink, FieldMap, QueryBuilder, SyncEvent, WriteKind};
use syncline_store::LocalCollectionStore;
use tracing::{debug, warn};

struct CollectionState<D> {
    cache: Vec<D>,
    queue: PendingWriteQueue,
}

/// Owns a bounded set of remote documents.
///
/// `start_listening` performs a hybrid sync: one bulk load replaces the
/// cache wholesale, then the upserts and deletions streams are applied
/// incrementally. The two streams carry no ordering relative to each
/// other; per-key application is idempotent, so the last event applied
/// wins. That race is accepted: backends do not re-race it on a single
/// connection.
///
/// Snapshot persistence is offloaded to a background task because
/// serializing a large collection must not block listener processing; the
/// background task only touches the standalone store, never engine state.
pub struct CollectionSyncEngine<D: Document> {
    config: EngineConfig,
    remote: Arc<dyn RemoteCollectionService<D>>,
    store: Arc<dyn LocalCollectionStore<D>>,
    sink: Option<Arc<dyn EventSink>>,
    listener: Arc<ListenerRetryController>,
    state: Mutex<CollectionState<D>>,
    // Snapshot writes are ordered by sequence number; the gate records the
    // highest sequence already written (or invalidated by a cache clear).
    snapshot_seq: AtomicU64,
    snapshot_gate: Arc<tokio::sync::Mutex<u64>>,
}

impl<D: Document> CollectionSyncEngine<D> {
    /// Creates an engine with no event sink.
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn RemoteCollectionService<D>>,
        store: Arc<dyn LocalCollectionStore<D>>,
    ) -> Self {
        Self::build(config, remote, store, None)
    }

    /// Creates an engine that reports lifecycle events to `sink`.
    pub fn with_sink(
        config: EngineConfig,
        remote: Arc<dyn RemoteCollectionService<D>>,
        store: Arc<dyn LocalCollectionStore<D>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::build(config, remote, store, Some(sink))
    }

    fn build(
        config: EngineConfig,
        remote: Arc<dyn RemoteCollectionService<D>>,
        store: Arc<dyn LocalCollectionStore<D>>,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Self {
        let listener = Arc::new(ListenerRetryController::new(
            config.retry.clone(),
            sink.clone(),
            config.namespace.clone(),
        ));
        Self {
            config,
            remote,
            store,
            sink,
            listener,
            state: Mutex::new(CollectionState {
                cache: Vec::new(),
                queue: PendingWriteQueue::new(QueueMode::Keyed),
            }),
            snapshot_seq: AtomicU64::new(0),
            snapshot_gate: Arc::new(tokio::sync::Mutex::new(0)),
        }
    }

    /// Loads the persisted snapshot and pending writes into memory.
    /// Best-effort: load failures leave the engine empty.
    pub async fn hydrate(&self) {
        let snapshot = self.store.load_snapshot().await.unwrap_or_else(|e| {
            warn!(namespace = %self.config.namespace, error = %e, "snapshot load failed");
            Vec::new()
        });
        let pending = self.store.load_pending().await.unwrap_or_else(|e| {
            warn!(namespace = %self.config.namespace, error = %e, "pending load failed");
            Vec::new()
        });

        let mut state = self.state.lock();
        state.cache = snapshot;
        state.queue = PendingWriteQueue::from_entries(QueueMode::Keyed, pending);
    }

    /// The listener's current state.
    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    /// Consecutive listener failures since the last success or stop.
    pub fn retry_count(&self) -> u32 {
        self.listener.retry_count()
    }

    /// Queued pending writes, oldest first.
    pub fn pending_writes(&self) -> Vec<syncline_core::PendingWrite> {
        self.state.lock().queue.entries().to_vec()
    }

    /// Starts the hybrid sync: flushes queued writes, bulk-loads the
    /// collection, then applies the incremental change streams. Bulk load
    /// and stream attachment run inside the retry controller, so a failure
    /// anywhere follows the backoff schedule.
    pub async fn start_listening(self: &Arc<Self>) -> EngineResult<()> {
        self.flush_pending().await;
        self.spawn_listener();
        Ok(())
    }

    /// Detaches the streams; with `clear_caches`, also wipes the cache and
    /// queue and their persisted copies.
    pub async fn stop_listening(&self, clear_caches: bool) {
        self.listener.stop();
        self.emit(SyncEvent::ListenerStopped);
        if clear_caches {
            self.clear_caches().await;
        }
    }

    /// Synchronous read of the cached collection; no I/O.
    pub fn collection(&self) -> Vec<D> {
        self.state.lock().cache.clone()
    }

    /// Asynchronous read of the whole collection.
    ///
    /// `CachedOrFetch` serves a non-empty cache without I/O; otherwise one
    /// bulk fetch replaces the cache.
    pub async fn collection_with(self: &Arc<Self>, policy: FetchPolicy) -> EngineResult<Vec<D>> {
        if policy == FetchPolicy::CachedOrFetch {
            let cached = self.collection();
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        let result = self.remote.get_all().await;
        self.restart_if_failed();
        let documents = result?;
        self.replace_cache(documents.clone());
        Ok(documents)
    }

    /// Synchronous lookup within the cache; `None` if absent.
    pub fn document(&self, id: &str) -> Option<D> {
        self.state
            .lock()
            .cache
            .iter()
            .find(|d| d.id() == id)
            .cloned()
    }

    /// Cached-or-fetch single lookup, falling back to a remote fetch only
    /// when the id is not in the cache.
    pub async fn document_fetch(self: &Arc<Self>, id: &str) -> EngineResult<D> {
        if let Some(cached) = self.document(id) {
            return Ok(cached);
        }
        let result = self.remote.get(id).await;
        self.restart_if_failed();
        result
    }

    /// Local filter over the cache; no I/O.
    pub fn documents_where(&self, predicate: impl Fn(&D) -> bool) -> Vec<D> {
        self.state
            .lock()
            .cache
            .iter()
            .filter(|d| predicate(d))
            .cloned()
            .collect()
    }

    /// Fetch-then-filter: one bulk fetch replaces the cache, then the
    /// predicate is applied locally.
    pub async fn fetch_documents_where(
        self: &Arc<Self>,
        predicate: impl Fn(&D) -> bool,
    ) -> EngineResult<Vec<D>> {
        let all = self.collection_with(FetchPolicy::AlwaysFetch).await?;
        Ok(all.into_iter().filter(|d| predicate(d)).collect())
    }

    /// Executes a server-side query. Always remote: arbitrary queries
    /// cannot be answered from a partial local materialization.
    pub async fn query(self: &Arc<Self>, query: &QueryBuilder) -> EngineResult<Vec<D>> {
        let result = self.remote.query(query).await;
        self.restart_if_failed();
        result
    }

    /// Writes a full document; a success clears only that target's queued
    /// entry. Failures re-throw and are never queued.
    pub async fn save_document(self: &Arc<Self>, document: &D) -> EngineResult<()> {
        let id = document.id().to_string();
        self.emit(SyncEvent::WriteStarted {
            kind: WriteKind::Save,
            id: Some(id.clone()),
        });

        let result = self.remote.save(document).await;
        self.restart_if_failed();
        match result {
            Ok(()) => {
                self.clear_queued(&id).await;
                self.emit(SyncEvent::WriteSucceeded {
                    kind: WriteKind::Save,
                    id: Some(id),
                });
                Ok(())
            }
            Err(e) => {
                self.emit(SyncEvent::WriteFailed {
                    kind: WriteKind::Save,
                    id: Some(id),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Applies a partial field update to one document.
    ///
    /// On failure the fields are queued under the document's id (merging
    /// into any live entry for that target) and the error is re-thrown;
    /// the eventual retry happens at the next `start_listening` flush.
    pub async fn update_document(self: &Arc<Self>, id: &str, fields: FieldMap) -> EngineResult<()> {
        self.emit(SyncEvent::WriteStarted {
            kind: WriteKind::Update,
            id: Some(id.to_string()),
        });

        let result = self.remote.patch(id, &fields).await;
        self.restart_if_failed();
        match result {
            Ok(()) => {
                self.clear_queued(id).await;
                self.emit(SyncEvent::WriteSucceeded {
                    kind: WriteKind::Update,
                    id: Some(id.to_string()),
                });
                Ok(())
            }
            Err(e) => {
                self.state.lock().queue.add(Some(id), fields);
                self.persist_queue().await;
                self.emit(SyncEvent::PendingWriteQueued {
                    id: Some(id.to_string()),
                });
                self.emit(SyncEvent::WriteFailed {
                    kind: WriteKind::Update,
                    id: Some(id.to_string()),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Deletes one document.
    ///
    /// On success the document is removed from the cache synchronously,
    /// independent of whether the deletion-stream event has arrived yet.
    pub async fn delete_document(self: &Arc<Self>, id: &str) -> EngineResult<()> {
        self.emit(SyncEvent::WriteStarted {
            kind: WriteKind::Delete,
            id: Some(id.to_string()),
        });

        let result = self.remote.delete(id).await;
        self.restart_if_failed();
        match result {
            Ok(()) => {
                self.apply_delete(id);
                self.clear_queued(id).await;
                self.emit(SyncEvent::WriteSucceeded {
                    kind: WriteKind::Delete,
                    id: Some(id.to_string()),
                });
                Ok(())
            }
            Err(e) => {
                self.emit(SyncEvent::WriteFailed {
                    kind: WriteKind::Delete,
                    id: Some(id.to_string()),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Resends every queued pending write to its target.
    async fn flush_pending(self: &Arc<Self>) {
        let mut flushing = {
            let mut state = self.state.lock();
            if state.queue.is_empty() {
                return;
            }
            std::mem::replace(&mut state.queue, PendingWriteQueue::new(QueueMode::Keyed))
        };

        self.emit(SyncEvent::PendingFlushStarted {
            queued: flushing.len(),
        });

        let remote = Arc::clone(&self.remote);
        let stats = flushing
            .flush(move |target, fields| {
                let remote = Arc::clone(&remote);
                async move {
                    let id = target.ok_or(EngineError::NoBoundTarget)?;
                    remote.patch(&id, &fields).await
                }
            })
            .await;

        self.state.lock().queue.merge_front(flushing.into_entries());
        self.persist_queue().await;
        debug!(
            namespace = %self.config.namespace,
            synced = stats.synced,
            failed = stats.failed,
            "pending write flush finished"
        );
        self.emit(SyncEvent::PendingFlushCompleted {
            synced: stats.synced,
            failed: stats.failed,
        });
    }

    fn spawn_listener(self: &Arc<Self>) {
        self.emit(SyncEvent::ListenerStarted);
        let engine = Arc::clone(self);
        let attach: AttachFn = Arc::new(move |handle| {
            let engine = Arc::clone(&engine);
            Box::pin(async move { engine.run_sync(handle).await })
        });
        self.listener.start(attach);
    }

    /// One hybrid sync session: bulk load, then pump both change streams
    /// until either terminates.
    async fn run_sync(self: Arc<Self>, handle: AttachHandle) -> EngineResult<()> {
        let all = self.remote.get_all().await?;
        if !handle.is_current() {
            return Ok(());
        }
        debug!(
            namespace = %self.config.namespace,
            count = all.len(),
            "bulk load complete"
        );
        self.replace_cache(all);

        let mut streams = self.remote.stream_changes().await?;
        loop {
            tokio::select! {
                upsert = streams.upserts.recv() => match upsert {
                    Some(document) => {
                        if !handle.is_current() {
                            return Ok(());
                        }
                        handle.mark_attached();
                        self.apply_upsert(document);
                    }
                    None => return Err(EngineError::StreamClosed),
                },
                deletion = streams.deletions.recv() => match deletion {
                    Some(id) => {
                        if !handle.is_current() {
                            return Ok(());
                        }
                        handle.mark_attached();
                        self.apply_delete(&id);
                    }
                    None => return Err(EngineError::StreamClosed),
                },
            }
        }
    }

    /// Replaces the cache wholesale and persists the new snapshot.
    fn replace_cache(&self, documents: Vec<D>) {
        self.state.lock().cache = documents;
        self.persist_snapshot();
    }

    /// Replace-if-present/append-if-absent; the cache never holds two
    /// entries with the same id.
    fn apply_upsert(&self, document: D) {
        {
            let mut state = self.state.lock();
            match state.cache.iter_mut().find(|d| d.id() == document.id()) {
                Some(existing) => *existing = document,
                None => state.cache.push(document),
            }
        }
        self.persist_snapshot();
    }

    fn apply_delete(&self, id: &str) {
        {
            let mut state = self.state.lock();
            state.cache.retain(|d| d.id() != id);
        }
        self.persist_snapshot();
    }

    /// Persists the snapshot on a background task. The clone decouples the
    /// write from further cache mutation; the task never touches engine
    /// state. Tasks take the sequence gate before writing, so persists land
    /// in request order and a persist superseded by a newer one (or by a
    /// cache clear) skips its write.
    fn persist_snapshot(&self) {
        let seq = self.snapshot_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = self.state.lock().cache.clone();
        let store = Arc::clone(&self.store);
        let gate = Arc::clone(&self.snapshot_gate);
        let namespace = self.config.namespace.clone();
        tokio::spawn(async move {
            let mut written = gate.lock().await;
            if seq <= *written {
                return;
            }
            *written = seq;
            if let Err(e) = store.save_snapshot(&snapshot).await {
                warn!(namespace = %namespace, error = %e, "snapshot save failed");
            }
        });
    }

    fn restart_if_failed(self: &Arc<Self>) {
        if !self.listener.is_failed() {
            return;
        }
        debug!(namespace = %self.config.namespace, "restarting failed listener");
        self.spawn_listener();
    }

    async fn clear_queued(&self, target: &str) {
        let cleared = self.state.lock().queue.clear(Some(target));
        if cleared {
            self.persist_queue().await;
            self.emit(SyncEvent::PendingWriteCleared {
                id: Some(target.to_string()),
            });
        }
    }

    async fn clear_caches(&self) {
        {
            let mut state = self.state.lock();
            state.cache.clear();
            state.queue.clear_all();
        }
        // Take the sequence gate with a fresh sequence number before
        // clearing the durable copy: any snapshot persist still in flight
        // is outdated by the time the gate is released and skips its write.
        let seq = self.snapshot_seq.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut written = self.snapshot_gate.lock().await;
            *written = seq;
            if let Err(e) = self.store.clear().await {
                warn!(namespace = %self.config.namespace, error = %e, "store clear failed");
            }
        }
        self.emit(SyncEvent::CachesCleared);
    }

    async fn persist_queue(&self) {
        let entries = self.state.lock().queue.entries().to_vec();
        if let Err(e) = self.store.save_pending(&entries).await {
            warn!(namespace = %self.config.namespace, error = %e, "pending save failed");
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(sink) = &self.sink {
            sink.event(&self.config.namespace, &event);
        }
    }
}
