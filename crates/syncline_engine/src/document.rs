//! Synchronization engine for a single remote document.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::listener::{AttachFn, AttachHandle, ListenerRetryController, ListenerState};
use crate::pending::{PendingWriteQueue, QueueMode};
use crate::remote::RemoteDocumentService;
use parking_lot::Mutex;
use std::sync::Arc;
use syncline_core::{Document, EventSink, FieldMap, SyncEvent, WriteKind};
use syncline_store::LocalDocumentStore;
use tracing::{debug, warn};

/// Read policy for asynchronous reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Return the cache if non-empty, else perform a remote fetch.
    CachedOrFetch,
    /// Perform a remote fetch unconditionally.
    AlwaysFetch,
}

struct DocumentState<D> {
    bound_id: Option<String>,
    cached: Option<D>,
    queue: PendingWriteQueue,
}

/// Owns one remote document's lifecycle: attach/detach listener, cached and
/// remote reads, writes with pending-write fallback.
///
/// All cache and queue mutation is serialized behind one lock; remote I/O
/// happens outside it. The engine is used through an [`Arc`] so listener
/// sessions can hold it across suspends.
pub struct DocumentSyncEngine<D: Document> {
    config: EngineConfig,
    remote: Arc<dyn RemoteDocumentService<D>>,
    store: Arc<dyn LocalDocumentStore<D>>,
    sink: Option<Arc<dyn EventSink>>,
    listener: Arc<ListenerRetryController>,
    state: Mutex<DocumentState<D>>,
}

impl<D: Document> DocumentSyncEngine<D> {
    /// Creates an engine with no event sink.
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn RemoteDocumentService<D>>,
        store: Arc<dyn LocalDocumentStore<D>>,
    ) -> Self {
        Self::build(config, remote, store, None)
    }

    /// Creates an engine that reports lifecycle events to `sink`.
    pub fn with_sink(
        config: EngineConfig,
        remote: Arc<dyn RemoteDocumentService<D>>,
        store: Arc<dyn LocalDocumentStore<D>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::build(config, remote, store, Some(sink))
    }

    fn build(
        config: EngineConfig,
        remote: Arc<dyn RemoteDocumentService<D>>,
        store: Arc<dyn LocalDocumentStore<D>>,
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
            state: Mutex::new(DocumentState {
                bound_id: None,
                cached: None,
                queue: PendingWriteQueue::new(QueueMode::Single),
            }),
        }
    }

    /// Loads persisted state (bound id, cached document, pending writes)
    /// into memory. Best-effort: load failures leave the engine empty.
    pub async fn hydrate(&self) {
        let bound_id = self.store.load_bound_id().await.unwrap_or_else(|e| {
            warn!(namespace = %self.config.namespace, error = %e, "bound id load failed");
            None
        });
        let cached = self.store.load_document().await.unwrap_or_else(|e| {
            warn!(namespace = %self.config.namespace, error = %e, "document load failed");
            None
        });
        let pending = self.store.load_pending().await.unwrap_or_else(|e| {
            warn!(namespace = %self.config.namespace, error = %e, "pending load failed");
            Vec::new()
        });

        let mut state = self.state.lock();
        state.bound_id = bound_id;
        state.cached = cached;
        state.queue = PendingWriteQueue::from_entries(QueueMode::Single, pending);
    }

    /// The listener's current state.
    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    /// Consecutive listener failures since the last success or stop.
    pub fn retry_count(&self) -> u32 {
        self.listener.retry_count()
    }

    /// The currently bound document id.
    pub fn bound_id(&self) -> Option<String> {
        self.state.lock().bound_id.clone()
    }

    /// Queued pending writes, oldest first.
    pub fn pending_writes(&self) -> Vec<syncline_core::PendingWrite> {
        self.state.lock().queue.entries().to_vec()
    }

    /// Binds `id` and starts listening to its change stream.
    ///
    /// Binding a different id than the current one first fully detaches and
    /// clears all state for the old id (logout semantics). Rebinding the
    /// same id keeps the cache intact and only restarts the listener. Any
    /// queued pending write for the bound id is flushed before the stream
    /// is attached.
    pub async fn start_listening(self: &Arc<Self>, id: &str) -> EngineResult<()> {
        let rebinding = {
            let state = self.state.lock();
            state.bound_id.as_deref().is_some_and(|bound| bound != id)
        };
        if rebinding {
            debug!(namespace = %self.config.namespace, id, "rebinding, clearing previous state");
            self.listener.stop();
            self.clear_caches().await;
        }

        self.state.lock().bound_id = Some(id.to_string());
        if let Err(e) = self.store.save_bound_id(Some(id)).await {
            warn!(namespace = %self.config.namespace, error = %e, "bound id save failed");
        }

        self.flush_pending().await;
        self.spawn_listener(id.to_string());
        Ok(())
    }

    /// Detaches the stream.
    ///
    /// With `clear_caches` set, also wipes the in-memory cache, bound id,
    /// and pending-write queue along with their persisted copies. Without
    /// it, all cached state stays available for offline reads.
    pub async fn stop_listening(&self, clear_caches: bool) {
        self.listener.stop();
        self.emit(SyncEvent::ListenerStopped);
        if clear_caches {
            self.clear_caches().await;
        }
    }

    /// Synchronous read of the cache; no I/O.
    pub fn document(&self) -> Option<D> {
        self.state.lock().cached.clone()
    }

    /// Synchronous read of the cache, failing when it is empty.
    pub fn document_or_fail(&self) -> EngineResult<D> {
        let state = self.state.lock();
        state.cached.clone().ok_or_else(|| {
            EngineError::not_found(state.bound_id.clone().unwrap_or_default())
        })
    }

    /// Asynchronous read against the bound document.
    ///
    /// `CachedOrFetch` serves a non-empty cache without I/O; otherwise the
    /// document is fetched from the remote source and cached.
    pub async fn document_with(self: &Arc<Self>, policy: FetchPolicy) -> EngineResult<D> {
        if policy == FetchPolicy::CachedOrFetch {
            if let Some(cached) = self.document() {
                return Ok(cached);
            }
        }

        let id = self.bound_id().ok_or(EngineError::NoBoundTarget)?;
        let result = self.remote.get(&id).await;
        self.restart_if_failed();
        let document = result?;

        {
            let mut state = self.state.lock();
            // Only cache while still bound to the same id.
            if state.bound_id.as_deref() == Some(id.as_str()) {
                state.cached = Some(document.clone());
            }
        }
        if let Err(e) = self.store.save_document(Some(&document)).await {
            warn!(namespace = %self.config.namespace, error = %e, "document save failed");
        }
        Ok(document)
    }

    /// One-shot fetch of an explicit id, independent of the bound listener.
    /// The result is not cached.
    pub async fn fetch_document(&self, id: &str) -> EngineResult<D> {
        self.remote.get(id).await
    }

    /// Writes the full document to the remote source.
    ///
    /// A successful save supersedes partial queued patches, so the queued
    /// entry is cleared. On failure the error is re-thrown and nothing is
    /// queued: full-document saves are never auto-retried.
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
                self.clear_queued(None).await;
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

    /// Applies a partial field update to the bound document.
    ///
    /// On failure the fields are queued as a pending write (merged into any
    /// live entry) and the error is re-thrown; the queued entry is resent
    /// at the next `start_listening` or cleared by a later successful
    /// save/update.
    pub async fn update_document(self: &Arc<Self>, fields: FieldMap) -> EngineResult<()> {
        let id = self.bound_id().ok_or(EngineError::NoBoundTarget)?;
        self.update_document_with_id(&id, fields).await
    }

    /// Applies a partial field update to an explicit id.
    pub async fn update_document_with_id(
        self: &Arc<Self>,
        id: &str,
        fields: FieldMap,
    ) -> EngineResult<()> {
        self.emit(SyncEvent::WriteStarted {
            kind: WriteKind::Update,
            id: Some(id.to_string()),
        });

        let result = self.remote.patch(id, &fields).await;
        self.restart_if_failed();
        match result {
            Ok(()) => {
                self.clear_queued(None).await;
                self.emit(SyncEvent::WriteSucceeded {
                    kind: WriteKind::Update,
                    id: Some(id.to_string()),
                });
                Ok(())
            }
            Err(e) => {
                self.state.lock().queue.add(None, fields);
                self.persist_queue().await;
                self.emit(SyncEvent::PendingWriteQueued { id: None });
                self.emit(SyncEvent::WriteFailed {
                    kind: WriteKind::Update,
                    id: Some(id.to_string()),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Deletes the bound document.
    pub async fn delete_document(self: &Arc<Self>) -> EngineResult<()> {
        let id = self.bound_id().ok_or(EngineError::NoBoundTarget)?;
        self.delete_document_with_id(&id).await
    }

    /// Deletes an explicit id.
    ///
    /// On success the in-memory cache is cleared synchronously rather than
    /// waiting for the stream to report the deletion; this closes the
    /// stale-read window between delete-success and the next stream event.
    pub async fn delete_document_with_id(self: &Arc<Self>, id: &str) -> EngineResult<()> {
        self.emit(SyncEvent::WriteStarted {
            kind: WriteKind::Delete,
            id: Some(id.to_string()),
        });

        let result = self.remote.delete(id).await;
        self.restart_if_failed();
        match result {
            Ok(()) => {
                self.state.lock().cached = None;
                if let Err(e) = self.store.save_document(None).await {
                    warn!(namespace = %self.config.namespace, error = %e, "document save failed");
                }
                self.clear_queued(None).await;
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

    /// Resends any queued pending write for the bound id.
    async fn flush_pending(self: &Arc<Self>) {
        let id = match self.bound_id() {
            Some(id) => id,
            None => return,
        };

        let mut flushing = {
            let mut state = self.state.lock();
            if state.queue.is_empty() {
                return;
            }
            std::mem::replace(&mut state.queue, PendingWriteQueue::new(QueueMode::Single))
        };

        self.emit(SyncEvent::PendingFlushStarted {
            queued: flushing.len(),
        });

        let remote = Arc::clone(&self.remote);
        let stats = flushing
            .flush(move |_target, fields| {
                let remote = Arc::clone(&remote);
                let id = id.clone();
                async move { remote.patch(&id, &fields).await }
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

    fn spawn_listener(self: &Arc<Self>, id: String) {
        self.emit(SyncEvent::ListenerStarted);
        let engine = Arc::clone(self);
        let attach: AttachFn = Arc::new(move |handle| {
            let engine = Arc::clone(&engine);
            let id = id.clone();
            Box::pin(async move { engine.run_stream(id, handle).await })
        });
        self.listener.start(attach);
    }

    async fn run_stream(self: Arc<Self>, id: String, handle: AttachHandle) -> EngineResult<()> {
        let mut stream = self.remote.stream(&id).await?;
        while let Some(update) = stream.recv().await {
            if !handle.is_current() {
                return Ok(());
            }
            handle.mark_attached();
            self.apply_update(update).await;
        }
        Err(EngineError::StreamClosed)
    }

    async fn apply_update(&self, update: Option<D>) {
        self.state.lock().cached = update.clone();
        if let Err(e) = self.store.save_document(update.as_ref()).await {
            warn!(namespace = %self.config.namespace, error = %e, "document save failed");
        }
    }

    /// Restarts the listener when it sits in a failed state, so recovery
    /// does not require another explicit `start_listening` call.
    fn restart_if_failed(self: &Arc<Self>) {
        if !self.listener.is_failed() {
            return;
        }
        if let Some(id) = self.bound_id() {
            debug!(namespace = %self.config.namespace, id, "restarting failed listener");
            self.spawn_listener(id);
        }
    }

    async fn clear_queued(&self, target: Option<&str>) {
        let cleared = self.state.lock().queue.clear(target);
        if cleared {
            self.persist_queue().await;
            self.emit(SyncEvent::PendingWriteCleared {
                id: target.map(str::to_string),
            });
        }
    }

    async fn clear_caches(&self) {
        {
            let mut state = self.state.lock();
            state.bound_id = None;
            state.cached = None;
            state.queue.clear_all();
        }
        if let Err(e) = self.store.clear().await {
            warn!(namespace = %self.config.namespace, error = %e, "store clear failed");
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
