//! Scriptable in-memory remote services.
//!
//! Both services hold a document table behind a lock and hand out change
//! streams backed by bounded channels. Tests drive them directly: toggle
//! them offline, mutate the table as if another client wrote, or drop all
//! streams to simulate a severed connection.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use syncline_core::{FieldMap, QueryBuilder};
use syncline_engine::{
    ChangeStreams, DocumentStream, EngineError, EngineResult, RemoteCollectionService,
    RemoteDocumentService,
};
use tokio::sync::mpsc;

const STREAM_CAPACITY: usize = 64;

use crate::document::TestDocument;

fn offline_error() -> EngineError {
    EngineError::unavailable("simulated outage")
}

/// An in-memory [`RemoteDocumentService`].
#[derive(Debug, Default)]
pub struct InMemoryDocumentService {
    inner: Mutex<DocumentServiceState>,
}

#[derive(Debug, Default)]
struct DocumentServiceState {
    documents: BTreeMap<String, TestDocument>,
    streams: Vec<(String, mpsc::Sender<Option<TestDocument>>)>,
    offline: bool,
    fail_next_patch: bool,
    patches: Vec<(String, FieldMap)>,
    stream_opens: u32,
    get_calls: u32,
}

impl InMemoryDocumentService {
    /// Creates an empty, online service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles the simulated outage. While offline every call fails with
    /// [`EngineError::Unavailable`] and no streams can be opened.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Arms a one-shot failure: the next patch call is rejected, later
    /// ones proceed normally.
    pub fn fail_next_patch(&self) {
        self.inner.lock().fail_next_patch = true;
    }

    /// Seeds a document without notifying streams.
    pub fn insert(&self, document: TestDocument) {
        self.inner
            .lock()
            .documents
            .insert(document.id.clone(), document);
    }

    /// Writes a document as if another client saved it, notifying streams.
    pub fn upsert_remote(&self, document: TestDocument) {
        let mut state = self.inner.lock();
        let id = document.id.clone();
        state.documents.insert(id.clone(), document.clone());
        notify_document_streams(&mut state.streams, &id, Some(document));
    }

    /// Removes a document as if another client deleted it, notifying
    /// streams with an absent value.
    pub fn remove_remote(&self, id: &str) {
        let mut state = self.inner.lock();
        state.documents.remove(id);
        notify_document_streams(&mut state.streams, id, None);
    }

    /// Severs every open stream; listeners observe termination.
    pub fn drop_streams(&self) {
        self.inner.lock().streams.clear();
    }

    /// Every patch the service accepted, in arrival order.
    pub fn recorded_patches(&self) -> Vec<(String, FieldMap)> {
        self.inner.lock().patches.clone()
    }

    /// Number of streams opened over the service's lifetime.
    pub fn stream_opens(&self) -> u32 {
        self.inner.lock().stream_opens
    }

    /// Number of single-document fetches served.
    pub fn get_calls(&self) -> u32 {
        self.inner.lock().get_calls
    }

    /// Current server-side state of a document.
    pub fn stored(&self, id: &str) -> Option<TestDocument> {
        self.inner.lock().documents.get(id).cloned()
    }
}

fn notify_document_streams(
    streams: &mut Vec<(String, mpsc::Sender<Option<TestDocument>>)>,
    id: &str,
    update: Option<TestDocument>,
) {
    streams.retain(|(stream_id, sender)| {
        if stream_id != id {
            return !sender.is_closed();
        }
        sender.try_send(update.clone()).is_ok()
    });
}

#[async_trait::async_trait]
impl RemoteDocumentService<TestDocument> for InMemoryDocumentService {
    async fn get(&self, id: &str) -> EngineResult<TestDocument> {
        let mut state = self.inner.lock();
        if state.offline {
            return Err(offline_error());
        }
        state.get_calls += 1;
        state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::remote_not_found(id))
    }

    async fn save(&self, document: &TestDocument) -> EngineResult<()> {
        let mut state = self.inner.lock();
        if state.offline {
            return Err(offline_error());
        }
        state
            .documents
            .insert(document.id.clone(), document.clone());
        notify_document_streams(&mut state.streams, &document.id, Some(document.clone()));
        Ok(())
    }

    async fn patch(&self, id: &str, fields: &FieldMap) -> EngineResult<()> {
        let mut state = self.inner.lock();
        if state.offline {
            return Err(offline_error());
        }
        if state.fail_next_patch {
            state.fail_next_patch = false;
            return Err(EngineError::Remote("injected patch failure".to_string()));
        }
        let mut document = state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::remote_not_found(id))?;
        document.apply_fields(fields);
        state.documents.insert(id.to_string(), document.clone());
        state.patches.push((id.to_string(), fields.clone()));
        notify_document_streams(&mut state.streams, id, Some(document));
        Ok(())
    }

    async fn delete(&self, id: &str) -> EngineResult<()> {
        let mut state = self.inner.lock();
        if state.offline {
            return Err(offline_error());
        }
        state.documents.remove(id);
        notify_document_streams(&mut state.streams, id, None);
        Ok(())
    }

    async fn stream(&self, id: &str) -> EngineResult<DocumentStream<TestDocument>> {
        let mut state = self.inner.lock();
        if state.offline {
            return Err(offline_error());
        }
        state.stream_opens += 1;
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        // Streams deliver the current state as their first event.
        let _ = tx.try_send(state.documents.get(id).cloned());
        state.streams.push((id.to_string(), tx));
        Ok(rx)
    }
}

/// An in-memory [`RemoteCollectionService`].
#[derive(Debug, Default)]
pub struct InMemoryCollectionService {
    inner: Mutex<CollectionServiceState>,
}

#[derive(Debug, Default)]
struct CollectionServiceState {
    documents: BTreeMap<String, TestDocument>,
    upsert_streams: Vec<mpsc::Sender<TestDocument>>,
    deletion_streams: Vec<mpsc::Sender<String>>,
    offline: bool,
    fail_next_patch: bool,
    patches: Vec<(String, FieldMap)>,
    queries: Vec<QueryBuilder>,
    query_result: Option<Vec<TestDocument>>,
    get_all_calls: u32,
}

impl InMemoryCollectionService {
    /// Creates an empty, online service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles the simulated outage.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Arms a one-shot failure: the next patch call is rejected, later
    /// ones proceed normally.
    pub fn fail_next_patch(&self) {
        self.inner.lock().fail_next_patch = true;
    }

    /// Seeds a document without notifying streams.
    pub fn insert(&self, document: TestDocument) {
        self.inner
            .lock()
            .documents
            .insert(document.id.clone(), document);
    }

    /// Writes a document as if another client saved it, notifying the
    /// upserts stream.
    pub fn upsert_remote(&self, document: TestDocument) {
        let mut state = self.inner.lock();
        state
            .documents
            .insert(document.id.clone(), document.clone());
        state
            .upsert_streams
            .retain(|sender| sender.try_send(document.clone()).is_ok());
    }

    /// Removes a document as if another client deleted it, notifying the
    /// deletions stream.
    pub fn remove_remote(&self, id: &str) {
        let mut state = self.inner.lock();
        state.documents.remove(id);
        state
            .deletion_streams
            .retain(|sender| sender.try_send(id.to_string()).is_ok());
    }

    /// Severs every open stream; listeners observe termination.
    pub fn drop_streams(&self) {
        let mut state = self.inner.lock();
        state.upsert_streams.clear();
        state.deletion_streams.clear();
    }

    /// Scripts the result of the next `query` calls; without a script the
    /// whole table is returned.
    pub fn set_query_result(&self, documents: Vec<TestDocument>) {
        self.inner.lock().query_result = Some(documents);
    }

    /// Every query received, in arrival order.
    pub fn recorded_queries(&self) -> Vec<QueryBuilder> {
        self.inner.lock().queries.clone()
    }

    /// Every patch the service accepted, in arrival order.
    pub fn recorded_patches(&self) -> Vec<(String, FieldMap)> {
        self.inner.lock().patches.clone()
    }

    /// Number of bulk loads served.
    pub fn get_all_calls(&self) -> u32 {
        self.inner.lock().get_all_calls
    }

    /// Current server-side state of a document.
    pub fn stored(&self, id: &str) -> Option<TestDocument> {
        self.inner.lock().documents.get(id).cloned()
    }
}

#[async_trait::async_trait]
impl RemoteCollectionService<TestDocument> for InMemoryCollectionService {
    async fn get_all(&self) -> EngineResult<Vec<TestDocument>> {
        let mut state = self.inner.lock();
        if state.offline {
            return Err(offline_error());
        }
        state.get_all_calls += 1;
        Ok(state.documents.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> EngineResult<TestDocument> {
        let state = self.inner.lock();
        if state.offline {
            return Err(offline_error());
        }
        state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::remote_not_found(id))
    }

    async fn save(&self, document: &TestDocument) -> EngineResult<()> {
        let mut state = self.inner.lock();
        if state.offline {
            return Err(offline_error());
        }
        state
            .documents
            .insert(document.id.clone(), document.clone());
        let update = document.clone();
        state
            .upsert_streams
            .retain(|sender| sender.try_send(update.clone()).is_ok());
        Ok(())
    }

    async fn patch(&self, id: &str, fields: &FieldMap) -> EngineResult<()> {
        let mut state = self.inner.lock();
        if state.offline {
            return Err(offline_error());
        }
        if state.fail_next_patch {
            state.fail_next_patch = false;
            return Err(EngineError::Remote("injected patch failure".to_string()));
        }
        let mut document = state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::remote_not_found(id))?;
        document.apply_fields(fields);
        state.documents.insert(id.to_string(), document.clone());
        state.patches.push((id.to_string(), fields.clone()));
        state
            .upsert_streams
            .retain(|sender| sender.try_send(document.clone()).is_ok());
        Ok(())
    }

    async fn delete(&self, id: &str) -> EngineResult<()> {
        let mut state = self.inner.lock();
        if state.offline {
            return Err(offline_error());
        }
        state.documents.remove(id);
        state
            .deletion_streams
            .retain(|sender| sender.try_send(id.to_string()).is_ok());
        Ok(())
    }

    async fn stream_changes(&self) -> EngineResult<ChangeStreams<TestDocument>> {
        let mut state = self.inner.lock();
        if state.offline {
            return Err(offline_error());
        }
        let (upsert_tx, upserts) = mpsc::channel(STREAM_CAPACITY);
        let (deletion_tx, deletions) = mpsc::channel(STREAM_CAPACITY);
        state.upsert_streams.push(upsert_tx);
        state.deletion_streams.push(deletion_tx);
        Ok(ChangeStreams { upserts, deletions })
    }

    async fn query(&self, query: &QueryBuilder) -> EngineResult<Vec<TestDocument>> {
        let mut state = self.inner.lock();
        if state.offline {
            return Err(offline_error());
        }
        state.queries.push(query.clone());
        Ok(state
            .query_result
            .clone()
            .unwrap_or_else(|| state.documents.values().cloned().collect()))
    }
}
