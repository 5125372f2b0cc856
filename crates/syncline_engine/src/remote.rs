//! Remote collaborator contracts.
//!
//! These traits abstract the remote source of truth, allowing different
//! backends (document database, REST service, mock for testing). Concrete
//! transport is out of scope; the engines only need get/write/stream
//! semantics. Conflicting concurrent writes from multiple clients are the
//! backend's problem (last-write-wins).

use crate::error::EngineResult;
use async_trait::async_trait;
use syncline_core::{Document, FieldMap, QueryBuilder};
use tokio::sync::mpsc;

/// A change stream for one remote document.
///
/// Each received value is the document's new state; `None` signals that the
/// document was removed. Channel closure is stream termination and triggers
/// the reconnect schedule.
pub type DocumentStream<D> = mpsc::Receiver<Option<D>>;

/// The incremental change streams of a remote collection.
///
/// The two streams are each internally ordered but carry no ordering
/// relative to each other; per-key upsert/delete application is idempotent,
/// so the last event applied wins.
pub struct ChangeStreams<D> {
    /// New or changed documents.
    pub upserts: mpsc::Receiver<D>,
    /// Ids of removed documents.
    pub deletions: mpsc::Receiver<String>,
}

/// Remote access to a single document.
#[async_trait]
pub trait RemoteDocumentService<D: Document>: Send + Sync {
    /// Fetches the current state of the document.
    async fn get(&self, id: &str) -> EngineResult<D>;

    /// Writes the full document.
    async fn save(&self, document: &D) -> EngineResult<()>;

    /// Applies a partial field update.
    async fn patch(&self, id: &str, fields: &FieldMap) -> EngineResult<()>;

    /// Deletes the document.
    async fn delete(&self, id: &str) -> EngineResult<()>;

    /// Opens a change stream for the document.
    async fn stream(&self, id: &str) -> EngineResult<DocumentStream<D>>;
}

/// Remote access to a bounded collection of documents.
#[async_trait]
pub trait RemoteCollectionService<D: Document>: Send + Sync {
    /// Fetches the entire collection.
    async fn get_all(&self) -> EngineResult<Vec<D>>;

    /// Fetches one document by id.
    async fn get(&self, id: &str) -> EngineResult<D>;

    /// Writes a full document.
    async fn save(&self, document: &D) -> EngineResult<()>;

    /// Applies a partial field update to one document.
    async fn patch(&self, id: &str, fields: &FieldMap) -> EngineResult<()>;

    /// Deletes one document.
    async fn delete(&self, id: &str) -> EngineResult<()>;

    /// Opens the collection's incremental change streams.
    async fn stream_changes(&self) -> EngineResult<ChangeStreams<D>>;

    /// Executes a server-side query.
    async fn query(&self, query: &QueryBuilder) -> EngineResult<Vec<D>>;
}
