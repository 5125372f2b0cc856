//! Local persistence contracts.

use crate::error::StoreResult;
use async_trait::async_trait;
use syncline_core::{Document, PendingWrite};

/// Persists the state of a single-document engine.
///
/// Implementations may be backed by anything that can hold three small
/// values: the cached document snapshot, the bound document id, and the
/// pending-write queue.
#[async_trait]
pub trait LocalDocumentStore<D: Document>: Send + Sync {
    /// Saves the cached document snapshot; `None` records an absent document.
    async fn save_document(&self, document: Option<&D>) -> StoreResult<()>;

    /// Loads the cached document snapshot.
    async fn load_document(&self) -> StoreResult<Option<D>>;

    /// Saves the bound document id; `None` removes it.
    async fn save_bound_id(&self, id: Option<&str>) -> StoreResult<()>;

    /// Loads the bound document id.
    async fn load_bound_id(&self) -> StoreResult<Option<String>>;

    /// Saves the pending-write queue.
    async fn save_pending(&self, writes: &[PendingWrite]) -> StoreResult<()>;

    /// Loads the pending-write queue.
    async fn load_pending(&self) -> StoreResult<Vec<PendingWrite>>;

    /// Removes everything this store holds.
    async fn clear(&self) -> StoreResult<()>;
}

/// Persists the state of a collection engine.
#[async_trait]
pub trait LocalCollectionStore<D: Document>: Send + Sync {
    /// Saves the collection snapshot wholesale.
    async fn save_snapshot(&self, documents: &[D]) -> StoreResult<()>;

    /// Loads the collection snapshot.
    async fn load_snapshot(&self) -> StoreResult<Vec<D>>;

    /// Saves the pending-write queue.
    async fn save_pending(&self, writes: &[PendingWrite]) -> StoreResult<()>;

    /// Loads the pending-write queue.
    async fn load_pending(&self) -> StoreResult<Vec<PendingWrite>>;

    /// Removes everything this store holds.
    async fn clear(&self) -> StoreResult<()>;
}
