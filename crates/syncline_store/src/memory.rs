//! In-memory stores for tests and cache-less embedding.

use crate::error::StoreResult;
use crate::traits::{LocalCollectionStore, LocalDocumentStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use syncline_core::{Document, PendingWrite};

/// An in-memory [`LocalDocumentStore`].
#[derive(Debug)]
pub struct MemoryDocumentStore<D> {
    inner: Mutex<DocumentState<D>>,
}

#[derive(Debug)]
struct DocumentState<D> {
    document: Option<D>,
    bound_id: Option<String>,
    pending: Vec<PendingWrite>,
}

impl<D> MemoryDocumentStore<D> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DocumentState {
                document: None,
                bound_id: None,
                pending: Vec::new(),
            }),
        }
    }
}

impl<D> Default for MemoryDocumentStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<D: Document> LocalDocumentStore<D> for MemoryDocumentStore<D> {
    async fn save_document(&self, document: Option<&D>) -> StoreResult<()> {
        self.inner.lock().document = document.cloned();
        Ok(())
    }

    async fn load_document(&self) -> StoreResult<Option<D>> {
        Ok(self.inner.lock().document.clone())
    }

    async fn save_bound_id(&self, id: Option<&str>) -> StoreResult<()> {
        self.inner.lock().bound_id = id.map(str::to_string);
        Ok(())
    }

    async fn load_bound_id(&self) -> StoreResult<Option<String>> {
        Ok(self.inner.lock().bound_id.clone())
    }

    async fn save_pending(&self, writes: &[PendingWrite]) -> StoreResult<()> {
        self.inner.lock().pending = writes.to_vec();
        Ok(())
    }

    async fn load_pending(&self) -> StoreResult<Vec<PendingWrite>> {
        Ok(self.inner.lock().pending.clone())
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.document = None;
        inner.bound_id = None;
        inner.pending.clear();
        Ok(())
    }
}

/// An in-memory [`LocalCollectionStore`].
#[derive(Debug)]
pub struct MemoryCollectionStore<D> {
    inner: Mutex<CollectionState<D>>,
}

#[derive(Debug)]
struct CollectionState<D> {
    snapshot: Vec<D>,
    pending: Vec<PendingWrite>,
}

impl<D> MemoryCollectionStore<D> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CollectionState {
                snapshot: Vec::new(),
                pending: Vec::new(),
            }),
        }
    }
}

impl<D> Default for MemoryCollectionStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<D: Document> LocalCollectionStore<D> for MemoryCollectionStore<D> {
    async fn save_snapshot(&self, documents: &[D]) -> StoreResult<()> {
        self.inner.lock().snapshot = documents.to_vec();
        Ok(())
    }

    async fn load_snapshot(&self) -> StoreResult<Vec<D>> {
        Ok(self.inner.lock().snapshot.clone())
    }

    async fn save_pending(&self, writes: &[PendingWrite]) -> StoreResult<()> {
        self.inner.lock().pending = writes.to_vec();
        Ok(())
    }

    async fn load_pending(&self) -> StoreResult<Vec<PendingWrite>> {
        Ok(self.inner.lock().pending.clone())
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.snapshot.clear();
        inner.pending.clear();
        Ok(())
    }
}
