//! JSON-file stores.
//!
//! Each concern persists to its own file under a directory: the cached
//! snapshot, the bound id (document stores only), and the pending-write
//! queue. Writes go through a temporary file followed by a rename so a
//! crash mid-write never leaves a truncated file behind.

use crate::error::StoreResult;
use crate::traits::{LocalCollectionStore, LocalDocumentStore};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use syncline_core::{Document, PendingWrite};
use tokio::fs;

const DOCUMENT_FILE: &str = "document.json";
const BOUND_ID_FILE: &str = "bound_id.json";
const SNAPSHOT_FILE: &str = "snapshot.json";
const PENDING_FILE: &str = "pending.json";

async fn write_json<T: Serialize>(dir: &Path, file: &str, value: &T) -> StoreResult<()> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(file);
    let tmp = dir.join(format!("{file}.tmp"));
    fs::write(&tmp, serde_json::to_vec(value)?).await?;
    fs::rename(&tmp, &path).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(dir: &Path, file: &str) -> StoreResult<Option<T>> {
    let path = dir.join(file);
    match fs::read(&path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_file(dir: &Path, file: &str) -> StoreResult<()> {
    match fs::remove_file(dir.join(file)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// A [`LocalDocumentStore`] persisting to JSON files under a directory.
#[derive(Debug)]
pub struct JsonFileDocumentStore<D> {
    dir: PathBuf,
    _marker: PhantomData<fn() -> D>,
}

impl<D> JsonFileDocumentStore<D> {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<D: Document> LocalDocumentStore<D> for JsonFileDocumentStore<D> {
    async fn save_document(&self, document: Option<&D>) -> StoreResult<()> {
        match document {
            Some(doc) => write_json(&self.dir, DOCUMENT_FILE, doc).await,
            None => remove_file(&self.dir, DOCUMENT_FILE).await,
        }
    }

    async fn load_document(&self) -> StoreResult<Option<D>> {
        read_json(&self.dir, DOCUMENT_FILE).await
    }

    async fn save_bound_id(&self, id: Option<&str>) -> StoreResult<()> {
        match id {
            Some(id) => write_json(&self.dir, BOUND_ID_FILE, &id).await,
            None => remove_file(&self.dir, BOUND_ID_FILE).await,
        }
    }

    async fn load_bound_id(&self) -> StoreResult<Option<String>> {
        read_json(&self.dir, BOUND_ID_FILE).await
    }

    async fn save_pending(&self, writes: &[PendingWrite]) -> StoreResult<()> {
        write_json(&self.dir, PENDING_FILE, &writes).await
    }

    async fn load_pending(&self) -> StoreResult<Vec<PendingWrite>> {
        Ok(read_json(&self.dir, PENDING_FILE).await?.unwrap_or_default())
    }

    async fn clear(&self) -> StoreResult<()> {
        remove_file(&self.dir, DOCUMENT_FILE).await?;
        remove_file(&self.dir, BOUND_ID_FILE).await?;
        remove_file(&self.dir, PENDING_FILE).await
    }
}

/// A [`LocalCollectionStore`] persisting to JSON files under a directory.
#[derive(Debug)]
pub struct JsonFileCollectionStore<D> {
    dir: PathBuf,
    _marker: PhantomData<fn() -> D>,
}

impl<D> JsonFileCollectionStore<D> {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<D: Document> LocalCollectionStore<D> for JsonFileCollectionStore<D> {
    async fn save_snapshot(&self, documents: &[D]) -> StoreResult<()> {
        write_json(&self.dir, SNAPSHOT_FILE, &documents).await
    }

    async fn load_snapshot(&self) -> StoreResult<Vec<D>> {
        Ok(read_json(&self.dir, SNAPSHOT_FILE).await?.unwrap_or_default())
    }

    async fn save_pending(&self, writes: &[PendingWrite]) -> StoreResult<()> {
        write_json(&self.dir, PENDING_FILE, &writes).await
    }

    async fn load_pending(&self) -> StoreResult<Vec<PendingWrite>> {
        Ok(read_json(&self.dir, PENDING_FILE).await?.unwrap_or_default())
    }

    async fn clear(&self) -> StoreResult<()> {
        remove_file(&self.dir, SNAPSHOT_FILE).await?;
        remove_file(&self.dir, PENDING_FILE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use syncline_core::{FieldMap, Value};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Note {
        id: String,
        title: String,
    }

    impl Document for Note {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str, title: &str) -> Note {
        Note {
            id: id.to_string(),
            title: title.to_string(),
        }
    }

    fn single_field(key: &str, value: Value) -> FieldMap {
        [(key.to_string(), value)].into_iter().collect()
    }

    #[tokio::test]
    async fn document_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileDocumentStore::<Note>::new(dir.path());

        assert_eq!(store.load_document().await.unwrap(), None);
        assert_eq!(store.load_bound_id().await.unwrap(), None);
        assert!(store.load_pending().await.unwrap().is_empty());

        store.save_document(Some(&note("n1", "hello"))).await.unwrap();
        store.save_bound_id(Some("n1")).await.unwrap();
        store
            .save_pending(&[PendingWrite::new(
                None,
                single_field("title", Value::from("queued")),
            )])
            .await
            .unwrap();

        assert_eq!(store.load_document().await.unwrap(), Some(note("n1", "hello")));
        assert_eq!(store.load_bound_id().await.unwrap(), Some("n1".to_string()));
        assert_eq!(store.load_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn saving_absent_document_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileDocumentStore::<Note>::new(dir.path());

        store.save_document(Some(&note("n1", "hello"))).await.unwrap();
        store.save_document(None).await.unwrap();

        assert_eq!(store.load_document().await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_removes_all_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileDocumentStore::<Note>::new(dir.path());

        store.save_document(Some(&note("n1", "hello"))).await.unwrap();
        store.save_bound_id(Some("n1")).await.unwrap();
        store.clear().await.unwrap();

        assert_eq!(store.load_document().await.unwrap(), None);
        assert_eq!(store.load_bound_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn collection_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCollectionStore::<Note>::new(dir.path());

        assert!(store.load_snapshot().await.unwrap().is_empty());

        let snapshot = vec![note("a", "one"), note("b", "two")];
        store.save_snapshot(&snapshot).await.unwrap();
        assert_eq!(store.load_snapshot().await.unwrap(), snapshot);

        store
            .save_pending(&[PendingWrite::new(
                Some("a"),
                single_field("title", Value::from("queued")),
            )])
            .await
            .unwrap();
        let pending = store.load_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].target_id.as_deref(), Some("a"));

        store.clear().await.unwrap();
        assert!(store.load_snapshot().await.unwrap().is_empty());
        assert!(store.load_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_on_empty_directory_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCollectionStore::<Note>::new(dir.path().join("never-written"));
        store.clear().await.unwrap();
    }
}
