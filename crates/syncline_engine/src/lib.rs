//! # Syncline Engine
//!
//! Client-side synchronization engines that keep a local, observable copy
//! of remote data consistent with a remote source of truth while tolerating
//! network failure, reconnect storms, and offline writes.
//!
//! This crate provides:
//! - [`DocumentSyncEngine`]: one remote document (listen, read, write)
//! - [`CollectionSyncEngine`]: a bounded document set with hybrid sync
//!   (bulk load, then incremental upsert/deletion streams)
//! - [`ListenerRetryController`]: the shared reconnect state machine with
//!   a fixed exponential backoff schedule
//! - [`PendingWriteQueue`]: ordered, keyed buffering of failed partial
//!   updates, merged per target and flushed on reconnect
//! - Remote collaborator contracts ([`RemoteDocumentService`],
//!   [`RemoteCollectionService`])
//!
//! ## Key invariants
//!
//! - At most one pending write exists per target at any time
//! - Backoff delays follow the fixed schedule 2, 4, 8, 16, 32, 60, 60, …
//!   seconds; a success resets the schedule, an explicit stop resets the
//!   retry count
//! - A collection cache never contains two documents with the same id
//! - Flushing never loses a queued entry: synced + failed == queued
//!
//! ## Concurrency model
//!
//! Each engine serializes its cache and queue behind one lock; remote I/O
//! happens outside the lock and results are applied afterwards. Collection
//! snapshot persistence is offloaded to a background task so serializing a
//! large collection never blocks listener processing. Listener and backoff
//! tasks are owned by the retry controller and cancelled on stop.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod document;
mod error;
mod listener;
mod pending;
mod remote;

pub use collection::CollectionSyncEngine;
pub use config::{EngineConfig, RetryConfig};
pub use document::{DocumentSyncEngine, FetchPolicy};
pub use error::{EngineError, EngineResult};
pub use listener::{AttachFn, AttachHandle, ListenerRetryController, ListenerState};
pub use pending::{FlushStats, PendingWriteQueue, QueueMode};
pub use remote::{ChangeStreams, DocumentStream, RemoteCollectionService, RemoteDocumentService};
