//! # Syncline Store
//!
//! Local persistence for the Syncline engines: a snapshot of the cached
//! remote data plus the pending-write queue, so both survive process
//! restart.
//!
//! Persistence is an optimization, not a correctness requirement; engines
//! treat every store failure as best-effort and carry on. The contracts are
//! therefore small:
//!
//! - [`LocalDocumentStore`]: one document, its bound id, and its queue
//! - [`LocalCollectionStore`]: a collection snapshot and its queue
//!
//! Two implementations ship with the crate: in-memory stores for tests and
//! cache-less embedding, and JSON-file stores persisting one file per
//! concern under a directory.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod traits;

pub use error::{StoreError, StoreResult};
pub use file::{JsonFileCollectionStore, JsonFileDocumentStore};
pub use memory::{MemoryCollectionStore, MemoryDocumentStore};
pub use traits::{LocalCollectionStore, LocalDocumentStore};
