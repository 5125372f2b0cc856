//! # Syncline Testkit
//!
//! Test utilities for the Syncline engines: scriptable in-memory remote
//! services (toggle them offline, drive their change streams by hand), a
//! recording event sink, and a small concrete document type.
//!
//! Everything here is deterministic; no timers, no real I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod remote;
mod sink;

pub use document::TestDocument;
pub use remote::{InMemoryCollectionService, InMemoryDocumentService};
pub use sink::RecordingSink;

/// Installs a `tracing` subscriber printing to the test output. Safe to
/// call from several tests; only the first call wins.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
