//! # Syncline Core
//!
//! Shared value model and contracts for the Syncline client-side
//! synchronization engines.
//!
//! This crate provides:
//! - Dynamic field values for patch payloads ([`Value`], [`FieldMap`])
//! - The application document contract ([`Document`])
//! - Locally queued mutations awaiting resend ([`PendingWrite`])
//! - A declarative remote query builder ([`QueryBuilder`])
//! - Structured lifecycle events ([`SyncEvent`], [`EventSink`])
//!
//! None of these types perform I/O; the engines in `syncline_engine` wire
//! them to remote services and local stores.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod event;
mod pending;
mod query;
mod value;

pub use document::Document;
pub use event::{EventSink, SyncEvent, WriteKind};
pub use pending::PendingWrite;
pub use query::{FilterOp, QueryBuilder, QueryCursor, QueryFilter, QueryOperation, QueryOrder};
pub use value::{merge_fields, FieldMap, Value};
