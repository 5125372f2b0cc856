//! The application document contract.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A synchronizable application document.
///
/// The engines only require value semantics, a unique string identifier,
/// and a serde representation for the wire and persisted forms. Engines
/// always hold copies; the application owns the type.
pub trait Document: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// The unique identifier of this document.
    fn id(&self) -> &str;
}
