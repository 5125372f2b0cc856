//! Error types for the sync engines.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur during engine operations.
///
/// Remote errors pass through to the caller unchanged; local persistence
/// failures never surface here (the cache is an optimization, engines log
/// and carry on).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No cached document for the given id.
    #[error("no document found for id {id:?}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// A write was attempted on a document engine with no bound id.
    #[error("no document id bound to this engine")]
    NoBoundTarget,

    /// The remote source is unreachable (network failure, outage).
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The remote source has no document for the given id.
    #[error("remote has no document for id {id:?}")]
    RemoteNotFound {
        /// The id that was requested.
        id: String,
    },

    /// The remote source rejected the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Opaque remote failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// The change stream ended without an explicit stop.
    #[error("change stream terminated")]
    StreamClosed,
}

impl EngineError {
    /// Creates an [`EngineError::Unavailable`].
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Creates an [`EngineError::RemoteNotFound`].
    pub fn remote_not_found(id: impl Into<String>) -> Self {
        Self::RemoteNotFound { id: id.into() }
    }

    /// Creates an [`EngineError::NotFound`].
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Returns true for failures of the connection rather than the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::StreamClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_classification() {
        assert!(EngineError::unavailable("connection refused").is_unavailable());
        assert!(EngineError::StreamClosed.is_unavailable());
        assert!(!EngineError::NoBoundTarget.is_unavailable());
        assert!(!EngineError::remote_not_found("u1").is_unavailable());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            EngineError::not_found("u1").to_string(),
            "no document found for id \"u1\""
        );
        assert_eq!(
            EngineError::NoBoundTarget.to_string(),
            "no document id bound to this engine"
        );
    }
}
