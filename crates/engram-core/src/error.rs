//! Error taxonomy
//!
//! All public operations surface one of the kinds below. Leaf modules carry
//! their own small error enums and convert into `EngramError` at the facade
//! boundary, so callers match on surface kinds rather than internal types.

/// Top-level error for all engine operations
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngramError {
    /// Dimension out of range, empty id or text, malformed query
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Collection, document, or trajectory does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What kind of entity was looked up ("collection", "document", ...)
        kind: &'static str,
        /// The offending identifier
        id: String,
    },

    /// Duplicate id, collection already exists, incompatible migration
    #[error("conflict: {0}")]
    Conflict(String),

    /// The embedding backend could not produce a vector
    #[error("embedding backend unavailable: {0}")]
    EmbeddingBackendUnavailable(String),

    /// Disk or database failure in either store
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// Graph traversal exhausted its node budget
    #[error("traversal budget exceeded: visited {visited} of at most {budget} nodes")]
    TraversalBudgetExceeded {
        /// Nodes visited before giving up
        visited: usize,
        /// The configured ceiling
        budget: usize,
    },

    /// Deadline expired before the commit phase
    #[error("operation timed out before commit")]
    Timeout,

    /// Cancellation observed before the commit phase
    #[error("operation cancelled before commit")]
    Cancelled,

    /// On-disk manifest written by a newer engine
    #[error("unsupported manifest version {found} (engine supports up to {supported})")]
    UnsupportedVersion {
        /// Version found on disk
        found: u32,
        /// Highest version this engine understands
        supported: u32,
    },

    /// Irrecoverable read error on both stores
    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),
}

impl EngramError {
    /// Shorthand for a `NotFound` error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngramError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand for an `InvalidInput` error
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngramError::InvalidInput(msg.into())
    }

    /// True if retrying the operation could succeed (backend trouble, not caller error)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngramError::EmbeddingBackendUnavailable(_) | EngramError::StorageFailure(_)
        )
    }
}

impl From<rusqlite::Error> for EngramError {
    fn from(e: rusqlite::Error) -> Self {
        EngramError::StorageFailure(format!("database error: {e}"))
    }
}

impl From<std::io::Error> for EngramError {
    fn from(e: std::io::Error) -> Self {
        EngramError::StorageFailure(format!("io error: {e}"))
    }
}

impl From<serde_json::Error> for EngramError {
    fn from(e: serde_json::Error) -> Self {
        EngramError::StorageFailure(format!("serialization error: {e}"))
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, EngramError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_the_entity() {
        let err = EngramError::not_found("collection", "kb");
        assert_eq!(err.to_string(), "collection not found: kb");
    }

    #[test]
    fn test_transient_classification() {
        assert!(EngramError::StorageFailure("disk full".into()).is_transient());
        assert!(!EngramError::invalid("empty text").is_transient());
        assert!(!EngramError::Timeout.is_transient());
    }
}
