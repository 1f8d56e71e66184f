//! Error types for the 2d geo index.
//!
//! Every fallible operation in the crate returns [`Result`]. Configuration
//! and query-shape problems are reported before any index access happens;
//! consistency problems caused by concurrent writes are repaired internally
//! and never surface here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeoError {
    /// The index key pattern cannot describe a 2d index.
    #[error("Invalid index spec: {0}")]
    InvalidIndexSpec(String),

    /// Index options (`bits`, `min`, `max`) are out of range.
    #[error("Invalid index options: {0}")]
    InvalidOptions(String),

    /// A query shape argument is malformed.
    #[error("Bad query: {0}")]
    BadQuery(String),

    /// A coordinate lies outside the valid domain.
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// A document being indexed carries a malformed location or no `_id`.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The operation was cancelled by its interrupt signal.
    #[error("Operation interrupted")]
    Interrupted,

    /// The storage collaborator reported a failure.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GeoError>;

impl GeoError {
    /// Whether this error comes from user input rather than the engine.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            GeoError::BadQuery(_) | GeoError::OutOfBounds(_) | GeoError::InvalidDocument(_)
        )
    }
}
