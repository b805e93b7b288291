//! Error types for pairsync Core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid document ID: {0}")]
    InvalidDocumentId(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Document is missing an _id")]
    MissingId,

    #[error("Revision mismatch on {id}: expected {expected}, found {found}")]
    RevisionMismatch {
        id: String,
        expected: String,
        found: String,
    },

    #[error("Document {0} already exists")]
    DocumentExists(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias for pairsync Core operations
pub type Result<T> = std::result::Result<T, Error>;
