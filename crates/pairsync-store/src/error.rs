//! Error types for the document store

use crate::operations::{DisabledReason, OperationName};
use pairsync_transport::TransportError;
use thiserror::Error;

/// Store error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Core error: {0}")]
    Core(#[from] pairsync_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Operation {operation} is disabled: {reason}")]
    OperationDisabled {
        operation: OperationName,
        reason: DisabledReason,
    },

    #[error("Mutation targets {found}, expected {expected}")]
    WrongDocument { expected: String, found: String },

    #[error("Document pair {0} was terminated")]
    PairTerminated(String),

    #[error("Revision {rev} of {id} not found")]
    RevisionNotFound { id: String, rev: String },

    #[error("Operation task failed: {0}")]
    TaskFailed(String),

    #[error("Document store closed")]
    Closed,
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
