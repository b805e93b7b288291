//! Protocol error types

use thiserror::Error;

/// Protocol-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Unexpected first event on listener: {0}")]
    UnexpectedFirstEvent(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Listener channel error: {0}")]
    ChannelError(String),

    #[error("Core error: {0}")]
    Core(#[from] pairsync_core::Error),
}

impl ProtocolError {
    /// Errors after which the listener cannot be used safely
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnexpectedFirstEvent(_) | ProtocolError::ChannelError(_)
        )
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
