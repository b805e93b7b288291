//! Transport error types

use pairsync_protocol::ProtocolError;
use thiserror::Error;

/// Errors reported by a server transport
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Mutation rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Transport closed")]
    Closed,

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        TransportError::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Whether the same request may succeed if sent again
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Unavailable(_) => true,
            TransportError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the server refused the request itself; resending it fails again
    pub fn is_rejection(&self) -> bool {
        matches!(self, TransportError::Rejected { status, .. } if (400..500).contains(status))
    }

    /// Whether a listener stream that produced this error must be torn down
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Protocol(e) => e.is_fatal(),
            TransportError::Closed | TransportError::Unavailable(_) => true,
            _ => false,
        }
    }
}

impl From<pairsync_core::Error> for TransportError {
    fn from(e: pairsync_core::Error) -> Self {
        TransportError::Codec(e.to_string())
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(TransportError::Unavailable("down".into()).is_retryable());
        assert!(TransportError::rejected(503, "busy").is_retryable());
        assert!(!TransportError::rejected(409, "conflict").is_retryable());
        assert!(!TransportError::Closed.is_retryable());
    }

    #[test]
    fn test_rejection() {
        assert!(TransportError::rejected(409, "conflict").is_rejection());
        assert!(TransportError::rejected(400, "bad").is_rejection());
        assert!(!TransportError::rejected(500, "oops").is_rejection());
        assert!(!TransportError::Unavailable("down".into()).is_rejection());
    }

    #[test]
    fn test_fatal() {
        let protocol = TransportError::from(ProtocolError::UnexpectedFirstEvent("mutation".into()));
        assert!(protocol.is_fatal());
        assert!(!TransportError::from(ProtocolError::UnknownEventType("x".into())).is_fatal());
        assert!(TransportError::Closed.is_fatal());
    }
}
