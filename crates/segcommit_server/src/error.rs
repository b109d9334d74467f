//! Error types for the commit coordinator.

use segcommit_protocol::{ControllerResponseStatus, ProtocolError, RequestKind};
use thiserror::Error;

/// Result type for coordinator operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while completing a segment.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the request can be retried.
        retryable: bool,
    },

    /// A request or response could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Building the segment failed.
    #[error("segment build failed: {0}")]
    Build(String),

    /// Storing or removing a local segment failed.
    #[error("segment storage error: {0}")]
    Storage(String),

    /// The controller kept answering with a retryable status.
    #[error("gave up after {attempts} attempts, last status {last_status}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The last status received.
        last_status: ControllerResponseStatus,
    },

    /// The controller kept asking the server to catch up.
    #[error("still behind after {0} catch-up rounds")]
    CatchUpLimit(u32),

    /// The controller answered with a status that makes no sense here.
    #[error("unexpected {status} in reply to {request}")]
    UnexpectedStatus {
        /// The request that was sent.
        request: RequestKind,
        /// The status received.
        status: ControllerResponseStatus,
    },

    /// Completion was cancelled.
    #[error("segment completion cancelled")]
    Cancelled,
}

impl ServerError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the failed request can be sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServerError::Transport { retryable: true, .. })
    }
}

impl From<ProtocolError> for ServerError {
    fn from(e: ProtocolError) -> Self {
        ServerError::Protocol(e.to_string())
    }
}
