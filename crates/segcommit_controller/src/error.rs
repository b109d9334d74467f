//! Error types for the controller.

use segcommit_protocol::ProtocolError;
use thiserror::Error;

/// Result type for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors that can occur while handling a completion request.
///
/// None of these reach the server as-is: the request handler answers every
/// error with a `FAILED` response.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The segment upload could not be stored.
    #[error("storage error: {0}")]
    Storage(String),

    /// The committed segment could not be handed off to metadata storage.
    #[error("metadata error: {0}")]
    Metadata(String),
}

impl ControllerError {
    /// Returns true if the server sent something the controller cannot accept.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ControllerError::InvalidRequest(_) | ControllerError::Protocol(_)
        )
    }

    /// Returns true if the controller failed on a valid request.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ControllerError::Storage(_) | ControllerError::Metadata(_)
        )
    }
}
