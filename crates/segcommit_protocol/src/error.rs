//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Status string is not part of the protocol.
    #[error("unknown response status: {0}")]
    UnknownStatus(String),

    /// Request path does not name a protocol request.
    #[error("unknown request path: {0}")]
    UnknownRequest(String),

    /// Segment name does not follow the `table__partition__sequence__time` form.
    #[error("invalid segment name {name:?}: {reason}")]
    InvalidSegmentName {
        /// The offending name.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A required request parameter is missing.
    #[error("missing request parameter: {0}")]
    MissingParam(&'static str),

    /// A request parameter could not be parsed.
    #[error("invalid request parameter {name}: {value:?}")]
    InvalidParam {
        /// Parameter name.
        name: String,
        /// Raw value.
        value: String,
    },
}

impl ProtocolError {
    pub(crate) fn invalid_param(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidParam {
            name: name.into(),
            value: value.into(),
        }
    }
}
