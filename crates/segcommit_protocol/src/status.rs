//! Controller response statuses.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The decision a controller returns for one server request.
///
/// Each status tells the server what to do next; the commit of a segment is
/// a chain of request/response round trips driven by these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerResponseStatus {
    /// The request never reached a controller (local marker).
    NotSent,
    /// The server may finalize the segment at the given offset.
    Commit,
    /// Another negotiation is in progress; wait and retry.
    Hold,
    /// The server lags the authoritative offset and must consume up to it.
    #[serde(alias = "CATCHUP")]
    CatchUp,
    /// The server must abandon its locally built segment.
    Discard,
    /// The server's local segment matches the committed one; keep it.
    Keep,
    /// The contacted controller is not authoritative for this segment.
    NotLeader,
    /// The request was invalid or could not be processed.
    Failed,
    /// The segment commit was handed off successfully.
    CommitSuccess,
    /// Split commit accepted; build, upload and finish the commit.
    CommitContinue,
    /// The request was already handled (idempotent acknowledgment).
    Processed,
    /// The uploaded segment was stored at the returned location.
    UploadSuccess,
}

impl ControllerResponseStatus {
    /// All statuses, in protocol order.
    pub const ALL: [ControllerResponseStatus; 12] = [
        ControllerResponseStatus::NotSent,
        ControllerResponseStatus::Commit,
        ControllerResponseStatus::Hold,
        ControllerResponseStatus::CatchUp,
        ControllerResponseStatus::Discard,
        ControllerResponseStatus::Keep,
        ControllerResponseStatus::NotLeader,
        ControllerResponseStatus::Failed,
        ControllerResponseStatus::CommitSuccess,
        ControllerResponseStatus::CommitContinue,
        ControllerResponseStatus::Processed,
        ControllerResponseStatus::UploadSuccess,
    ];

    /// Returns the wire string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerResponseStatus::NotSent => "NOT_SENT",
            ControllerResponseStatus::Commit => "COMMIT",
            ControllerResponseStatus::Hold => "HOLD",
            ControllerResponseStatus::CatchUp => "CATCH_UP",
            ControllerResponseStatus::Discard => "DISCARD",
            ControllerResponseStatus::Keep => "KEEP",
            ControllerResponseStatus::NotLeader => "NOT_LEADER",
            ControllerResponseStatus::Failed => "FAILED",
            ControllerResponseStatus::CommitSuccess => "COMMIT_SUCCESS",
            ControllerResponseStatus::CommitContinue => "COMMIT_CONTINUE",
            ControllerResponseStatus::Processed => "PROCESSED",
            ControllerResponseStatus::UploadSuccess => "UPLOAD_SUCCESS",
        }
    }

    /// Returns true if the server should back off and resend the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControllerResponseStatus::Hold
                | ControllerResponseStatus::NotLeader
                | ControllerResponseStatus::Failed
                | ControllerResponseStatus::NotSent
        )
    }
}

impl fmt::Display for ControllerResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerResponseStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "CATCHUP" {
            return Ok(ControllerResponseStatus::CatchUp);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownStatus(s.to_string()))
    }
}
