//! # SegCommit Protocol
//!
//! Segment completion protocol types and JSON codecs.
//!
//! This crate provides:
//! - `ControllerResponseStatus`, the closed set of controller decisions
//! - `Response` and its `ResponseParams` accumulator
//! - `CompletionRequest` (intent + parameters) and its URL encoding
//! - `LlcSegmentName` for `table__partition__sequence__time` names
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Commit flow
//!
//! ```text
//! server                               controller
//!   | -- segmentConsumed(offset) ------> |  first proposer wins
//!   | <------------- COMMIT(split, vip) |
//!   |  build segment                     |
//!   | -- segmentCommitStart ----> vip    |
//!   | <----------- COMMIT_CONTINUE       |
//!   | -- segmentUpload(bytes) ---> vip   |
//!   | <----- UPLOAD_SUCCESS(location)    |
//!   | -- segmentCommitEnd(location) -> vip
//!   | <------------ COMMIT_SUCCESS       |
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod request;
mod response;
mod segment_name;
mod status;

pub use error::{ProtocolError, ProtocolResult};
pub use request::{CompletionRequest, RequestKind, RequestParams};
pub use response::{Response, ResponseParams};
pub use segment_name::LlcSegmentName;
pub use status::ControllerResponseStatus;
