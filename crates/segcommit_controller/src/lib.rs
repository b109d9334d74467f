//! # SegCommit Controller
//!
//! The controller side of segment completion.
//!
//! This crate provides:
//! - Per-segment commit arbitration (`SegmentCompletionManager`)
//! - Request dispatch and raw POST handling (`CompletionController`)
//! - Seams for leadership, upload storage and metadata hand-off
//!
//! # Arbitration
//!
//! Every replica of a partition reports when it reaches the end of a
//! segment. The first proposal admitted for a segment wins; the winner is
//! told to `COMMIT`, everyone else is told to `HOLD`, `CATCH_UP` or
//! `DISCARD` relative to the winning offset. Once the segment is committed,
//! late replicas at the committed offset `KEEP` their copy and the rest
//! `DISCARD` it.
//!
//! A winner that stops responding loses its claim after
//! `ControllerConfig::max_commit_time`, and the next proposer is admitted.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod controller;
mod error;
mod handler;
mod leadership;
mod manager;
mod metadata;
mod negotiation;
mod upload;

pub use config::ControllerConfig;
pub use controller::{CompletionController, ControllerStats};
pub use error::{ControllerError, ControllerResult};
pub use handler::RequestHandler;
pub use leadership::{AlwaysLeader, LeadershipCheck, StaticLeadership};
pub use manager::SegmentCompletionManager;
pub use metadata::{CommitSink, CommittedSegment, MemoryCommitSink};
pub use negotiation::Phase;
pub use upload::{MemoryUploadStore, SegmentUploadStore};
