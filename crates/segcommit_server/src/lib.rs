//! # SegCommit Server
//!
//! The ingestion-server side of segment completion.
//!
//! This crate provides:
//! - `CommitCoordinator`, which drives one segment through the protocol
//! - Retry with exponential backoff and jitter
//! - Transport abstraction (`CompletionTransport`) with an HTTP transport,
//!   an in-process loopback client and a scripted mock
//! - Segment building and local storage seams
//!
//! ## Reacting to decisions
//!
//! | Status | Reaction |
//! |--------|----------|
//! | `COMMIT` | build, then commit (single step or split via the VIP URL) |
//! | `CATCH_UP` | consume to the given offset and propose again |
//! | `HOLD`, `NOT_LEADER`, `FAILED`, `NOT_SENT` | back off and propose again |
//! | `KEEP` | keep the local segment |
//! | `DISCARD` | drop the local segment |
//!
//! A `PROCESSED` reply to any commit call means an earlier attempt already
//! committed; it is treated as success and never leads to a second commit.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod coordinator;
mod error;
mod http;
mod segment;
mod transport;

pub use config::{CompletionConfig, RetryConfig};
pub use coordinator::{CommitCoordinator, CompletionOutcome, CoordinatorState, CoordinatorStats};
pub use error::{ServerError, ServerResult};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use segment::{
    LocalSegmentStore, SegmentArtifact, SegmentBuilder, SegmentStore, SyntheticSegmentBuilder,
};
pub use transport::{CompletionTransport, MockTransport};
