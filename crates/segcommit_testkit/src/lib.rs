//! # SegCommit Testkit
//!
//! Test utilities for segment completion.
//!
//! This crate provides:
//! - An in-process cluster fixture (controller + loopback transport + local store)
//! - Property-based test generators using proptest
//! - Concurrent proposal stress runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segcommit_testkit::prelude::*;
//!
//! #[test]
//! fn commits_once() {
//!     let cluster = TestCluster::new(ControllerConfig::default());
//!     let outcome = cluster.coordinator("server-1", "events__0__0__t").complete(10).unwrap();
//!     assert!(matches!(outcome, CompletionOutcome::Committed { .. }));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use segcommit_controller::ControllerConfig;
    pub use segcommit_server::CompletionOutcome;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
