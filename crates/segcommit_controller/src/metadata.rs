//! Hand-off of committed segments to metadata storage.

use crate::error::{ControllerError, ControllerResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// A segment the controller has agreed to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedSegment {
    /// Segment name.
    pub segment_name: String,
    /// Offset the segment ends at.
    pub offset: u64,
    /// Where the segment is stored.
    pub location: String,
    /// The server that built it.
    pub instance_id: String,
}

/// Receives "segment X committed at offset Y, location Z".
///
/// Called outside any segment lock. An error leaves the negotiation in the
/// phase it was in before the commit call, so the server can retry.
pub trait CommitSink: Send + Sync {
    /// Records a committed segment.
    fn commit_segment(&self, segment: &CommittedSegment) -> ControllerResult<()>;
}

/// Records committed segments in memory.
#[derive(Debug, Default)]
pub struct MemoryCommitSink {
    committed: RwLock<Vec<CommittedSegment>>,
    fail_commits: AtomicBool,
}

impl MemoryCommitSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every commit recorded so far, in order.
    pub fn committed(&self) -> Vec<CommittedSegment> {
        self.committed.read().clone()
    }

    /// Returns how many times `segment_name` was committed.
    pub fn commit_count(&self, segment_name: &str) -> usize {
        self.committed
            .read()
            .iter()
            .filter(|c| c.segment_name == segment_name)
            .count()
    }

    /// Makes subsequent commits fail (for testing).
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl CommitSink for MemoryCommitSink {
    fn commit_segment(&self, segment: &CommittedSegment) -> ControllerResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(ControllerError::Metadata(format!(
                "could not record {}",
                segment.segment_name
            )));
        }
        self.committed.write().push(segment.clone());
        Ok(())
    }
}
