//! Concurrent proposal stress runs.
//!
//! Many replicas propose end offsets for the same segments at once; the
//! controller must hand out exactly one COMMIT per segment no matter how the
//! threads interleave.

use segcommit_controller::SegmentCompletionManager;
use segcommit_protocol::{ControllerResponseStatus, RequestParams};
use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a proposal stress run.
#[derive(Debug, Clone)]
pub struct ProposalStressResult {
    /// COMMIT decisions handed out, keyed by segment name.
    pub commits: HashMap<String, usize>,
    /// Responses received, keyed by status.
    pub statuses: HashMap<ControllerResponseStatus, usize>,
    /// Requests the manager rejected with an error.
    pub errors: usize,
    /// Total duration.
    pub duration: Duration,
}

impl ProposalStressResult {
    /// Total number of proposals sent.
    pub fn total_proposals(&self) -> usize {
        self.statuses.values().sum::<usize>() + self.errors
    }

    /// Number of responses with `status`.
    pub fn count(&self, status: ControllerResponseStatus) -> usize {
        self.statuses.get(&status).copied().unwrap_or(0)
    }

    /// Whether every segment received exactly one COMMIT.
    pub fn single_committer_per_segment(&self, segments: usize) -> bool {
        self.commits.len() == segments && self.commits.values().all(|&n| n == 1)
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Proposals: {}", self.total_proposals());
        for status in ControllerResponseStatus::ALL {
            let n = self.count(status);
            if n > 0 {
                println!("{}: {}", status, n);
            }
        }
        println!("Errors: {}", self.errors);
        println!("Segments committed: {}", self.commits.len());
        println!("Duration: {:?}", self.duration);
    }
}

/// Configuration for proposal stress runs.
#[derive(Debug, Clone)]
pub struct ProposalStressConfig {
    /// Replicas proposing for every segment.
    pub proposers: usize,
    /// Number of distinct segments.
    pub segments: usize,
    /// Lowest proposed offset.
    pub base_offset: u64,
    /// Proposed offsets fall in `base_offset..base_offset + offset_spread`.
    pub offset_spread: u64,
}

impl Default for ProposalStressConfig {
    fn default() -> Self {
        Self {
            proposers: 8,
            segments: 16,
            base_offset: 1_000,
            offset_spread: 4,
        }
    }
}

impl ProposalStressConfig {
    /// Offset proposed by `proposer` for segment number `segment`.
    pub fn offset_for(&self, proposer: usize, segment: usize) -> u64 {
        let spread = self.offset_spread.max(1);
        self.base_offset + ((proposer * 7919 + segment * 31) as u64 % spread)
    }
}

/// Name of segment number `segment` in a stress run.
pub fn stress_segment_name(segment: usize) -> String {
    format!("stress__{}__0__20240101T0000Z", segment)
}

/// Runs one thread per proposer; each sends a `segmentConsumed` for every
/// segment, all released together by a barrier.
pub fn run_concurrent_proposals(
    manager: &Arc<SegmentCompletionManager>,
    config: &ProposalStressConfig,
) -> ProposalStressResult {
    let barrier = Arc::new(Barrier::new(config.proposers));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.proposers)
        .map(|proposer| {
            let manager = Arc::clone(manager);
            let barrier = Arc::clone(&barrier);
            let config = config.clone();
            thread::spawn(move || {
                let instance = format!("server-{}", proposer);
                barrier.wait();
                (0..config.segments)
                    .map(|segment| {
                        let params = RequestParams::new(
                            instance.as_str(),
                            stress_segment_name(segment),
                            config.offset_for(proposer, segment),
                        );
                        (segment, manager.segment_consumed(&params).map(|r| r.status()))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut commits = HashMap::new();
    let mut statuses = HashMap::new();
    let mut errors = 0usize;

    for handle in handles {
        let replies = handle.join().expect("proposer thread panicked");
        for (segment, reply) in replies {
            match reply {
                Ok(status) => {
                    *statuses.entry(status).or_insert(0) += 1;
                    if status == ControllerResponseStatus::Commit {
                        *commits.entry(stress_segment_name(segment)).or_insert(0) += 1;
                    }
                }
                Err(_) => errors += 1,
            }
        }
    }

    ProposalStressResult {
        commits,
        statuses,
        errors,
        duration: start.elapsed(),
    }
}
