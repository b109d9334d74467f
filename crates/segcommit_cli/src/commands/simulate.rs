//! Simulate command implementation.
//!
//! Spins up an in-process controller and one coordinator per replica, runs
//! every replica's completion concurrently on the blocking pool of a tokio
//! runtime and reports who committed what.

use super::{CliError, Format};
use segcommit_controller::{CompletionController, ControllerConfig, MemoryCommitSink};
use segcommit_server::{
    CommitCoordinator, CompletionConfig, CompletionOutcome, HttpTransport, LocalSegmentStore,
    LoopbackClient, LoopbackServer, RetryConfig, SyntheticSegmentBuilder,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const CONTROLLER_URL: &str = "http://controller.local:9000";

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Number of replicas.
    pub replicas: usize,
    /// Segment to complete.
    pub segment: String,
    /// Offset proposed by the first replica.
    pub offset: u64,
    /// Replica `i` proposes `offset + i % spread`.
    pub spread: u64,
    /// Use the split commit flow.
    pub split_commit: bool,
}

/// What one replica ended up doing.
#[derive(Debug, Serialize)]
pub struct ReplicaReport {
    /// Instance id.
    pub instance: String,
    /// Offset the replica stopped consuming at.
    pub proposed_offset: u64,
    /// COMMITTED, KEPT, DISCARDED or ERROR.
    pub outcome: String,
    /// Final offset of the local segment, when known.
    pub final_offset: Option<u64>,
    /// Location of the committed segment, for the committer.
    pub location: Option<String>,
    /// Error message, when the replica failed.
    pub error: Option<String>,
    /// Requests sent to the controller.
    pub requests_sent: u64,
    /// HOLD responses received.
    pub holds: u64,
    /// CATCH_UP rounds performed.
    pub catch_ups: u64,
}

/// Outcome of a whole simulation.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Segment name.
    pub segment: String,
    /// Per-replica reports, in instance order.
    pub replicas: Vec<ReplicaReport>,
    /// Number of metadata commits the controller performed.
    pub commits: usize,
    /// Responses sent by the controller, by status.
    pub responses: BTreeMap<String, u64>,
    /// Wall-clock duration.
    pub duration: Duration,
}

/// Routes loopback requests to the in-process controller.
#[derive(Clone)]
struct InProcessController(Arc<CompletionController>);

impl LoopbackServer for InProcessController {
    fn handle_post(&self, path_and_query: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        Ok(self.0.handle_post(path_and_query, body))
    }
}

type SimTransport = HttpTransport<LoopbackClient<InProcessController>>;

/// Runs the simulate command.
pub fn run(options: &SimulateOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let format = Format::parse(format)?;
    let report = simulate(options)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_text(&report),
    }

    Ok(())
}

/// Runs the replicas and collects their reports.
pub fn simulate(options: &SimulateOptions) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    if options.replicas == 0 {
        return Err(CliError::InvalidSimulation("at least one replica is required").into());
    }
    if options.spread == 0 {
        return Err(CliError::InvalidSimulation("spread must be at least 1").into());
    }
    // Reject bad names up front instead of letting every replica fail.
    options.segment.parse::<segcommit_protocol::LlcSegmentName>()?;

    let sink = Arc::new(MemoryCommitSink::new());
    let controller = Arc::new(CompletionController::new(
        ControllerConfig::new(CONTROLLER_URL).with_split_commit(options.split_commit),
        sink.clone(),
    ));
    let transport: Arc<SimTransport> = Arc::new(HttpTransport::new(LoopbackClient::new(
        InProcessController(Arc::clone(&controller)),
    )));
    let scratch = tempfile::TempDir::new()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let start = Instant::now();
    let replicas = runtime.block_on(async {
        let mut handles = Vec::with_capacity(options.replicas);
        for i in 0..options.replicas {
            let instance = format!("server-{}", i + 1);
            let proposed = options
                .offset
                .checked_add(i as u64 % options.spread)
                .ok_or(CliError::InvalidSimulation("offset out of range"))?;
            let store = Arc::new(LocalSegmentStore::open(scratch.path().join(&instance))?);
            let coordinator = CommitCoordinator::new(
                CompletionConfig::new(instance.as_str(), CONTROLLER_URL).with_retry(
                    RetryConfig::new(200)
                        .with_initial_delay(Duration::from_millis(5))
                        .with_max_delay(Duration::from_millis(100)),
                ),
                options.segment.as_str(),
                Arc::clone(&transport),
                Arc::new(SyntheticSegmentBuilder::new()),
                store,
            );

            handles.push(tokio::task::spawn_blocking(move || {
                let result = coordinator.complete(proposed);
                report_for(instance, proposed, result, coordinator.stats())
            }));
        }

        let mut replicas = Vec::with_capacity(handles.len());
        for handle in handles {
            replicas.push(handle.await?);
        }
        Ok::<_, Box<dyn std::error::Error>>(replicas)
    })?;

    let stats = controller.stats();
    let report = SimulationReport {
        segment: options.segment.clone(),
        replicas,
        commits: sink.commit_count(&options.segment),
        responses: stats
            .responses
            .iter()
            .map(|(status, count)| (status.to_string(), *count))
            .collect(),
        duration: start.elapsed(),
    };

    info!(
        segment = %report.segment,
        replicas = report.replicas.len(),
        commits = report.commits,
        "simulation finished"
    );
    Ok(report)
}

fn report_for(
    instance: String,
    proposed_offset: u64,
    result: segcommit_server::ServerResult<CompletionOutcome>,
    stats: segcommit_server::CoordinatorStats,
) -> ReplicaReport {
    let (outcome, final_offset, location, error) = match result {
        Ok(CompletionOutcome::Committed { offset, location }) => {
            ("COMMITTED", Some(offset), Some(location), None)
        }
        Ok(CompletionOutcome::Kept { offset }) => ("KEPT", Some(offset), None, None),
        Ok(CompletionOutcome::Discarded { offset }) => ("DISCARDED", offset, None, None),
        Err(e) => ("ERROR", None, None, Some(e.to_string())),
    };

    ReplicaReport {
        instance,
        proposed_offset,
        outcome: outcome.to_string(),
        final_offset,
        location,
        error,
        requests_sent: stats.requests_sent,
        holds: stats.holds,
        catch_ups: stats.catch_ups,
    }
}

fn print_text(report: &SimulationReport) {
    println!("Segment: {}", report.segment);
    println!();
    println!(
        "{:<12} {:>10} {:<10} {:>10} {:>8} {:>6} {:>9}",
        "Instance", "Proposed", "Outcome", "Final", "Requests", "Holds", "CatchUps"
    );
    for replica in &report.replicas {
        println!(
            "{:<12} {:>10} {:<10} {:>10} {:>8} {:>6} {:>9}",
            replica.instance,
            replica.proposed_offset,
            replica.outcome,
            replica
                .final_offset
                .map(|o| o.to_string())
                .unwrap_or_else(|| "-".to_string()),
            replica.requests_sent,
            replica.holds,
            replica.catch_ups,
        );
        if let Some(ref location) = replica.location {
            println!("  committed at {}", location);
        }
        if let Some(ref error) = replica.error {
            println!("  error: {}", error);
        }
    }
    println!();
    println!("Metadata commits: {}", report.commits);
    for (status, count) in &report.responses {
        println!("  {:<16} {}", status, count);
    }
    println!("Duration: {:?}", report.duration);
}
