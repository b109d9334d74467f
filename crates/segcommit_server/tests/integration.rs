//! Integration tests: coordinators talking to a real controller over the
//! loopback HTTP client.

use parking_lot::Mutex;
use segcommit_controller::{
    CompletionController, ControllerConfig, LeadershipCheck, MemoryCommitSink, MemoryUploadStore,
    SegmentCompletionManager, StaticLeadership,
};
use segcommit_protocol::{ControllerResponseStatus, RequestKind, RequestParams};
use segcommit_server::{
    CommitCoordinator, CompletionConfig, CompletionOutcome, HttpClient, HttpTransport,
    LocalSegmentStore, LoopbackClient, SyntheticSegmentBuilder,
};
use segcommit_testkit::{fast_retry_config, ControllerEndpoint};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const SEGMENT: &str = "events__3__12__20240101T0000Z";
const CONTROLLER: &str = "http://controller-a:9000";
const VIP: &str = "http://controller-vip:9000";

/// Loopback client that records URLs and can drop requests.
struct RecordingClient {
    inner: LoopbackClient<ControllerEndpoint>,
    urls: Mutex<Vec<String>>,
    drop_next: AtomicU32,
}

impl RecordingClient {
    fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

impl HttpClient for RecordingClient {
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, String> {
        self.urls.lock().push(url.to_string());
        let dropped = self
            .drop_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            return Err("connection reset by peer".into());
        }
        self.inner.post(url, body, timeout)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

type Coordinator = CommitCoordinator<HttpTransport<RecordingClient>, SyntheticSegmentBuilder>;

struct Cluster {
    controller: Arc<CompletionController>,
    sink: Arc<MemoryCommitSink>,
    uploads: Arc<MemoryUploadStore>,
    transport: Arc<HttpTransport<RecordingClient>>,
    store: Arc<LocalSegmentStore>,
    _dir: TempDir,
}

impl Cluster {
    fn new(config: ControllerConfig) -> Self {
        Self::with_leadership(config, None)
    }

    fn with_leadership(config: ControllerConfig, leadership: Option<Arc<dyn LeadershipCheck>>) -> Self {
        let sink = Arc::new(MemoryCommitSink::new());
        let uploads = Arc::new(MemoryUploadStore::new());
        let mut manager =
            SegmentCompletionManager::new(config, sink.clone()).with_upload_store(uploads.clone());
        if let Some(leadership) = leadership {
            manager = manager.with_leadership(leadership);
        }
        let controller = Arc::new(CompletionController::with_manager(Arc::new(manager)));

        let client = RecordingClient {
            inner: LoopbackClient::new(ControllerEndpoint(Arc::clone(&controller))),
            urls: Mutex::new(Vec::new()),
            drop_next: AtomicU32::new(0),
        };
        let dir = TempDir::new().unwrap();

        Self {
            controller,
            sink,
            uploads,
            transport: Arc::new(HttpTransport::new(client).with_timeout(Duration::from_secs(1))),
            store: Arc::new(LocalSegmentStore::open(dir.path()).unwrap()),
            _dir: dir,
        }
    }

    fn coordinator(&self, instance: &str) -> Coordinator {
        self.coordinator_with(instance, Arc::new(SyntheticSegmentBuilder::new()))
    }

    fn coordinator_with(&self, instance: &str, builder: Arc<SyntheticSegmentBuilder>) -> Coordinator {
        let config = CompletionConfig {
            controller_url: CONTROLLER.to_string(),
            ..fast_retry_config(instance)
        };
        CommitCoordinator::new(
            config,
            SEGMENT,
            Arc::clone(&self.transport),
            builder,
            self.store.clone(),
        )
    }
}

#[test]
fn split_commit_through_vip() {
    let cluster = Cluster::new(ControllerConfig::new(VIP));
    let coordinator = cluster.coordinator("server-1");

    let outcome = coordinator.complete(1_000).unwrap();
    let (offset, location) = match outcome {
        CompletionOutcome::Committed { offset, location } => (offset, location),
        other => panic!("expected a commit, got {other:?}"),
    };
    assert_eq!(offset, 1_000);
    assert!(location.starts_with(&format!("{SEGMENT}.tmp.")));

    // The uploaded bytes are what got committed.
    assert!(cluster.uploads.get(&location).is_some());
    let committed = cluster.sink.committed();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].location, location);
    assert_eq!(committed[0].instance_id, "server-1");

    let urls = cluster.transport.client().urls();
    assert_eq!(urls.len(), 4);
    assert!(urls[0].starts_with(CONTROLLER));
    assert!(urls[1..].iter().all(|u| u.starts_with(VIP)));
}

#[test]
fn single_step_commit_to_assigned_location() {
    let cluster = Cluster::new(
        ControllerConfig::new(VIP)
            .with_split_commit(false)
            .with_segment_location_prefix("s3://bucket/events"),
    );
    let coordinator = cluster.coordinator("server-1");

    let outcome = coordinator.complete(500).unwrap();
    let expected = format!("s3://bucket/events/{SEGMENT}");
    assert_eq!(
        outcome,
        CompletionOutcome::Committed {
            offset: 500,
            location: expected.clone()
        }
    );
    assert!(cluster.store.local_path(&expected).exists());
    assert_eq!(cluster.sink.committed()[0].location, expected);
    assert!(cluster.uploads.is_empty());
}

#[test]
fn replicas_at_same_offset_commit_once() {
    let cluster = Cluster::new(ControllerConfig::new(VIP));
    let replicas: Vec<_> = (0..4)
        .map(|i| {
            let builder = SyntheticSegmentBuilder::new().with_build_delay(Duration::from_millis(20));
            cluster.coordinator_with(&format!("server-{i}"), Arc::new(builder))
        })
        .collect();

    let outcomes: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = replicas
            .iter()
            .map(|c| s.spawn(move || c.complete(777).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let committed = outcomes
        .iter()
        .filter(|o| matches!(o, CompletionOutcome::Committed { .. }))
        .count();
    let kept = outcomes
        .iter()
        .filter(|o| matches!(o, CompletionOutcome::Kept { offset: 777 }))
        .count();
    assert_eq!(committed, 1);
    assert_eq!(kept, 3);
    assert_eq!(cluster.sink.commit_count(SEGMENT), 1);
}

#[test]
fn lagging_replica_catches_up_and_keeps() {
    let cluster = Cluster::new(ControllerConfig::new(VIP).with_split_commit(false));
    let winner = RequestParams::new("server-a", SEGMENT, 100);

    let commit = cluster.controller.manager().segment_consumed(&winner).unwrap();
    assert_eq!(commit.status(), ControllerResponseStatus::Commit);

    let builder = Arc::new(SyntheticSegmentBuilder::new());
    let lagging = cluster.coordinator_with("server-b", Arc::clone(&builder));

    let outcome = thread::scope(|s| {
        let handle = s.spawn(|| lagging.complete(90).unwrap());
        thread::sleep(Duration::from_millis(30));
        let done = cluster
            .controller
            .manager()
            .segment_commit(&winner.clone().with_segment_location("s3://bucket/a"))
            .unwrap();
        assert_eq!(done.status(), ControllerResponseStatus::CommitSuccess);
        handle.join().unwrap()
    });

    assert_eq!(outcome, CompletionOutcome::Kept { offset: 100 });
    assert_eq!(builder.consumed(SEGMENT), Some(100));
    let stats = lagging.stats();
    assert_eq!(stats.catch_ups, 1);
    assert!(stats.holds >= 1);
}

#[test]
fn replica_ahead_of_committed_offset_discards() {
    let cluster = Cluster::new(ControllerConfig::new(VIP));
    cluster.coordinator("server-a").complete(100).unwrap();

    let outcome = cluster.coordinator("server-b").complete(120).unwrap();
    assert_eq!(outcome, CompletionOutcome::Discarded { offset: Some(100) });
}

#[test]
fn silent_winner_loses_to_next_proposer() {
    let cluster = Cluster::new(
        ControllerConfig::new(VIP).with_max_commit_time(Duration::from_millis(50)),
    );
    let silent = RequestParams::new("server-a", SEGMENT, 100);
    cluster.controller.manager().segment_consumed(&silent).unwrap();

    let outcome = cluster.coordinator("server-b").complete(100).unwrap();
    assert!(matches!(outcome, CompletionOutcome::Committed { offset: 100, .. }));
    assert_eq!(cluster.sink.committed()[0].instance_id, "server-b");

    // The old winner coming back finds the segment committed by someone else.
    let late = cluster
        .controller
        .manager()
        .segment_commit_start(&silent)
        .unwrap();
    assert_eq!(late.status(), ControllerResponseStatus::Failed);
}

#[test]
fn not_leader_until_leadership_moves() {
    let leadership = Arc::new(StaticLeadership::new(["clicks"]));
    let cluster = Cluster::with_leadership(ControllerConfig::new(VIP), Some(leadership.clone()));
    let coordinator = cluster.coordinator("server-1");

    let outcome = thread::scope(|s| {
        let handle = s.spawn(|| coordinator.complete(10).unwrap());
        thread::sleep(Duration::from_millis(30));
        leadership.acquire("events");
        handle.join().unwrap()
    });

    assert!(matches!(outcome, CompletionOutcome::Committed { .. }));
    assert!(cluster.controller.stats().count(ControllerResponseStatus::NotLeader) >= 1);
}

#[test]
fn dropped_requests_are_resent() {
    let cluster = Cluster::new(ControllerConfig::new(VIP));
    cluster
        .transport
        .client()
        .drop_next
        .store(2, Ordering::SeqCst);

    let coordinator = cluster.coordinator("server-1");
    let outcome = coordinator.complete(64).unwrap();
    assert!(matches!(outcome, CompletionOutcome::Committed { .. }));
    assert!(coordinator.stats().last_error.is_some());
    assert_eq!(cluster.sink.commit_count(SEGMENT), 1);
}

#[test]
fn sink_outage_delays_commit_without_duplicates() {
    let cluster = Cluster::new(
        ControllerConfig::new(VIP).with_max_commit_time(Duration::from_millis(60)),
    );
    cluster.sink.set_fail_commits(true);
    let coordinator = cluster.coordinator("server-1");

    let outcome = thread::scope(|s| {
        let handle = s.spawn(|| coordinator.complete(300).unwrap());
        thread::sleep(Duration::from_millis(40));
        cluster.sink.set_fail_commits(false);
        handle.join().unwrap()
    });

    assert!(matches!(outcome, CompletionOutcome::Committed { offset: 300, .. }));
    assert_eq!(cluster.sink.commit_count(SEGMENT), 1);
    assert!(cluster.controller.stats().count(ControllerResponseStatus::Failed) >= 1);
}

#[test]
fn stopped_consuming_reaches_controller() {
    let cluster = Cluster::new(ControllerConfig::new(VIP));
    let coordinator = cluster.coordinator("server-9");

    let response = coordinator.stopped_consuming(40, "partition moved").unwrap();
    assert_eq!(response.status(), ControllerResponseStatus::Processed);
    assert_eq!(
        cluster
            .controller
            .manager()
            .stopped_reason(SEGMENT, "server-9")
            .as_deref(),
        Some("partition moved")
    );
}

#[test]
fn upload_requests_carry_segment_bytes() {
    let cluster = Cluster::new(ControllerConfig::new(VIP));
    cluster.coordinator("server-1").complete(5).unwrap();

    let urls = cluster.transport.client().urls();
    let upload = urls
        .iter()
        .find(|u| u.contains(RequestKind::SegmentUpload.path()))
        .unwrap();
    assert!(upload.contains("segmentSizeBytes="));
    let location = &cluster.sink.committed()[0].location;
    assert!(!cluster.uploads.get(location).unwrap().is_empty());
}
