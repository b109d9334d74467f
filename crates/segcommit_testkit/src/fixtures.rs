//! In-process cluster fixture.
//!
//! Wires a `CompletionController` to server-side coordinators through the
//! loopback HTTP client, so tests exercise the full wire path without a
//! network.

use segcommit_controller::{
    CompletionController, ControllerConfig, MemoryCommitSink, MemoryUploadStore,
    SegmentCompletionManager,
};
use segcommit_server::{
    CommitCoordinator, CompletionConfig, HttpTransport, LocalSegmentStore, LoopbackClient,
    LoopbackServer, RetryConfig, SyntheticSegmentBuilder,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Base URL coordinators use to reach the fixture controller.
pub const TEST_CONTROLLER_URL: &str = "http://controller.test:9000";

/// Hands loopback requests to a controller.
#[derive(Clone)]
pub struct ControllerEndpoint(pub Arc<CompletionController>);

impl LoopbackServer for ControllerEndpoint {
    fn handle_post(&self, path_and_query: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        Ok(self.0.handle_post(path_and_query, body))
    }
}

/// Transport type used by the fixture.
pub type LoopbackTransport = HttpTransport<LoopbackClient<ControllerEndpoint>>;

/// Coordinator type used by the fixture.
pub type TestCoordinator = CommitCoordinator<LoopbackTransport, SyntheticSegmentBuilder>;

/// A controller plus everything a server needs to talk to it.
pub struct TestCluster {
    /// The controller.
    pub controller: Arc<CompletionController>,
    /// Committed segments.
    pub sink: Arc<MemoryCommitSink>,
    /// Uploaded segments.
    pub uploads: Arc<MemoryUploadStore>,
    /// Shared loopback transport.
    pub transport: Arc<LoopbackTransport>,
    /// Server-side segment store on a temporary directory.
    pub store: Arc<LocalSegmentStore>,
    _temp_dir: TempDir,
}

impl TestCluster {
    /// Creates a cluster with a fresh controller.
    pub fn new(config: ControllerConfig) -> Self {
        let sink = Arc::new(MemoryCommitSink::new());
        let uploads = Arc::new(MemoryUploadStore::new());
        let manager =
            SegmentCompletionManager::new(config, sink.clone()).with_upload_store(uploads.clone());
        let controller = Arc::new(CompletionController::with_manager(Arc::new(manager)));
        let transport = HttpTransport::new(LoopbackClient::new(ControllerEndpoint(Arc::clone(
            &controller,
        ))));

        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = LocalSegmentStore::open(temp_dir.path()).expect("Failed to open segment store");

        Self {
            controller,
            sink,
            uploads,
            transport: Arc::new(transport),
            store: Arc::new(store),
            _temp_dir: temp_dir,
        }
    }

    /// Creates a coordinator for `instance` completing `segment_name`, with
    /// fast retries.
    pub fn coordinator(&self, instance: &str, segment_name: &str) -> TestCoordinator {
        self.coordinator_with(
            instance,
            segment_name,
            Arc::new(SyntheticSegmentBuilder::new()),
        )
    }

    /// Like `coordinator`, with a specific builder.
    pub fn coordinator_with(
        &self,
        instance: &str,
        segment_name: &str,
        builder: Arc<SyntheticSegmentBuilder>,
    ) -> TestCoordinator {
        CommitCoordinator::new(
            fast_retry_config(instance),
            segment_name,
            Arc::clone(&self.transport),
            builder,
            self.store.clone(),
        )
    }
}

/// A completion config for `instance` that retries quickly and often.
pub fn fast_retry_config(instance: &str) -> CompletionConfig {
    CompletionConfig::new(instance, TEST_CONTROLLER_URL).with_retry(
        RetryConfig::new(500)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5)),
    )
}
