//! The completion controller front end.

use crate::config::ControllerConfig;
use crate::handler::RequestHandler;
use crate::manager::SegmentCompletionManager;
use crate::metadata::CommitSink;
use crate::negotiation::Phase;
use parking_lot::RwLock;
use segcommit_protocol::{CompletionRequest, ControllerResponseStatus, Response};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Body sent when even a `FAILED` response cannot be encoded.
const FAILED_BODY: &[u8] =
    br#"{"status":"FAILED","segmentLocation":null,"isSplitCommitType":false,"controllerVipUrl":null}"#;

/// Counters of handled requests.
#[derive(Debug, Clone, Default)]
pub struct ControllerStats {
    /// Requests handled, including undecodable ones.
    pub requests: u64,
    /// Requests that could not be decoded.
    pub malformed: u64,
    /// Responses sent, by status.
    pub responses: HashMap<ControllerResponseStatus, u64>,
}

impl ControllerStats {
    /// Returns how many responses with `status` were sent.
    pub fn count(&self, status: ControllerResponseStatus) -> u64 {
        self.responses.get(&status).copied().unwrap_or(0)
    }
}

/// Segment completion controller.
///
/// Accepts requests either decoded (`handle_request`) or as raw
/// path-and-query plus body (`handle_post`), which is what an HTTP front end
/// or an in-process transport hands over.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use segcommit_controller::{CompletionController, ControllerConfig, MemoryCommitSink};
/// use segcommit_protocol::{ControllerResponseStatus, Response};
///
/// let controller = CompletionController::new(
///     ControllerConfig::default(),
///     Arc::new(MemoryCommitSink::new()),
/// );
///
/// let body = controller.handle_post(
///     "/segmentConsumed?instance=server-1&name=events__0__0__20240101T0000Z&offset=100",
///     &[],
/// );
/// let response = Response::decode(&body).unwrap();
/// assert_eq!(response.status(), ControllerResponseStatus::Commit);
/// ```
pub struct CompletionController {
    handler: RequestHandler,
    manager: Arc<SegmentCompletionManager>,
    stats: RwLock<ControllerStats>,
}

impl CompletionController {
    /// Creates a controller with default leadership and upload storage.
    pub fn new(config: ControllerConfig, sink: Arc<dyn CommitSink>) -> Self {
        Self::with_manager(Arc::new(SegmentCompletionManager::new(config, sink)))
    }

    /// Creates a controller around an existing manager.
    pub fn with_manager(manager: Arc<SegmentCompletionManager>) -> Self {
        Self {
            handler: RequestHandler::new(Arc::clone(&manager)),
            manager,
            stats: RwLock::new(ControllerStats::default()),
        }
    }

    /// Handles a decoded request.
    pub fn handle_request(&self, request: CompletionRequest) -> Response {
        let response = self.handler.handle(request);
        self.record(response.status(), false);
        response
    }

    /// Handles a raw POST and returns the encoded response body.
    pub fn handle_post(&self, path_and_query: &str, body: &[u8]) -> Vec<u8> {
        let response = match CompletionRequest::parse(path_and_query, body) {
            Ok(request) => self.handle_request(request),
            Err(e) => {
                warn!(path = path_and_query, error = %e, "undecodable request");
                self.record(ControllerResponseStatus::Failed, true);
                Response::failed()
            }
        };

        response.encode().unwrap_or_else(|e| {
            warn!(error = %e, "failed to encode response");
            FAILED_BODY.to_vec()
        })
    }

    /// Returns the current phase of a segment.
    pub fn phase(&self, segment_name: &str) -> Option<Phase> {
        self.manager.phase(segment_name)
    }

    /// Returns the underlying manager.
    pub fn manager(&self) -> &Arc<SegmentCompletionManager> {
        &self.manager
    }

    /// Returns a snapshot of the request counters.
    pub fn stats(&self) -> ControllerStats {
        self.stats.read().clone()
    }

    fn record(&self, status: ControllerResponseStatus, malformed: bool) {
        let mut stats = self.stats.write();
        stats.requests += 1;
        if malformed {
            stats.malformed += 1;
        }
        *stats.responses.entry(status).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryCommitSink;
    use segcommit_protocol::{RequestKind, RequestParams};

    const SEGMENT: &str = "events__0__4__20240101T0000Z";

    fn controller() -> (CompletionController, Arc<MemoryCommitSink>) {
        let sink = Arc::new(MemoryCommitSink::new());
        let controller = CompletionController::new(
            ControllerConfig::new("http://vip:9000"),
            sink.clone(),
        );
        (controller, sink)
    }

    fn post(
        controller: &CompletionController,
        kind: RequestKind,
        params: RequestParams,
        body: &[u8],
    ) -> Response {
        let request = CompletionRequest::new(kind, params);
        Response::decode(&controller.handle_post(&request.path_and_query(), body)).unwrap()
    }

    #[test]
    fn split_commit_over_raw_posts() {
        let (controller, sink) = controller();
        let params = RequestParams::new("server-1", SEGMENT, 42);

        let commit = post(&controller, RequestKind::SegmentConsumed, params.clone(), &[]);
        assert_eq!(commit.status(), ControllerResponseStatus::Commit);
        assert_eq!(commit.controller_vip_url(), Some("http://vip:9000"));

        let cont = post(&controller, RequestKind::SegmentCommitStart, params.clone(), &[]);
        assert_eq!(cont.status(), ControllerResponseStatus::CommitContinue);

        let uploaded = post(&controller, RequestKind::SegmentUpload, params.clone(), b"data");
        assert_eq!(uploaded.status(), ControllerResponseStatus::UploadSuccess);
        let location = uploaded.segment_location().unwrap().to_string();

        let end = post(
            &controller,
            RequestKind::SegmentCommitEnd,
            params.with_segment_location(location),
            &[],
        );
        assert_eq!(end.status(), ControllerResponseStatus::CommitSuccess);
        assert_eq!(sink.commit_count(SEGMENT), 1);

        let stats = controller.stats();
        assert_eq!(stats.requests, 4);
        assert_eq!(stats.count(ControllerResponseStatus::CommitSuccess), 1);
    }

    #[test]
    fn malformed_posts_fail() {
        let (controller, _) = controller();

        let body = controller.handle_post("/segmentExplode?instance=a&name=b&offset=1", &[]);
        assert_eq!(
            Response::decode(&body).unwrap().status(),
            ControllerResponseStatus::Failed
        );

        let body = controller.handle_post("/segmentConsumed?instance=a&offset=1", &[]);
        assert_eq!(
            Response::decode(&body).unwrap().status(),
            ControllerResponseStatus::Failed
        );

        assert_eq!(controller.stats().malformed, 2);
    }

    #[test]
    fn failed_body_constant_decodes() {
        let response = Response::decode(FAILED_BODY).unwrap();
        assert_eq!(response, Response::failed());
    }
}
