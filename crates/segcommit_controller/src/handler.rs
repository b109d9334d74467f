//! Request dispatch.

use crate::error::ControllerError;
use crate::manager::SegmentCompletionManager;
use bytes::Bytes;
use segcommit_protocol::{CompletionRequest, RequestKind, Response};
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes decoded requests to the completion manager.
pub struct RequestHandler {
    manager: Arc<SegmentCompletionManager>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(manager: Arc<SegmentCompletionManager>) -> Self {
        Self { manager }
    }

    /// Handles one request. Errors are answered with `FAILED`.
    pub fn handle(&self, request: CompletionRequest) -> Response {
        let CompletionRequest {
            kind,
            params,
            payload,
        } = request;

        let result = match kind {
            RequestKind::SegmentConsumed => self.manager.segment_consumed(&params),
            RequestKind::SegmentCommit => self.manager.segment_commit(&params),
            RequestKind::SegmentCommitStart => self.manager.segment_commit_start(&params),
            RequestKind::SegmentUpload => match payload {
                Some(data) => self.manager.segment_upload(&params, Bytes::from(data)),
                None => Err(ControllerError::InvalidRequest(
                    "segment upload has no body".into(),
                )),
            },
            RequestKind::SegmentCommitEnd => self.manager.segment_commit_end(&params),
            RequestKind::SegmentStoppedConsuming => {
                self.manager.segment_stopped_consuming(&params)
            }
            RequestKind::ExtendBuildTime => self.manager.extend_build_time(&params),
        };

        match result {
            Ok(response) => {
                debug!(
                    request = %kind,
                    segment = %params.segment_name,
                    instance = %params.instance_id,
                    offset = params.offset,
                    status = %response.status(),
                    "handled request"
                );
                response
            }
            Err(e) => {
                warn!(
                    request = %kind,
                    segment = %params.segment_name,
                    instance = %params.instance_id,
                    error = %e,
                    "request failed"
                );
                Response::failed()
            }
        }
    }
}
