//! Segment completion arbitration across all segments.

use crate::config::ControllerConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::leadership::{AlwaysLeader, LeadershipCheck};
use crate::metadata::CommitSink;
use crate::negotiation::{FinalizeKind, Phase, SegmentNegotiation, UploadOutcome};
use crate::upload::{MemoryUploadStore, SegmentUploadStore};
use bytes::Bytes;
use parking_lot::Mutex;
use segcommit_protocol::{LlcSegmentName, RequestParams, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

type SegmentSlot = Arc<Mutex<SegmentNegotiation>>;

/// Arbitrates which server commits each segment.
///
/// Requests for the same segment are serialized on that segment's lock;
/// requests for different segments never contend beyond the brief lookup in
/// the segment map. Uploads and metadata hand-offs run with no lock held.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use segcommit_controller::{ControllerConfig, MemoryCommitSink, SegmentCompletionManager};
/// use segcommit_protocol::{ControllerResponseStatus, RequestParams};
///
/// let manager = SegmentCompletionManager::new(
///     ControllerConfig::default(),
///     Arc::new(MemoryCommitSink::new()),
/// );
///
/// let params = RequestParams::new("server-1", "events__0__0__20240101T0000Z", 100);
/// let response = manager.segment_consumed(&params).unwrap();
/// assert_eq!(response.status(), ControllerResponseStatus::Commit);
/// ```
pub struct SegmentCompletionManager {
    config: ControllerConfig,
    leadership: Arc<dyn LeadershipCheck>,
    uploads: Arc<dyn SegmentUploadStore>,
    sink: Arc<dyn CommitSink>,
    segments: Mutex<HashMap<String, SegmentSlot>>,
}

impl SegmentCompletionManager {
    /// Creates a manager that leads every table and keeps uploads in memory.
    pub fn new(config: ControllerConfig, sink: Arc<dyn CommitSink>) -> Self {
        Self {
            config,
            leadership: Arc::new(AlwaysLeader),
            uploads: Arc::new(MemoryUploadStore::new()),
            sink,
            segments: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the leadership check.
    pub fn with_leadership(mut self, leadership: Arc<dyn LeadershipCheck>) -> Self {
        self.leadership = leadership;
        self
    }

    /// Replaces the upload store.
    pub fn with_upload_store(mut self, uploads: Arc<dyn SegmentUploadStore>) -> Self {
        self.uploads = uploads;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Handles `segmentConsumed`: a server reached the end of a segment.
    pub fn segment_consumed(&self, params: &RequestParams) -> ControllerResult<Response> {
        let Some(slot) = self.slot_for(params)? else {
            return Ok(Response::not_leader());
        };
        let response = slot.lock().on_consumed(
            &params.instance_id,
            params.offset,
            Instant::now(),
            &self.config,
        );
        Ok(response)
    }

    /// Handles `segmentCommit`: single-step commit of an already-stored
    /// segment at `params.segment_location`.
    pub fn segment_commit(&self, params: &RequestParams) -> ControllerResult<Response> {
        self.finalize(params, FinalizeKind::SingleStep)
    }

    /// Handles `segmentCommitStart`.
    pub fn segment_commit_start(&self, params: &RequestParams) -> ControllerResult<Response> {
        let Some(slot) = self.slot_for(params)? else {
            return Ok(Response::not_leader());
        };
        let response = slot.lock().on_commit_start(
            &params.instance_id,
            params.offset,
            Instant::now(),
            &self.config,
        );
        Ok(response)
    }

    /// Handles `segmentUpload`.
    ///
    /// The segment is stored under a unique temporary location. If the
    /// negotiation moved on while the data was being stored, the upload is
    /// deleted again and the server gets `FAILED`.
    pub fn segment_upload(&self, params: &RequestParams, data: Bytes) -> ControllerResult<Response> {
        let Some(slot) = self.slot_for(params)? else {
            return Ok(Response::not_leader());
        };
        if data.is_empty() {
            return Err(ControllerError::InvalidRequest(
                "segment upload has no content".into(),
            ));
        }

        let checked = slot
            .lock()
            .check_upload(&params.instance_id, params.offset, Instant::now());
        if let Err(response) = checked {
            return Ok(response);
        }

        let location = self.upload_location(&params.segment_name);
        debug!(
            segment = %params.segment_name,
            location = %location,
            size = data.len(),
            "storing segment upload"
        );
        self.uploads.put(&location, data)?;

        let outcome = slot.lock().finish_upload(
            &params.instance_id,
            params.offset,
            &location,
            Instant::now(),
        );
        match outcome {
            UploadOutcome::Accepted { response, replaced } => {
                if let Some(old) = replaced {
                    self.discard_upload(&old);
                }
                Ok(response)
            }
            UploadOutcome::Rejected(response) => {
                self.discard_upload(&location);
                Ok(response)
            }
        }
    }

    /// Handles `segmentCommitEnd`.
    pub fn segment_commit_end(&self, params: &RequestParams) -> ControllerResult<Response> {
        self.finalize(params, FinalizeKind::SplitEnd)
    }

    /// Handles `segmentStoppedConsuming`.
    pub fn segment_stopped_consuming(&self, params: &RequestParams) -> ControllerResult<Response> {
        let Some(slot) = self.slot_for(params)? else {
            return Ok(Response::not_leader());
        };
        let reason = params.reason.as_deref().unwrap_or("unknown");
        let response = slot.lock().on_stopped_consuming(
            &params.instance_id,
            params.offset,
            reason,
            Instant::now(),
        );
        Ok(response)
    }

    /// Handles `extendBuildTime`.
    pub fn extend_build_time(&self, params: &RequestParams) -> ControllerResult<Response> {
        let Some(slot) = self.slot_for(params)? else {
            return Ok(Response::not_leader());
        };
        let extra = params.extra_time_sec.ok_or_else(|| {
            ControllerError::InvalidRequest("extendBuildTime without extraTimeSec".into())
        })?;
        let response = slot.lock().on_extend_build_time(
            &params.instance_id,
            params.offset,
            Duration::from_secs(extra),
            Instant::now(),
            &self.config,
        );
        Ok(response)
    }

    /// Returns the current phase of a segment, if it is being tracked.
    pub fn phase(&self, segment_name: &str) -> Option<Phase> {
        let slot = self.segments.lock().get(segment_name).cloned();
        slot.map(|slot| slot.lock().phase().clone())
    }

    /// Returns the reason `instance_id` gave for stopping on a segment.
    pub fn stopped_reason(&self, segment_name: &str, instance_id: &str) -> Option<String> {
        let slot = self.segments.lock().get(segment_name).cloned();
        slot.and_then(|slot| slot.lock().stopped_reason(instance_id).map(str::to_string))
    }

    /// Stops tracking a segment. Returns true if it was tracked.
    ///
    /// Used once every replica has moved past a committed segment.
    pub fn forget_segment(&self, segment_name: &str) -> bool {
        self.segments.lock().remove(segment_name).is_some()
    }

    /// Returns the number of tracked segments.
    pub fn tracked_segments(&self) -> usize {
        self.segments.lock().len()
    }

    fn finalize(&self, params: &RequestParams, kind: FinalizeKind) -> ControllerResult<Response> {
        let Some(slot) = self.slot_for(params)? else {
            return Ok(Response::not_leader());
        };

        let begun = slot.lock().begin_finalize(
            &params.instance_id,
            params.offset,
            params.segment_location.as_deref(),
            kind,
            Instant::now(),
        );
        let ticket = match begun {
            Ok(ticket) => ticket,
            Err(response) => return Ok(response),
        };

        // Other requests for this segment see `Finalizing` and are held.
        let result = self.sink.commit_segment(ticket.committed());
        let response = slot.lock().complete_finalize(ticket, result);
        Ok(response)
    }

    /// Validates the request and returns the segment's slot, or `None` when
    /// this controller does not lead the segment's table.
    fn slot_for(&self, params: &RequestParams) -> ControllerResult<Option<SegmentSlot>> {
        if params.instance_id.is_empty() {
            return Err(ControllerError::InvalidRequest("missing instance id".into()));
        }
        let name: LlcSegmentName = params.segment_name.parse()?;

        if !self.leadership.is_leader(name.table()) {
            debug!(table = name.table(), "not leader for table");
            return Ok(None);
        }

        let mut segments = self.segments.lock();
        let slot = segments
            .entry(params.segment_name.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SegmentNegotiation::new(&params.segment_name))));
        Ok(Some(Arc::clone(slot)))
    }

    fn upload_location(&self, segment_name: &str) -> String {
        let file = format!("{}.tmp.{}", segment_name, Uuid::new_v4());
        match self.config.segment_location_prefix {
            Some(ref prefix) => format!("{}/{}", prefix.trim_end_matches('/'), file),
            None => file,
        }
    }

    fn discard_upload(&self, location: &str) {
        if let Err(e) = self.uploads.delete(location) {
            warn!(location, error = %e, "failed to delete unused upload");
        }
    }
}
