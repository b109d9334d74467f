//! Server-side driver of one segment's completion.

use crate::config::CompletionConfig;
use crate::error::{ServerError, ServerResult};
use crate::segment::{SegmentArtifact, SegmentBuilder, SegmentStore};
use crate::transport::CompletionTransport;
use parking_lot::{Mutex, RwLock};
use segcommit_protocol::{
    CompletionRequest, ControllerResponseStatus, RequestKind, RequestParams, Response,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where the coordinator stands for its segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Consuming and proposing.
    Consuming,
    /// Waiting for another negotiation to finish.
    Holding,
    /// Consuming up to the offset the controller asked for.
    CatchingUp,
    /// Building the segment after winning.
    Building,
    /// Running the commit calls.
    Committing,
    /// This server's segment was committed.
    Committed,
    /// The local copy matches the committed segment and is kept.
    Retained,
    /// The local copy was dropped in favor of another server's.
    Discarded,
    /// Completion failed.
    Error,
}

impl CoordinatorState {
    /// Returns true once the segment needs no more work from this server.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoordinatorState::Committed | CoordinatorState::Retained | CoordinatorState::Discarded
        )
    }
}

/// How a segment ended up on this server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// This server committed the segment.
    Committed {
        /// Committed offset.
        offset: u64,
        /// Where the committed segment lives.
        location: String,
    },
    /// Another server committed an identical segment; the local copy stays.
    Kept {
        /// Committed offset.
        offset: u64,
    },
    /// Another server's segment was committed; the local copy is gone.
    Discarded {
        /// The authoritative offset, when the controller sent one.
        offset: Option<u64>,
    },
}

/// Statistics about completion attempts.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    /// Requests handed to the transport.
    pub requests_sent: u64,
    /// Backoff waits taken.
    pub retries: u64,
    /// HOLD responses received.
    pub holds: u64,
    /// CATCH_UP rounds performed.
    pub catch_ups: u64,
    /// Builds that took longer than the advertised budget.
    pub build_overruns: u64,
    /// Segments committed by this server.
    pub commits: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Backoff bookkeeping for one retry loop.
#[derive(Debug, Default)]
struct Backoff {
    /// Failed attempts; bounded by `RetryConfig::max_attempts`.
    attempts: u32,
    /// HOLD replies; unbounded.
    holds: u32,
}

/// Result of one commit attempt after winning.
enum CommitAttempt {
    Done(CompletionOutcome),
    /// The controller turned the commit down; propose again.
    Rejected(ControllerResponseStatus),
}

/// Drives one segment through the completion protocol.
///
/// `complete` proposes the end offset, obeys the controller's decisions and
/// retries retryable ones with backoff, until the segment is committed, kept
/// or discarded.
pub struct CommitCoordinator<T: CompletionTransport, B: SegmentBuilder> {
    config: CompletionConfig,
    segment_name: String,
    transport: Arc<T>,
    builder: Arc<B>,
    store: Arc<dyn SegmentStore>,
    state: RwLock<CoordinatorState>,
    stats: RwLock<CoordinatorStats>,
    commit_url: RwLock<Option<String>>,
    stored: Mutex<Vec<String>>,
    cancelled: AtomicBool,
}

impl<T: CompletionTransport, B: SegmentBuilder> CommitCoordinator<T, B> {
    /// Creates a coordinator for `segment_name`.
    pub fn new(
        config: CompletionConfig,
        segment_name: impl Into<String>,
        transport: Arc<T>,
        builder: Arc<B>,
        store: Arc<dyn SegmentStore>,
    ) -> Self {
        Self {
            config,
            segment_name: segment_name.into(),
            transport,
            builder,
            store,
            state: RwLock::new(CoordinatorState::Consuming),
            stats: RwLock::new(CoordinatorStats::default()),
            commit_url: RwLock::new(None),
            stored: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Returns the segment name.
    pub fn segment_name(&self) -> &str {
        &self.segment_name
    }

    /// Gets the current state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> CoordinatorStats {
        self.stats.read().clone()
    }

    /// Cancels the current or next `complete`. It stops before its next
    /// request with `ServerError::Cancelled`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> ServerResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(ServerError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: CoordinatorState) {
        *self.state.write() = state;
    }

    fn params(&self, offset: u64) -> RequestParams {
        RequestParams::new(&self.config.instance_id, &self.segment_name, offset)
    }

    /// Reports reaching `offset` and returns the controller's decision.
    ///
    /// A controller that could not be reached yields `NOT_SENT`.
    pub fn segment_consumed(&self, offset: u64) -> ServerResult<Response> {
        let request = CompletionRequest::new(RequestKind::SegmentConsumed, self.params(offset));
        self.send(&request)
    }

    /// Tells the controller this server stopped consuming the segment.
    pub fn stopped_consuming(&self, offset: u64, reason: &str) -> ServerResult<Response> {
        let request = CompletionRequest::new(
            RequestKind::SegmentStoppedConsuming,
            self.params(offset).with_reason(reason),
        );
        self.send_with_retry(&request)
    }

    /// Asks for `extra` more time to finish building.
    pub fn extend_build_time(&self, offset: u64, extra: Duration) -> ServerResult<Response> {
        let request = CompletionRequest::new(
            RequestKind::ExtendBuildTime,
            self.params(offset).with_extra_time_sec(extra.as_secs()),
        );
        self.send_with_retry(&request)
    }

    /// Runs the protocol for a segment ending at `offset` to a terminal
    /// outcome.
    ///
    /// A pending `cancel` is consumed by this call, so the next call starts
    /// fresh.
    pub fn complete(&self, offset: u64) -> ServerResult<CompletionOutcome> {
        let result = self.run(offset);
        self.cancelled.store(false, Ordering::SeqCst);
        if let Err(ref e) = result {
            warn!(segment = %self.segment_name, error = %e, "segment completion failed");
            self.set_state(CoordinatorState::Error);
            self.stats.write().last_error = Some(e.to_string());
        }
        result
    }

    fn run(&self, mut offset: u64) -> ServerResult<CompletionOutcome> {
        let mut backoff = Backoff::default();
        let mut catch_up_rounds = 0u32;

        loop {
            self.check_cancelled()?;
            self.set_state(CoordinatorState::Consuming);

            let decision = self.segment_consumed(offset)?;
            let status = decision.status();
            match status {
                ControllerResponseStatus::Commit => match self.commit(offset, &decision)? {
                    CommitAttempt::Done(outcome) => return Ok(outcome),
                    CommitAttempt::Rejected(status) => self.backoff(&mut backoff, status)?,
                },
                ControllerResponseStatus::Keep => {
                    info!(segment = %self.segment_name, offset, "keeping local segment");
                    self.set_state(CoordinatorState::Retained);
                    return Ok(CompletionOutcome::Kept { offset });
                }
                ControllerResponseStatus::Discard => {
                    info!(
                        segment = %self.segment_name,
                        offset,
                        committed = ?decision.offset(),
                        "discarding local segment"
                    );
                    self.drop_local_copies();
                    self.set_state(CoordinatorState::Discarded);
                    return Ok(CompletionOutcome::Discarded {
                        offset: decision.offset(),
                    });
                }
                ControllerResponseStatus::CatchUp => {
                    catch_up_rounds += 1;
                    if catch_up_rounds > self.config.max_catch_up_rounds {
                        return Err(ServerError::CatchUpLimit(catch_up_rounds - 1));
                    }
                    let target = decision.offset().ok_or_else(|| {
                        ServerError::Protocol("CATCH_UP without an offset".into())
                    })?;
                    self.set_state(CoordinatorState::CatchingUp);
                    self.stats.write().catch_ups += 1;
                    let reached = self.builder.catch_up(&self.segment_name, target)?;
                    debug!(segment = %self.segment_name, target, reached, "caught up");
                    offset = reached;
                    backoff = Backoff::default();
                }
                status if status.is_retryable() => self.backoff(&mut backoff, status)?,
                other => {
                    return Err(ServerError::UnexpectedStatus {
                        request: RequestKind::SegmentConsumed,
                        status: other,
                    })
                }
            }
        }
    }

    fn commit(&self, offset: u64, decision: &Response) -> ServerResult<CommitAttempt> {
        info!(
            segment = %self.segment_name,
            offset,
            split = decision.is_split_commit(),
            "won commit"
        );
        self.set_state(CoordinatorState::Building);
        let (artifact, elapsed) = self.build(offset, decision.build_time_seconds())?;

        self.set_state(CoordinatorState::Committing);
        if decision.is_split_commit() {
            let vip = decision
                .controller_vip_url()
                .unwrap_or(self.config.controller_url.as_str())
                .to_string();
            *self.commit_url.write() = Some(vip);
            self.split_commit(offset, &artifact, elapsed)
        } else {
            self.single_step_commit(offset, decision.segment_location(), &artifact, elapsed)
        }
    }

    fn build(
        &self,
        offset: u64,
        budget_secs: Option<u64>,
    ) -> ServerResult<(SegmentArtifact, Duration)> {
        let start = Instant::now();
        let artifact = self.builder.build(&self.segment_name, offset)?;
        let elapsed = start.elapsed();

        // The budget is advisory; overruns are only reported.
        if let Some(budget) = budget_secs.map(Duration::from_secs) {
            if elapsed > budget {
                warn!(
                    segment = %self.segment_name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_secs = budget.as_secs(),
                    "segment build overran its budget"
                );
                self.stats.write().build_overruns += 1;
            }
        }
        Ok((artifact, elapsed))
    }

    fn commit_params(&self, offset: u64, artifact: &SegmentArtifact, elapsed: Duration) -> RequestParams {
        self.params(offset)
            .with_row_count(artifact.row_count())
            .with_segment_size_bytes(artifact.size())
            .with_build_time_millis(elapsed.as_millis() as u64)
    }

    fn single_step_commit(
        &self,
        offset: u64,
        assigned: Option<&str>,
        artifact: &SegmentArtifact,
        elapsed: Duration,
    ) -> ServerResult<CommitAttempt> {
        let location = assigned
            .map(str::to_string)
            .unwrap_or_else(|| self.store.local_location(&self.segment_name));
        self.store.store(&location, artifact)?;
        self.stored.lock().push(location.clone());

        let request = CompletionRequest::new(
            RequestKind::SegmentCommit,
            self.commit_params(offset, artifact, elapsed)
                .with_segment_location(location.clone()),
        );
        let response = self.send_with_retry(&request)?;
        self.finish(RequestKind::SegmentCommit, offset, location, &response)
    }

    fn split_commit(
        &self,
        offset: u64,
        artifact: &SegmentArtifact,
        elapsed: Duration,
    ) -> ServerResult<CommitAttempt> {
        let params = self.commit_params(offset, artifact, elapsed);

        let start = CompletionRequest::new(RequestKind::SegmentCommitStart, params.clone());
        let response = self.send_with_retry(&start)?;
        match response.status() {
            ControllerResponseStatus::CommitContinue => {}
            ControllerResponseStatus::Processed => {
                let location = response.segment_location().unwrap_or_default().to_string();
                return self.finish(RequestKind::SegmentCommitStart, offset, location, &response);
            }
            status if status.is_retryable() => return Ok(CommitAttempt::Rejected(status)),
            other => {
                return Err(ServerError::UnexpectedStatus {
                    request: RequestKind::SegmentCommitStart,
                    status: other,
                })
            }
        }

        let upload = CompletionRequest::upload(params.clone(), artifact.data().to_vec());
        let response = self.send_with_retry(&upload)?;
        let location = match response.status() {
            ControllerResponseStatus::UploadSuccess => response
                .segment_location()
                .ok_or_else(|| ServerError::Protocol("UPLOAD_SUCCESS without a location".into()))?
                .to_string(),
            status if status.is_retryable() => return Ok(CommitAttempt::Rejected(status)),
            other => {
                return Err(ServerError::UnexpectedStatus {
                    request: RequestKind::SegmentUpload,
                    status: other,
                })
            }
        };
        debug!(segment = %self.segment_name, location = %location, "segment uploaded");

        let end = CompletionRequest::new(
            RequestKind::SegmentCommitEnd,
            params.with_segment_location(location.clone()),
        );
        let response = self.send_with_retry(&end)?;
        self.finish(RequestKind::SegmentCommitEnd, offset, location, &response)
    }

    /// Interprets the reply to the final commit call.
    fn finish(
        &self,
        request: RequestKind,
        offset: u64,
        location: String,
        response: &Response,
    ) -> ServerResult<CommitAttempt> {
        match response.status() {
            ControllerResponseStatus::CommitSuccess | ControllerResponseStatus::Processed => {
                let location = response
                    .segment_location()
                    .map(str::to_string)
                    .unwrap_or(location);
                info!(segment = %self.segment_name, offset, location = %location, "segment committed");
                self.set_state(CoordinatorState::Committed);
                self.stats.write().commits += 1;
                Ok(CommitAttempt::Done(CompletionOutcome::Committed { offset, location }))
            }
            status if status.is_retryable() => {
                warn!(
                    segment = %self.segment_name,
                    request = %request,
                    status = %status,
                    "commit rejected"
                );
                Ok(CommitAttempt::Rejected(status))
            }
            other => Err(ServerError::UnexpectedStatus {
                request,
                status: other,
            }),
        }
    }

    /// Sends once. Retryable transport failures become `NOT_SENT`.
    fn send(&self, request: &CompletionRequest) -> ServerResult<Response> {
        let base_url = self.url_for(request.kind);
        self.stats.write().requests_sent += 1;
        match self
            .transport
            .send_with_timeout(&base_url, request, self.config.request_timeout)
        {
            Ok(response) => {
                debug!(
                    segment = %self.segment_name,
                    instance = %self.config.instance_id,
                    request = %request.kind,
                    offset = request.params.offset,
                    status = %response.status(),
                    "controller replied"
                );
                Ok(response)
            }
            Err(e) if e.is_retryable() => {
                warn!(segment = %self.segment_name, request = %request.kind, error = %e, "request not sent");
                self.stats.write().last_error = Some(e.to_string());
                Ok(Response::not_sent())
            }
            Err(e) => Err(e),
        }
    }

    /// Sends until the reply is something other than `NOT_SENT` or `HOLD`.
    ///
    /// Commit follow-ups are idempotent on the controller, so resending is
    /// safe.
    fn send_with_retry(&self, request: &CompletionRequest) -> ServerResult<Response> {
        let mut backoff = Backoff::default();
        loop {
            self.check_cancelled()?;
            let response = self.send(request)?;
            match response.status() {
                ControllerResponseStatus::NotSent | ControllerResponseStatus::Hold => {
                    self.backoff(&mut backoff, response.status())?
                }
                _ => return Ok(response),
            }
        }
    }

    /// Sleeps before the next attempt.
    ///
    /// HOLD replies are paced like failures but never count toward
    /// `max_attempts`: a holding server waits until the winner commits or
    /// the controller expires it, however long that takes.
    fn backoff(&self, backoff: &mut Backoff, status: ControllerResponseStatus) -> ServerResult<()> {
        let step = if status == ControllerResponseStatus::Hold {
            backoff.holds = backoff.holds.saturating_add(1);
            backoff.holds
        } else {
            backoff.attempts += 1;
            if backoff.attempts >= self.config.retry.max_attempts {
                return Err(ServerError::RetriesExhausted {
                    attempts: backoff.attempts,
                    last_status: status,
                });
            }
            backoff.attempts
        };

        {
            let mut stats = self.stats.write();
            stats.retries += 1;
            if status == ControllerResponseStatus::Hold {
                stats.holds += 1;
            }
        }
        if status == ControllerResponseStatus::Hold {
            self.set_state(CoordinatorState::Holding);
        }

        let delay = self.config.retry.delay_for_attempt(step);
        debug!(
            segment = %self.segment_name,
            status = %status,
            attempt = step,
            delay_ms = delay.as_millis() as u64,
            "backing off"
        );
        std::thread::sleep(delay);
        Ok(())
    }

    /// Commit-phase requests follow the VIP handed out with COMMIT; the
    /// rest go to the configured controller.
    fn url_for(&self, kind: RequestKind) -> String {
        if kind.is_commit_phase() {
            if let Some(url) = self.commit_url.read().clone() {
                return url;
            }
        }
        self.config.controller_url.clone()
    }

    fn drop_local_copies(&self) {
        for location in self.stored.lock().drain(..) {
            if let Err(e) = self.store.remove(&location) {
                warn!(location = %location, error = %e, "failed to remove local segment");
            }
        }
    }
}
