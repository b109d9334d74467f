//! Per-segment negotiation state machine.
//!
//! A `SegmentNegotiation` is only ever touched while its segment lock is
//! held. Every transition takes `now` explicitly; an elapsed winner deadline
//! is noticed lazily, on the next request for the segment.
//!
//! ```text
//! Consuming --consumed--> CommitterNotified --commitStart--> Committing
//!     ^                        |      \                         |
//!     |   deadline / winner    |       \ commit (single step)   | commitEnd
//!     +---- stopped -----------+        v                       v
//!                                   Finalizing <----------------+
//!                                    |      |
//!                         sink error |      | sink ok
//!                  (previous phase)<-+      +--> Committed
//! ```

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metadata::CommittedSegment;
use segcommit_protocol::{ControllerResponseStatus, Response, ResponseParams};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where a segment's negotiation stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// No proposal has been admitted.
    Consuming,
    /// A winner has been told to commit and has not started yet.
    CommitterNotified {
        /// The winning server.
        winner: String,
        /// The agreed offset.
        offset: u64,
        /// When the winner loses its claim.
        deadline: Instant,
    },
    /// The winner is building and uploading (split commit).
    Committing {
        /// The winning server.
        winner: String,
        /// The agreed offset.
        offset: u64,
        /// When the winner loses its claim.
        deadline: Instant,
        /// Location of the segment uploaded through the controller, if any.
        location: Option<String>,
    },
    /// The commit is being handed to metadata storage.
    Finalizing {
        /// The winning server.
        winner: String,
        /// The agreed offset.
        offset: u64,
        /// Final segment location.
        location: String,
    },
    /// The segment is committed.
    Committed {
        /// The server whose segment was committed.
        winner: String,
        /// The committed offset.
        offset: u64,
        /// Final segment location.
        location: String,
    },
}

impl Phase {
    /// Returns a short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Consuming => "consuming",
            Phase::CommitterNotified { .. } => "committer_notified",
            Phase::Committing { .. } => "committing",
            Phase::Finalizing { .. } => "finalizing",
            Phase::Committed { .. } => "committed",
        }
    }

    /// Returns the current winner and agreed offset.
    pub fn winner(&self) -> Option<(&str, u64)> {
        match self {
            Phase::Consuming => None,
            Phase::CommitterNotified { winner, offset, .. }
            | Phase::Committing { winner, offset, .. }
            | Phase::Finalizing { winner, offset, .. }
            | Phase::Committed { winner, offset, .. } => Some((winner.as_str(), *offset)),
        }
    }

    fn deadline(&self) -> Option<Instant> {
        match self {
            Phase::CommitterNotified { deadline, .. } | Phase::Committing { deadline, .. } => {
                Some(*deadline)
            }
            _ => None,
        }
    }

    fn is_won_by(&self, instance: &str, offset: u64) -> bool {
        self.winner() == Some((instance, offset))
    }
}

/// How the winner finishes its commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinalizeKind {
    /// `segmentCommit` after a non-split COMMIT.
    SingleStep,
    /// `segmentCommitEnd` after a split commit.
    SplitEnd,
}

/// Proof that a segment entered `Finalizing`, carrying what is needed to
/// either complete the commit or put the previous phase back.
#[derive(Debug)]
pub(crate) struct FinalizeTicket {
    previous: Phase,
    committed: CommittedSegment,
}

impl FinalizeTicket {
    pub(crate) fn committed(&self) -> &CommittedSegment {
        &self.committed
    }
}

/// Result of recording an upload.
#[derive(Debug)]
pub(crate) enum UploadOutcome {
    /// The upload belongs to the current winner.
    Accepted {
        response: Response,
        /// An earlier upload by the same winner that is no longer referenced.
        replaced: Option<String>,
    },
    /// The negotiation moved on while the upload was being stored.
    Rejected(Response),
}

/// Negotiation state of one segment.
#[derive(Debug)]
pub(crate) struct SegmentNegotiation {
    segment_name: String,
    phase: Phase,
    stopped: HashMap<String, String>,
}

impl SegmentNegotiation {
    pub(crate) fn new(segment_name: impl Into<String>) -> Self {
        Self {
            segment_name: segment_name.into(),
            phase: Phase::Consuming,
            stopped: HashMap::new(),
        }
    }

    pub(crate) fn phase(&self) -> &Phase {
        &self.phase
    }

    pub(crate) fn stopped_reason(&self, instance: &str) -> Option<&str> {
        self.stopped.get(instance).map(String::as_str)
    }

    /// Drops a winner whose deadline has passed.
    fn expire(&mut self, now: Instant) {
        if let Some(deadline) = self.phase.deadline() {
            if now >= deadline {
                if let Some((winner, offset)) = self.phase.winner() {
                    warn!(
                        segment = %self.segment_name,
                        winner,
                        offset,
                        phase = self.phase.name(),
                        "committer missed its deadline, reopening negotiation"
                    );
                }
                self.phase = Phase::Consuming;
            }
        }
    }

    fn commit_response(&self, offset: u64, config: &ControllerConfig) -> Response {
        let mut params = ResponseParams::new()
            .with_status(ControllerResponseStatus::Commit)
            .with_offset(offset)
            .with_build_time_seconds(config.build_time_seconds);

        if config.split_commit {
            params = params
                .with_split_commit(true)
                .with_controller_vip_url(config.controller_vip_url.clone());
        } else if let Some(ref prefix) = config.segment_location_prefix {
            params = params.with_segment_location(format!(
                "{}/{}",
                prefix.trim_end_matches('/'),
                self.segment_name
            ));
        }

        Response::new(params)
    }

    fn processed(offset: u64, location: &str) -> Response {
        Response::new(
            ResponseParams::new()
                .with_status(ControllerResponseStatus::Processed)
                .with_offset(offset)
                .with_segment_location(location),
        )
    }

    /// Answer for a server that is not the winner while a winner exists.
    fn contended(offset: u64, winning_offset: u64) -> Response {
        match offset.cmp(&winning_offset) {
            Ordering::Less => Response::catch_up(winning_offset),
            Ordering::Equal => Response::hold(winning_offset),
            Ordering::Greater => {
                Response::with_status_and_offset(ControllerResponseStatus::Discard, winning_offset)
            }
        }
    }

    pub(crate) fn on_consumed(
        &mut self,
        instance: &str,
        offset: u64,
        now: Instant,
        config: &ControllerConfig,
    ) -> Response {
        self.expire(now);

        match &self.phase {
            Phase::Consuming => {
                info!(
                    segment = %self.segment_name,
                    winner = instance,
                    offset,
                    "admitted committer"
                );
                self.phase = Phase::CommitterNotified {
                    winner: instance.to_string(),
                    offset,
                    deadline: now + config.max_commit_time,
                };
                self.commit_response(offset, config)
            }
            Phase::CommitterNotified {
                winner,
                offset: winning_offset,
                ..
            } if winner == instance => {
                if offset == *winning_offset {
                    // Lost or retried response: repeat the same decision.
                    self.commit_response(offset, config)
                } else {
                    warn!(
                        segment = %self.segment_name,
                        winner = instance,
                        offset,
                        winning_offset,
                        "committer changed its offset, reopening negotiation"
                    );
                    self.phase = Phase::Consuming;
                    Response::hold(offset)
                }
            }
            Phase::CommitterNotified {
                offset: winning_offset,
                ..
            } => Self::contended(offset, *winning_offset),
            Phase::Committing {
                winner,
                offset: winning_offset,
                ..
            }
            | Phase::Finalizing {
                winner,
                offset: winning_offset,
                ..
            } => {
                if winner == instance {
                    Response::hold(*winning_offset)
                } else {
                    Self::contended(offset, *winning_offset)
                }
            }
            Phase::Committed {
                offset: committed_offset,
                ..
            } => {
                if offset == *committed_offset {
                    Response::keep(offset)
                } else {
                    Response::with_status_and_offset(
                        ControllerResponseStatus::Discard,
                        *committed_offset,
                    )
                }
            }
        }
    }

    pub(crate) fn on_commit_start(
        &mut self,
        instance: &str,
        offset: u64,
        now: Instant,
        config: &ControllerConfig,
    ) -> Response {
        self.expire(now);

        if !self.phase.is_won_by(instance, offset) {
            return Response::failed();
        }

        let continue_response = Response::new(
            ResponseParams::new()
                .with_status(ControllerResponseStatus::CommitContinue)
                .with_offset(offset)
                .with_split_commit(true)
                .with_controller_vip_url(config.controller_vip_url.clone()),
        );

        match &self.phase {
            Phase::CommitterNotified { winner, .. } => {
                debug!(segment = %self.segment_name, winner = %winner, offset, "commit started");
                self.phase = Phase::Committing {
                    winner: winner.clone(),
                    offset,
                    deadline: now + config.max_commit_time,
                    location: None,
                };
                continue_response
            }
            Phase::Committing { .. } => continue_response,
            Phase::Finalizing { .. } => Response::hold(offset),
            Phase::Committed { location, .. } => Self::processed(offset, location),
            Phase::Consuming => Response::failed(),
        }
    }

    pub(crate) fn check_upload(
        &mut self,
        instance: &str,
        offset: u64,
        now: Instant,
    ) -> Result<(), Response> {
        self.expire(now);
        match &self.phase {
            Phase::Committing { .. } if self.phase.is_won_by(instance, offset) => Ok(()),
            _ => Err(Response::failed()),
        }
    }

    pub(crate) fn finish_upload(
        &mut self,
        instance: &str,
        offset: u64,
        stored_at: &str,
        now: Instant,
    ) -> UploadOutcome {
        self.expire(now);

        let won = self.phase.is_won_by(instance, offset);
        match &mut self.phase {
            Phase::Committing { location, .. } if won => {
                let replaced = location.replace(stored_at.to_string());
                debug!(segment = %self.segment_name, location = stored_at, "segment uploaded");
                UploadOutcome::Accepted {
                    response: Response::new(
                        ResponseParams::new()
                            .with_status(ControllerResponseStatus::UploadSuccess)
                            .with_offset(offset)
                            .with_segment_location(stored_at),
                    ),
                    replaced,
                }
            }
            _ => UploadOutcome::Rejected(Response::failed()),
        }
    }

    pub(crate) fn begin_finalize(
        &mut self,
        instance: &str,
        offset: u64,
        requested_location: Option<&str>,
        kind: FinalizeKind,
        now: Instant,
    ) -> Result<FinalizeTicket, Response> {
        self.expire(now);

        if !self.phase.is_won_by(instance, offset) {
            return Err(Response::failed());
        }

        let location = match (&self.phase, kind) {
            (Phase::CommitterNotified { .. }, FinalizeKind::SingleStep) => {
                requested_location.ok_or_else(Response::failed)?.to_string()
            }
            (Phase::Committing { location, .. }, FinalizeKind::SplitEnd) => {
                match (location.as_deref(), requested_location) {
                    (Some(uploaded), Some(requested)) if uploaded == requested => {
                        uploaded.to_string()
                    }
                    (Some(uploaded), None) => uploaded.to_string(),
                    (None, Some(requested)) => requested.to_string(),
                    _ => return Err(Response::failed()),
                }
            }
            (Phase::Finalizing { .. }, _) => return Err(Response::hold(offset)),
            (Phase::Committed { location, .. }, _) => {
                return Err(Self::processed(offset, location))
            }
            _ => return Err(Response::failed()),
        };

        let committed = CommittedSegment {
            segment_name: self.segment_name.clone(),
            offset,
            location: location.clone(),
            instance_id: instance.to_string(),
        };
        let previous = std::mem::replace(
            &mut self.phase,
            Phase::Finalizing {
                winner: instance.to_string(),
                offset,
                location,
            },
        );

        Ok(FinalizeTicket {
            previous,
            committed,
        })
    }

    pub(crate) fn complete_finalize(
        &mut self,
        ticket: FinalizeTicket,
        result: Result<(), ControllerError>,
    ) -> Response {
        let FinalizeTicket {
            previous,
            committed,
        } = ticket;

        match result {
            Ok(()) => {
                info!(
                    segment = %committed.segment_name,
                    winner = %committed.instance_id,
                    offset = committed.offset,
                    location = %committed.location,
                    "segment committed"
                );
                let response = Response::new(
                    ResponseParams::new()
                        .with_status(ControllerResponseStatus::CommitSuccess)
                        .with_offset(committed.offset)
                        .with_segment_location(committed.location.clone()),
                );
                self.phase = Phase::Committed {
                    winner: committed.instance_id,
                    offset: committed.offset,
                    location: committed.location,
                };
                response
            }
            Err(e) => {
                warn!(
                    segment = %committed.segment_name,
                    error = %e,
                    "commit hand-off failed, keeping previous phase"
                );
                self.phase = previous;
                Response::failed()
            }
        }
    }

    pub(crate) fn on_stopped_consuming(
        &mut self,
        instance: &str,
        offset: u64,
        reason: &str,
        now: Instant,
    ) -> Response {
        self.expire(now);
        self.stopped.insert(instance.to_string(), reason.to_string());

        let abort = matches!(
            &self.phase,
            Phase::CommitterNotified { winner, .. } | Phase::Committing { winner, .. }
                if winner == instance
        );
        if abort {
            warn!(
                segment = %self.segment_name,
                winner = instance,
                offset,
                reason,
                "committer stopped consuming, reopening negotiation"
            );
            self.phase = Phase::Consuming;
        }

        Response::processed()
    }

    pub(crate) fn on_extend_build_time(
        &mut self,
        instance: &str,
        offset: u64,
        extra: Duration,
        now: Instant,
        config: &ControllerConfig,
    ) -> Response {
        self.expire(now);

        let won = self.phase.is_won_by(instance, offset);
        match &mut self.phase {
            Phase::CommitterNotified { deadline, .. } | Phase::Committing { deadline, .. }
                if won =>
            {
                let extension = extra.min(config.max_build_time_extension);
                *deadline = (*deadline).max(now) + extension;
                debug!(
                    segment = %self.segment_name,
                    winner = instance,
                    extension_secs = extension.as_secs(),
                    "build time extended"
                );
                Response::processed()
            }
            _ => Response::failed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEGMENT: &str = "events__0__3__t0";

    fn config() -> ControllerConfig {
        ControllerConfig::new("http://vip:8998").with_max_commit_time(Duration::from_secs(10))
    }

    fn non_split_config() -> ControllerConfig {
        config()
            .with_split_commit(false)
            .with_segment_location_prefix("s3://bucket/segments/")
    }

    fn status(response: &Response) -> ControllerResponseStatus {
        response.status()
    }

    #[test]
    fn first_proposal_wins() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let now = Instant::now();

        let first = negotiation.on_consumed("a", 100, now, &config());
        assert_eq!(status(&first), ControllerResponseStatus::Commit);
        assert_eq!(first.offset(), Some(100));
        assert!(first.is_split_commit());
        assert_eq!(first.controller_vip_url(), Some("http://vip:8998"));
        assert_eq!(first.build_time_seconds(), Some(60));
        assert!(first.is_well_formed());

        let second = negotiation.on_consumed("b", 100, now, &config());
        assert_eq!(status(&second), ControllerResponseStatus::Hold);

        let lagging = negotiation.on_consumed("c", 90, now, &config());
        assert_eq!(status(&lagging), ControllerResponseStatus::CatchUp);
        assert_eq!(lagging.offset(), Some(100));

        let ahead = negotiation.on_consumed("d", 110, now, &config());
        assert_eq!(status(&ahead), ControllerResponseStatus::Discard);
        assert_eq!(ahead.offset(), Some(100));
    }

    #[test]
    fn winner_retry_repeats_commit() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let now = Instant::now();
        let first = negotiation.on_consumed("a", 100, now, &config());
        let again = negotiation.on_consumed("a", 100, now, &config());
        assert_eq!(first, again);
    }

    #[test]
    fn winner_changing_offset_reopens() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let now = Instant::now();
        negotiation.on_consumed("a", 100, now, &config());

        let response = negotiation.on_consumed("a", 120, now, &config());
        assert_eq!(status(&response), ControllerResponseStatus::Hold);
        assert_eq!(negotiation.phase(), &Phase::Consuming);
    }

    #[test]
    fn non_split_commit_assigns_location() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let response = negotiation.on_consumed("a", 5, Instant::now(), &non_split_config());
        assert!(!response.is_split_commit());
        assert_eq!(response.controller_vip_url(), None);
        assert_eq!(
            response.segment_location(),
            Some("s3://bucket/segments/events__0__3__t0")
        );
    }

    #[test]
    fn deadline_expiry_admits_next_proposer() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let start = Instant::now();
        negotiation.on_consumed("a", 100, start, &config());

        let before = negotiation.on_consumed("b", 100, start + Duration::from_secs(9), &config());
        assert_eq!(status(&before), ControllerResponseStatus::Hold);

        let after = negotiation.on_consumed("b", 100, start + Duration::from_secs(10), &config());
        assert_eq!(status(&after), ControllerResponseStatus::Commit);
        assert_eq!(negotiation.phase().winner(), Some(("b", 100)));
    }

    #[test]
    fn split_commit_flow() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let now = Instant::now();
        negotiation.on_consumed("a", 100, now, &config());

        let cont = negotiation.on_commit_start("a", 100, now, &config());
        assert_eq!(status(&cont), ControllerResponseStatus::CommitContinue);
        assert_eq!(cont.controller_vip_url(), Some("http://vip:8998"));

        negotiation.check_upload("a", 100, now).unwrap();
        let outcome = negotiation.finish_upload("a", 100, "seg.tmp.1", now);
        let UploadOutcome::Accepted { response, replaced } = outcome else {
            panic!("upload rejected");
        };
        assert_eq!(status(&response), ControllerResponseStatus::UploadSuccess);
        assert_eq!(response.segment_location(), Some("seg.tmp.1"));
        assert!(replaced.is_none());

        let ticket = negotiation
            .begin_finalize("a", 100, Some("seg.tmp.1"), FinalizeKind::SplitEnd, now)
            .unwrap();
        assert_eq!(ticket.committed().location, "seg.tmp.1");
        assert_eq!(negotiation.phase().name(), "finalizing");

        // Others are held while the hand-off is in flight.
        let held = negotiation.on_consumed("b", 100, now, &config());
        assert_eq!(status(&held), ControllerResponseStatus::Hold);

        let done = negotiation.complete_finalize(ticket, Ok(()));
        assert_eq!(status(&done), ControllerResponseStatus::CommitSuccess);
        assert_eq!(done.offset(), Some(100));

        let keep = negotiation.on_consumed("b", 100, now, &config());
        assert_eq!(status(&keep), ControllerResponseStatus::Keep);
        let discard = negotiation.on_consumed("c", 95, now, &config());
        assert_eq!(status(&discard), ControllerResponseStatus::Discard);
        assert_eq!(discard.offset(), Some(100));
    }

    #[test]
    fn keep_only_for_committed_offset() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let now = Instant::now();
        negotiation.on_consumed("a", 100, now, &config());

        // No proposal is told to keep before the segment is committed.
        for offset in [90, 100, 110] {
            let reply = negotiation.on_consumed("b", offset, now, &config());
            assert_ne!(status(&reply), ControllerResponseStatus::Keep);
        }

        negotiation.on_commit_start("a", 100, now, &config());
        negotiation.check_upload("a", 100, now).unwrap();
        negotiation.finish_upload("a", 100, "seg.tmp.1", now);
        let ticket = negotiation
            .begin_finalize("a", 100, Some("seg.tmp.1"), FinalizeKind::SplitEnd, now)
            .unwrap();
        for offset in [90, 100, 110] {
            let reply = negotiation.on_consumed("b", offset, now, &config());
            assert_ne!(status(&reply), ControllerResponseStatus::Keep);
        }
        negotiation.complete_finalize(ticket, Ok(()));

        let keep = negotiation.on_consumed("b", 100, now, &config());
        assert_eq!(status(&keep), ControllerResponseStatus::Keep);
        assert_eq!(keep.offset(), Some(100));
        for offset in [90, 110] {
            let reply = negotiation.on_consumed("c", offset, now, &config());
            assert_eq!(status(&reply), ControllerResponseStatus::Discard);
            assert_eq!(reply.offset(), Some(100));
        }
    }

    #[test]
    fn commit_end_from_non_winner_fails() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let now = Instant::now();
        negotiation.on_consumed("a", 100, now, &config());
        negotiation.on_commit_start("a", 100, now, &config());

        let result = negotiation.begin_finalize("b", 100, Some("x"), FinalizeKind::SplitEnd, now);
        assert_eq!(
            result.unwrap_err().status(),
            ControllerResponseStatus::Failed
        );
        let result = negotiation.begin_finalize("a", 99, Some("x"), FinalizeKind::SplitEnd, now);
        assert_eq!(
            result.unwrap_err().status(),
            ControllerResponseStatus::Failed
        );
    }

    #[test]
    fn commit_end_location_must_match_upload() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let now = Instant::now();
        negotiation.on_consumed("a", 100, now, &config());
        negotiation.on_commit_start("a", 100, now, &config());
        negotiation.finish_upload("a", 100, "seg.tmp.1", now);

        let result =
            negotiation.begin_finalize("a", 100, Some("elsewhere"), FinalizeKind::SplitEnd, now);
        assert!(result.is_err());
        assert_eq!(negotiation.phase().name(), "committing");
    }

    #[test]
    fn failed_hand_off_restores_phase() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let now = Instant::now();
        negotiation.on_consumed("a", 100, now, &config());
        negotiation.on_commit_start("a", 100, now, &config());
        negotiation.finish_upload("a", 100, "seg.tmp.1", now);
        let before = negotiation.phase().clone();

        let ticket = negotiation
            .begin_finalize("a", 100, None, FinalizeKind::SplitEnd, now)
            .unwrap();
        let response =
            negotiation.complete_finalize(ticket, Err(ControllerError::Metadata("down".into())));
        assert_eq!(status(&response), ControllerResponseStatus::Failed);
        assert_eq!(negotiation.phase(), &before);
    }

    #[test]
    fn retries_after_commit_are_processed() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let now = Instant::now();
        let cfg = non_split_config();
        negotiation.on_consumed("a", 100, now, &cfg);
        let ticket = negotiation
            .begin_finalize("a", 100, Some("s3://x"), FinalizeKind::SingleStep, now)
            .unwrap();
        negotiation.complete_finalize(ticket, Ok(()));

        let retry = negotiation
            .begin_finalize("a", 100, Some("s3://x"), FinalizeKind::SingleStep, now)
            .unwrap_err();
        assert_eq!(status(&retry), ControllerResponseStatus::Processed);
        assert_eq!(retry.segment_location(), Some("s3://x"));

        let start = negotiation.on_commit_start("a", 100, now, &cfg);
        assert_eq!(status(&start), ControllerResponseStatus::Processed);

        let other = negotiation
            .begin_finalize("b", 100, Some("s3://y"), FinalizeKind::SingleStep, now)
            .unwrap_err();
        assert_eq!(status(&other), ControllerResponseStatus::Failed);
    }

    #[test]
    fn single_step_commit_requires_location() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let now = Instant::now();
        negotiation.on_consumed("a", 100, now, &non_split_config());
        let result = negotiation.begin_finalize("a", 100, None, FinalizeKind::SingleStep, now);
        assert!(result.is_err());
        assert_eq!(negotiation.phase().name(), "committer_notified");
    }

    #[test]
    fn upload_after_deadline_is_rejected() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let start = Instant::now();
        negotiation.on_consumed("a", 100, start, &config());
        negotiation.on_commit_start("a", 100, start, &config());
        negotiation.check_upload("a", 100, start).unwrap();

        let late = start + Duration::from_secs(11);
        let outcome = negotiation.finish_upload("a", 100, "seg.tmp.1", late);
        assert!(matches!(outcome, UploadOutcome::Rejected(_)));
        assert_eq!(negotiation.phase(), &Phase::Consuming);
    }

    #[test]
    fn stopped_winner_reopens() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let now = Instant::now();
        negotiation.on_consumed("a", 100, now, &config());

        let response = negotiation.on_stopped_consuming("b", 100, "disk full", now);
        assert_eq!(status(&response), ControllerResponseStatus::Processed);
        assert_eq!(negotiation.phase().winner(), Some(("a", 100)));
        assert_eq!(negotiation.stopped_reason("b"), Some("disk full"));

        negotiation.on_stopped_consuming("a", 100, "oom", now);
        assert_eq!(negotiation.phase(), &Phase::Consuming);
    }

    #[test]
    fn extend_build_time() {
        let mut negotiation = SegmentNegotiation::new(SEGMENT);
        let start = Instant::now();
        let cfg = config().with_max_build_time_extension(Duration::from_secs(5));
        negotiation.on_consumed("a", 100, start, &cfg);

        // Asking for more than the cap grants the cap.
        let response =
            negotiation.on_extend_build_time("a", 100, Duration::from_secs(60), start, &cfg);
        assert_eq!(status(&response), ControllerResponseStatus::Processed);

        let held = negotiation.on_consumed("b", 100, start + Duration::from_secs(14), &cfg);
        assert_eq!(status(&held), ControllerResponseStatus::Hold);
        let admitted = negotiation.on_consumed("b", 100, start + Duration::from_secs(15), &cfg);
        assert_eq!(status(&admitted), ControllerResponseStatus::Commit);

        let denied = negotiation.on_extend_build_time("a", 100, Duration::from_secs(1), start, &cfg);
        assert_eq!(status(&denied), ControllerResponseStatus::Failed);
    }
}
