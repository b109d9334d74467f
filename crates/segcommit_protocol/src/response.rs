//! Controller responses.
//!
//! A [`Response`] is built in two stages: parameters are accumulated in a
//! [`ResponseParams`] with chained setters, then frozen with
//! [`Response::new`]. The frozen value has getters only.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "status": "COMMIT",
//!   "offset": 1,
//!   "buildTimeSec": 123,
//!   "segmentLocation": null,
//!   "isSplitCommitType": false,
//!   "controllerVipUrl": null
//! }
//! ```
//!
//! `offset` and `buildTimeSec` are omitted when unset. `segmentLocation` and
//! `controllerVipUrl` are written as `null` when unset, and the split flag is
//! always written.

use crate::error::ProtocolResult;
use crate::status::ControllerResponseStatus;
use serde::{Deserialize, Deserializer, Serialize};

/// Accumulator for the fields of a [`Response`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseParams {
    status: ControllerResponseStatus,
    offset: Option<u64>,
    build_time_seconds: Option<u64>,
    segment_location: Option<String>,
    split_commit: bool,
    controller_vip_url: Option<String>,
}

impl ResponseParams {
    /// Creates an empty accumulator. The status defaults to `FAILED`.
    pub fn new() -> Self {
        Self {
            status: ControllerResponseStatus::Failed,
            offset: None,
            build_time_seconds: None,
            segment_location: None,
            split_commit: false,
            controller_vip_url: None,
        }
    }

    /// Sets the status.
    pub fn with_status(mut self, status: ControllerResponseStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the offset the server should use next.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sets the advisory build budget in seconds.
    pub fn with_build_time_seconds(mut self, seconds: u64) -> Self {
        self.build_time_seconds = Some(seconds);
        self
    }

    /// Sets the segment location.
    pub fn with_segment_location(mut self, location: impl Into<String>) -> Self {
        self.segment_location = Some(location.into());
        self
    }

    /// Sets whether the commit is split into build and upload phases.
    pub fn with_split_commit(mut self, split_commit: bool) -> Self {
        self.split_commit = split_commit;
        self
    }

    /// Sets the stable controller address for follow-up calls.
    pub fn with_controller_vip_url(mut self, url: impl Into<String>) -> Self {
        self.controller_vip_url = Some(url.into());
        self
    }
}

impl Default for ResponseParams {
    fn default() -> Self {
        Self::new()
    }
}

/// A controller decision for one server request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    status: ControllerResponseStatus,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_sentinel"
    )]
    offset: Option<u64>,

    #[serde(
        rename = "buildTimeSec",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_sentinel"
    )]
    build_time_seconds: Option<u64>,

    #[serde(rename = "segmentLocation", default)]
    segment_location: Option<String>,

    #[serde(rename = "isSplitCommitType", default)]
    split_commit: bool,

    #[serde(rename = "controllerVipUrl", default)]
    controller_vip_url: Option<String>,
}

impl Response {
    /// Freezes the accumulated parameters into a response.
    pub fn new(params: ResponseParams) -> Self {
        Self {
            status: params.status,
            offset: params.offset,
            build_time_seconds: params.build_time_seconds,
            segment_location: params.segment_location,
            split_commit: params.split_commit,
            controller_vip_url: params.controller_vip_url,
        }
    }

    /// A response carrying only a status.
    pub fn with_status(status: ControllerResponseStatus) -> Self {
        Self::new(ResponseParams::new().with_status(status))
    }

    /// A response carrying a status and an offset.
    pub fn with_status_and_offset(status: ControllerResponseStatus, offset: u64) -> Self {
        Self::new(ResponseParams::new().with_status(status).with_offset(offset))
    }

    /// `NOT_LEADER`.
    pub fn not_leader() -> Self {
        Self::with_status(ControllerResponseStatus::NotLeader)
    }

    /// `FAILED`.
    pub fn failed() -> Self {
        Self::with_status(ControllerResponseStatus::Failed)
    }

    /// `DISCARD`.
    pub fn discard() -> Self {
        Self::with_status(ControllerResponseStatus::Discard)
    }

    /// `COMMIT_SUCCESS`.
    pub fn commit_success() -> Self {
        Self::with_status(ControllerResponseStatus::CommitSuccess)
    }

    /// `COMMIT_CONTINUE`.
    pub fn commit_continue() -> Self {
        Self::with_status(ControllerResponseStatus::CommitContinue)
    }

    /// `PROCESSED`.
    pub fn processed() -> Self {
        Self::with_status(ControllerResponseStatus::Processed)
    }

    /// `NOT_SENT`.
    pub fn not_sent() -> Self {
        Self::with_status(ControllerResponseStatus::NotSent)
    }

    /// `HOLD` at the given offset.
    pub fn hold(offset: u64) -> Self {
        Self::with_status_and_offset(ControllerResponseStatus::Hold, offset)
    }

    /// `CATCH_UP` to the given offset.
    pub fn catch_up(offset: u64) -> Self {
        Self::with_status_and_offset(ControllerResponseStatus::CatchUp, offset)
    }

    /// `KEEP` at the given offset.
    pub fn keep(offset: u64) -> Self {
        Self::with_status_and_offset(ControllerResponseStatus::Keep, offset)
    }

    /// Returns the status.
    pub fn status(&self) -> ControllerResponseStatus {
        self.status
    }

    /// Returns the offset, if set.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Returns the advisory build budget in seconds, if set.
    pub fn build_time_seconds(&self) -> Option<u64> {
        self.build_time_seconds
    }

    /// Returns the segment location, if set.
    pub fn segment_location(&self) -> Option<&str> {
        self.segment_location.as_deref()
    }

    /// Returns true if the commit is split into build and upload phases.
    pub fn is_split_commit(&self) -> bool {
        self.split_commit
    }

    /// Returns the stable controller address, if set.
    pub fn controller_vip_url(&self) -> Option<&str> {
        self.controller_vip_url.as_deref()
    }

    /// Returns false for responses a controller must never emit
    /// (a split commit without a VIP URL).
    pub fn is_well_formed(&self) -> bool {
        !self.split_commit || self.controller_vip_url.is_some()
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Encodes to a JSON string.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Numeric fields written by older controllers use `-1` for "not set".
#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Unsigned(u64),
    Signed(i64),
}

fn deserialize_sentinel<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawNumber>::deserialize(deserializer)? {
        Some(RawNumber::Unsigned(value)) => Some(value),
        Some(RawNumber::Signed(_)) | None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    const OFFSET: u64 = 1;
    const BUILD_TIME_SECONDS: u64 = 123;
    const SEGMENT_LOCATION: &str = "file.tmp";
    const CONTROLLER_VIP_URL: &str = "http://localhost:8998";

    fn to_value(response: &Response) -> Value {
        serde_json::from_slice(&response.encode().unwrap()).unwrap()
    }

    #[test]
    fn complete_params() {
        let params = ResponseParams::new()
            .with_build_time_seconds(BUILD_TIME_SECONDS)
            .with_offset(OFFSET)
            .with_segment_location(SEGMENT_LOCATION)
            .with_split_commit(true)
            .with_status(ControllerResponseStatus::Commit);

        let response = Response::new(params);
        assert_eq!(response.build_time_seconds(), Some(BUILD_TIME_SECONDS));
        assert_eq!(response.offset(), Some(OFFSET));
        assert_eq!(response.segment_location(), Some(SEGMENT_LOCATION));
        assert!(response.is_split_commit());
        assert_eq!(response.status(), ControllerResponseStatus::Commit);
    }

    #[test]
    fn incomplete_params() {
        let params = ResponseParams::new()
            .with_build_time_seconds(BUILD_TIME_SECONDS)
            .with_offset(OFFSET)
            .with_status(ControllerResponseStatus::Commit);

        let response = Response::new(params);
        assert_eq!(response.build_time_seconds(), Some(BUILD_TIME_SECONDS));
        assert_eq!(response.offset(), Some(OFFSET));
        assert_eq!(response.segment_location(), None);
        assert_eq!(response.controller_vip_url(), None);
        assert!(!response.is_split_commit());
        assert_eq!(response.status(), ControllerResponseStatus::Commit);
    }

    #[test]
    fn json_with_all_params() {
        let response = Response::new(
            ResponseParams::new()
                .with_build_time_seconds(BUILD_TIME_SECONDS)
                .with_offset(OFFSET)
                .with_segment_location(SEGMENT_LOCATION)
                .with_split_commit(true)
                .with_controller_vip_url(CONTROLLER_VIP_URL)
                .with_status(ControllerResponseStatus::Commit),
        );

        let json = to_value(&response);
        assert_eq!(json["offset"], 1);
        assert_eq!(json["buildTimeSec"], 123);
        assert_eq!(json["segmentLocation"], SEGMENT_LOCATION);
        assert_eq!(json["isSplitCommitType"], true);
        assert_eq!(json["status"], "COMMIT");
        assert_eq!(json["controllerVipUrl"], CONTROLLER_VIP_URL);
    }

    #[test]
    fn json_null_location_and_vip() {
        let response = Response::new(
            ResponseParams::new()
                .with_build_time_seconds(BUILD_TIME_SECONDS)
                .with_offset(OFFSET)
                .with_split_commit(false)
                .with_status(ControllerResponseStatus::Commit),
        );

        let json = to_value(&response);
        let object = json.as_object().unwrap();
        assert_eq!(json["offset"], 1);
        assert_eq!(object.get("segmentLocation"), Some(&Value::Null));
        assert_eq!(object.get("controllerVipUrl"), Some(&Value::Null));
        assert_eq!(object.get("isSplitCommitType"), Some(&Value::Bool(false)));
        assert_eq!(json["status"], "COMMIT");
    }

    #[test]
    fn split_flag_written_when_never_set() {
        let response = Response::new(
            ResponseParams::new()
                .with_build_time_seconds(BUILD_TIME_SECONDS)
                .with_offset(OFFSET)
                .with_status(ControllerResponseStatus::Commit),
        );

        let json = to_value(&response);
        assert_eq!(json["isSplitCommitType"], Value::Bool(false));
        assert!(json["segmentLocation"].is_null());
        assert!(json["controllerVipUrl"].is_null());
    }

    #[test]
    fn json_location_without_vip() {
        let response = Response::new(
            ResponseParams::new()
                .with_offset(OFFSET)
                .with_segment_location(SEGMENT_LOCATION)
                .with_split_commit(false)
                .with_status(ControllerResponseStatus::Commit),
        );

        let json = to_value(&response);
        assert_eq!(json["segmentLocation"], SEGMENT_LOCATION);
        assert_eq!(json["isSplitCommitType"], false);
        assert!(json["controllerVipUrl"].is_null());
        assert!(response.is_well_formed());
    }

    #[test]
    fn json_vip_without_location() {
        let response = Response::new(
            ResponseParams::new()
                .with_offset(OFFSET)
                .with_controller_vip_url(CONTROLLER_VIP_URL)
                .with_split_commit(false)
                .with_status(ControllerResponseStatus::Commit),
        );

        let json = to_value(&response);
        assert!(json["segmentLocation"].is_null());
        assert_eq!(json["isSplitCommitType"], false);
        assert_eq!(json["controllerVipUrl"], CONTROLLER_VIP_URL);
    }

    #[test]
    fn unset_numbers_are_omitted() {
        let json = to_value(&Response::processed());
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("offset"));
        assert!(!object.contains_key("buildTimeSec"));
        assert_eq!(json["status"], "PROCESSED");
    }

    #[test]
    fn decode_tolerates_split_without_vip() {
        let body = br#"{"status":"COMMIT","offset":7,"isSplitCommitType":true}"#;
        let response = Response::decode(body).unwrap();
        assert!(response.is_split_commit());
        assert_eq!(response.controller_vip_url(), None);
        assert!(!response.is_well_formed());
    }

    #[test]
    fn decode_legacy_sentinels_and_unknown_fields() {
        let body = br#"{
            "status": "HOLD",
            "offset": -1,
            "buildTimeSec": -1,
            "streamPartitionMsgOffset": null,
            "segmentLocation": null
        }"#;
        let response = Response::decode(body).unwrap();
        assert_eq!(response.status(), ControllerResponseStatus::Hold);
        assert_eq!(response.offset(), None);
        assert_eq!(response.build_time_seconds(), None);
        assert_eq!(response.segment_location(), None);
        assert!(!response.is_split_commit());
    }

    #[test]
    fn decode_rejects_missing_status() {
        assert!(Response::decode(br#"{"offset":3}"#).is_err());
        assert!(Response::decode(b"not json").is_err());
    }

    #[test]
    fn empty_location_is_not_absent() {
        let response = Response::new(
            ResponseParams::new()
                .with_status(ControllerResponseStatus::UploadSuccess)
                .with_segment_location(""),
        );
        let decoded = Response::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.segment_location(), Some(""));
        assert_eq!(decoded, response);
    }

    #[test]
    fn params_default_to_failed() {
        let response = Response::new(ResponseParams::default());
        assert_eq!(response.status(), ControllerResponseStatus::Failed);
        assert_eq!(response, Response::failed());
    }
}
