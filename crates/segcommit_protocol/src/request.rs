//! Server requests.
//!
//! Every request is a POST to `{controller}{path}?{query}`. The path names
//! the intent ([`RequestKind`]), the query carries [`RequestParams`], and the
//! body is empty except for segment uploads, which carry the built segment.

use crate::error::{ProtocolError, ProtocolResult};
use std::fmt;

/// The intent of a server request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// The server reached its end criteria and proposes to commit.
    SegmentConsumed,
    /// Single-step commit of a segment built in non-split mode.
    SegmentCommit,
    /// First step of a split commit: the segment has been built.
    SegmentCommitStart,
    /// Split commit: upload the built segment to the controller.
    SegmentUpload,
    /// Last step of a split commit: the segment is at its final location.
    SegmentCommitEnd,
    /// The server stopped consuming the segment (e.g. after an error).
    SegmentStoppedConsuming,
    /// The committer asks for more time to build the segment.
    ExtendBuildTime,
}

impl RequestKind {
    /// All request kinds.
    pub const ALL: [RequestKind; 7] = [
        RequestKind::SegmentConsumed,
        RequestKind::SegmentCommit,
        RequestKind::SegmentCommitStart,
        RequestKind::SegmentUpload,
        RequestKind::SegmentCommitEnd,
        RequestKind::SegmentStoppedConsuming,
        RequestKind::ExtendBuildTime,
    ];

    /// Returns the URL path for this request.
    pub fn path(&self) -> &'static str {
        match self {
            RequestKind::SegmentConsumed => "/segmentConsumed",
            RequestKind::SegmentCommit => "/segmentCommit",
            RequestKind::SegmentCommitStart => "/segmentCommitStart",
            RequestKind::SegmentUpload => "/segmentUpload",
            RequestKind::SegmentCommitEnd => "/segmentCommitEnd",
            RequestKind::SegmentStoppedConsuming => "/segmentStoppedConsuming",
            RequestKind::ExtendBuildTime => "/extendBuildTime",
        }
    }

    /// Looks up a request kind by URL path.
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.path() == path)
    }

    /// Returns true for requests that belong to the commit phase and must be
    /// sent to the controller VIP URL in split-commit mode.
    pub fn is_commit_phase(&self) -> bool {
        matches!(
            self,
            RequestKind::SegmentCommitStart
                | RequestKind::SegmentUpload
                | RequestKind::SegmentCommitEnd
                | RequestKind::ExtendBuildTime
        )
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path()[1..])
    }
}

/// Parameters of a server request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestParams {
    /// Identity of the proposing server.
    pub instance_id: String,
    /// Name of the segment being negotiated.
    pub segment_name: String,
    /// Stream offset the server has consumed up to.
    pub offset: u64,
    /// Why the server stopped consuming.
    pub reason: Option<String>,
    /// Extra build time requested, in seconds.
    pub extra_time_sec: Option<u64>,
    /// Number of rows in the segment.
    pub row_count: Option<u64>,
    /// Time spent building the segment.
    pub build_time_millis: Option<u64>,
    /// Time spent waiting for a decision.
    pub wait_time_millis: Option<u64>,
    /// Where the built segment was stored.
    pub segment_location: Option<String>,
    /// Memory used while consuming.
    pub memory_used_bytes: Option<u64>,
    /// Size of the built segment.
    pub segment_size_bytes: Option<u64>,
}

impl RequestParams {
    /// Creates request parameters with the required fields.
    pub fn new(instance_id: impl Into<String>, segment_name: impl Into<String>, offset: u64) -> Self {
        Self {
            instance_id: instance_id.into(),
            segment_name: segment_name.into(),
            offset,
            ..Self::default()
        }
    }

    /// Sets the offset.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the stop reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the requested extra build time.
    pub fn with_extra_time_sec(mut self, seconds: u64) -> Self {
        self.extra_time_sec = Some(seconds);
        self
    }

    /// Sets the row count.
    pub fn with_row_count(mut self, rows: u64) -> Self {
        self.row_count = Some(rows);
        self
    }

    /// Sets the build time.
    pub fn with_build_time_millis(mut self, millis: u64) -> Self {
        self.build_time_millis = Some(millis);
        self
    }

    /// Sets the wait time.
    pub fn with_wait_time_millis(mut self, millis: u64) -> Self {
        self.wait_time_millis = Some(millis);
        self
    }

    /// Sets the segment location.
    pub fn with_segment_location(mut self, location: impl Into<String>) -> Self {
        self.segment_location = Some(location.into());
        self
    }

    /// Sets the memory used.
    pub fn with_memory_used_bytes(mut self, bytes: u64) -> Self {
        self.memory_used_bytes = Some(bytes);
        self
    }

    /// Sets the segment size.
    pub fn with_segment_size_bytes(mut self, bytes: u64) -> Self {
        self.segment_size_bytes = Some(bytes);
        self
    }

    /// Encodes to a URL query string (without the leading `?`).
    pub fn to_query_string(&self) -> String {
        let mut pairs = vec![
            ("instance", self.instance_id.clone()),
            ("name", self.segment_name.clone()),
            ("offset", self.offset.to_string()),
        ];

        let optional_numbers = [
            ("extraTimeSec", self.extra_time_sec),
            ("rowCount", self.row_count),
            ("buildTimeMillis", self.build_time_millis),
            ("waitTimeMillis", self.wait_time_millis),
            ("memoryUsedBytes", self.memory_used_bytes),
            ("segmentSizeBytes", self.segment_size_bytes),
        ];
        for (key, value) in optional_numbers {
            if let Some(value) = value {
                pairs.push((key, value.to_string()));
            }
        }
        if let Some(ref reason) = self.reason {
            pairs.push(("reason", reason.clone()));
        }
        if let Some(ref location) = self.segment_location {
            pairs.push(("location", location.clone()));
        }

        pairs
            .into_iter()
            .map(|(key, value)| format!("{key}={}", encode_component(&value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Decodes from a URL query string. Unknown keys are ignored.
    pub fn from_query_string(query: &str) -> ProtocolResult<Self> {
        let mut instance_id = None;
        let mut segment_name = None;
        let mut offset = None;
        let mut params = Self::default();

        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
            let value = decode_component(raw)
                .ok_or_else(|| ProtocolError::invalid_param(key, raw))?;

            match key {
                "instance" => instance_id = Some(value),
                "name" => segment_name = Some(value),
                "offset" => offset = Some(parse_number(key, &value)?),
                "reason" => params.reason = Some(value),
                "location" => params.segment_location = Some(value),
                "extraTimeSec" => params.extra_time_sec = Some(parse_number(key, &value)?),
                "rowCount" => params.row_count = Some(parse_number(key, &value)?),
                "buildTimeMillis" => params.build_time_millis = Some(parse_number(key, &value)?),
                "waitTimeMillis" => params.wait_time_millis = Some(parse_number(key, &value)?),
                "memoryUsedBytes" => params.memory_used_bytes = Some(parse_number(key, &value)?),
                "segmentSizeBytes" => params.segment_size_bytes = Some(parse_number(key, &value)?),
                _ => {}
            }
        }

        params.instance_id = instance_id.ok_or(ProtocolError::MissingParam("instance"))?;
        params.segment_name = segment_name.ok_or(ProtocolError::MissingParam("name"))?;
        params.offset = offset.ok_or(ProtocolError::MissingParam("offset"))?;
        Ok(params)
    }
}

/// A complete server request: intent, parameters and optional upload body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Request intent.
    pub kind: RequestKind,
    /// Request parameters.
    pub params: RequestParams,
    /// Segment bytes, for uploads only.
    pub payload: Option<Vec<u8>>,
}

impl CompletionRequest {
    /// Creates a request without a body.
    pub fn new(kind: RequestKind, params: RequestParams) -> Self {
        Self {
            kind,
            params,
            payload: None,
        }
    }

    /// Creates a segment upload request.
    pub fn upload(params: RequestParams, payload: Vec<u8>) -> Self {
        Self {
            kind: RequestKind::SegmentUpload,
            params,
            payload: Some(payload),
        }
    }

    /// Returns the path and query, e.g. `/segmentConsumed?instance=...`.
    pub fn path_and_query(&self) -> String {
        format!("{}?{}", self.kind.path(), self.params.to_query_string())
    }

    /// Returns the full URL of this request against a controller base URL.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path_and_query())
    }

    /// Parses a request from a path with query string and a body.
    ///
    /// Anything in front of the last path segment (scheme, host, prefixes)
    /// is ignored.
    pub fn parse(path_and_query: &str, body: &[u8]) -> ProtocolResult<Self> {
        let (path, query) = path_and_query
            .split_once('?')
            .unwrap_or((path_and_query, ""));
        let last = path.rfind('/').map(|i| &path[i..]).unwrap_or(path);
        let kind = RequestKind::from_path(last)
            .ok_or_else(|| ProtocolError::UnknownRequest(path.to_string()))?;
        let params = RequestParams::from_query_string(query)?;
        let payload = (kind == RequestKind::SegmentUpload).then(|| body.to_vec());

        Ok(Self {
            kind,
            params,
            payload,
        })
    }
}

fn parse_number(key: &str, value: &str) -> ProtocolResult<u64> {
    value
        .parse()
        .map_err(|_| ProtocolError::invalid_param(key, value))
}

/// Percent-encodes everything except RFC 3986 unreserved characters.
fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn decode_component(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = value.get(i + 1..i + 3)?;
                if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return None;
                }
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}
