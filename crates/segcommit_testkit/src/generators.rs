//! Property-based test generators using proptest.

use proptest::prelude::*;
use segcommit_protocol::{
    CompletionRequest, ControllerResponseStatus, LlcSegmentName, RequestKind, RequestParams,
    Response, ResponseParams,
};

/// Strategy for any response status.
pub fn status_strategy() -> impl Strategy<Value = ControllerResponseStatus> {
    prop::sample::select(ControllerResponseStatus::ALL.to_vec())
}

/// Strategy for any request kind.
pub fn request_kind_strategy() -> impl Strategy<Value = RequestKind> {
    prop::sample::select(RequestKind::ALL.to_vec())
}

/// Strategy for URL-ish strings, including characters that need escaping.
pub fn location_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,6}://[a-zA-Z0-9_./ %&=+-]{0,40}").expect("Invalid regex")
}

/// Strategy for responses covering every presence pattern of the optional
/// fields.
pub fn response_strategy() -> impl Strategy<Value = Response> {
    (
        status_strategy(),
        prop::option::of(any::<u64>()),
        prop::option::of(any::<u64>()),
        prop::option::of(location_strategy()),
        any::<bool>(),
        prop::option::of(location_strategy()),
    )
        .prop_map(|(status, offset, build_time, location, split, vip)| {
            let mut params = ResponseParams::new()
                .with_status(status)
                .with_split_commit(split);
            if let Some(offset) = offset {
                params = params.with_offset(offset);
            }
            if let Some(seconds) = build_time {
                params = params.with_build_time_seconds(seconds);
            }
            if let Some(location) = location {
                params = params.with_segment_location(location);
            }
            if let Some(vip) = vip {
                params = params.with_controller_vip_url(vip);
            }
            Response::new(params)
        })
}

/// Strategy for valid segment names.
pub fn segment_name_strategy() -> impl Strategy<Value = LlcSegmentName> {
    (
        prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,15}").expect("Invalid regex"),
        0u32..64,
        0u32..10_000,
        prop::string::string_regex("[0-9]{8}T[0-9]{4}Z").expect("Invalid regex"),
    )
        .prop_filter("table must not contain the separator", |(table, ..)| {
            !table.contains("__") && !table.ends_with('_')
        })
        .prop_map(|(table, partition, sequence, time)| {
            LlcSegmentName::new(table, partition, sequence, time)
        })
}

/// Strategy for request parameters with random optional fields.
pub fn request_params_strategy() -> impl Strategy<Value = RequestParams> {
    (
        prop::string::string_regex("[a-zA-Z0-9_-]{1,20}").expect("Invalid regex"),
        segment_name_strategy(),
        any::<u64>(),
        prop::option::of("[ -~]{0,30}"),
        prop::option::of(any::<u64>()),
        prop::option::of(any::<u64>()),
        prop::option::of(location_strategy()),
    )
        .prop_map(|(instance, name, offset, reason, extra, rows, location)| {
            let mut params = RequestParams::new(instance, name.to_string(), offset);
            params.reason = reason;
            params.extra_time_sec = extra;
            params.row_count = rows;
            params.segment_location = location;
            params
        })
}

/// Strategy for complete requests; uploads carry a non-empty body.
pub fn completion_request_strategy() -> impl Strategy<Value = CompletionRequest> {
    (
        request_kind_strategy(),
        request_params_strategy(),
        prop::collection::vec(any::<u8>(), 1..256),
    )
        .prop_map(|(kind, params, body)| match kind {
            RequestKind::SegmentUpload => CompletionRequest::upload(params, body),
            kind => CompletionRequest::new(kind, params),
        })
}
