//! URL command implementation.

use super::CliError;
use segcommit_protocol::{CompletionRequest, LlcSegmentName, RequestKind, RequestParams};

/// Runs the url command.
pub fn run(
    kind: &str,
    segment: &str,
    offset: u64,
    instance: &str,
    controller: &str,
    reason: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", render(kind, segment, offset, instance, controller, reason)?);
    Ok(())
}

/// Renders the URL a server would POST for the given request.
pub fn render(
    kind: &str,
    segment: &str,
    offset: u64,
    instance: &str,
    controller: &str,
    reason: Option<String>,
) -> Result<String, Box<dyn std::error::Error>> {
    let path = format!("/{}", kind.trim_start_matches('/'));
    let kind = RequestKind::from_path(&path)
        .ok_or_else(|| CliError::UnknownRequestKind(kind.to_string()))?;
    let name: LlcSegmentName = segment.parse()?;

    let mut params = RequestParams::new(instance, name.to_string(), offset);
    params.reason = reason;
    Ok(CompletionRequest::new(kind, params).url(controller))
}
