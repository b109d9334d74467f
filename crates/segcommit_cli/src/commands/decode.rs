//! Decode command implementation.

use super::Format;
use segcommit_protocol::Response;
use serde::Serialize;
use std::io::Read;
use std::path::Path;

/// A decoded response, flattened for display.
#[derive(Debug, Serialize)]
pub struct DecodeResult {
    /// Status name.
    pub status: String,
    /// Offset, when present.
    pub offset: Option<u64>,
    /// Build-time budget in seconds, when present.
    pub build_time_seconds: Option<u64>,
    /// Segment location, when present.
    pub segment_location: Option<String>,
    /// Whether the split commit flow applies.
    pub split_commit: bool,
    /// Controller VIP URL, when present.
    pub controller_vip_url: Option<String>,
    /// Whether the status carries every field it requires.
    pub well_formed: bool,
    /// Whether a server would retry after this status.
    pub retryable: bool,
}

impl From<&Response> for DecodeResult {
    fn from(response: &Response) -> Self {
        Self {
            status: response.status().to_string(),
            offset: response.offset(),
            build_time_seconds: response.build_time_seconds(),
            segment_location: response.segment_location().map(str::to_string),
            split_commit: response.is_split_commit(),
            controller_vip_url: response.controller_vip_url().map(str::to_string),
            well_formed: response.is_well_formed(),
            retryable: response.status().is_retryable(),
        }
    }
}

/// Runs the decode command.
pub fn run(file: Option<&Path>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let format = Format::parse(format)?;

    let bytes = match file {
        Some(path) => std::fs::read(path)?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let result = decode(&bytes)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text(&result),
    }

    Ok(())
}

/// Decodes `bytes` into a displayable result.
pub fn decode(bytes: &[u8]) -> Result<DecodeResult, segcommit_protocol::ProtocolError> {
    let response = Response::decode(bytes)?;
    Ok(DecodeResult::from(&response))
}

fn print_text(result: &DecodeResult) {
    fn show<T: std::fmt::Display>(value: &Option<T>) -> String {
        value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    println!("Status:           {}", result.status);
    println!("Offset:           {}", show(&result.offset));
    println!("Build time (s):   {}", show(&result.build_time_seconds));
    println!("Segment location: {}", show(&result.segment_location));
    println!("Split commit:     {}", result.split_commit);
    println!("Controller VIP:   {}", show(&result.controller_vip_url));
    println!("Well formed:      {}", result.well_formed);
    println!("Retryable:        {}", result.retryable);
}
