//! CLI command implementations.

pub mod decode;
pub mod simulate;
pub mod url;

use thiserror::Error;

/// Errors raised by the CLI itself, as opposed to the libraries it drives.
#[derive(Debug, Error)]
pub enum CliError {
    /// Unrecognized output format.
    #[error("unknown output format '{0}' (expected text or json)")]
    UnknownFormat(String),

    /// Unrecognized request kind.
    #[error("unknown request kind '{0}'")]
    UnknownRequestKind(String),

    /// A simulation parameter is out of range.
    #[error("invalid simulation: {0}")]
    InvalidSimulation(&'static str),
}

/// Output format shared by the commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses a `--format` value.
    pub fn parse(format: &str) -> Result<Self, CliError> {
        match format {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}
