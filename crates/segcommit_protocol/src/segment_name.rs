//! Low-level consumer segment names.
//!
//! Segments consumed directly from a stream partition are named
//! `{table}__{partition}__{sequence}__{creationTime}`, e.g.
//! `events__3__17__20240101T0000Z`.

use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

const SEPARATOR: &str = "__";

/// A parsed low-level consumer segment name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LlcSegmentName {
    table: String,
    partition: u32,
    sequence: u32,
    creation_time: String,
}

impl LlcSegmentName {
    /// Creates a segment name from its parts.
    pub fn new(
        table: impl Into<String>,
        partition: u32,
        sequence: u32,
        creation_time: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            partition,
            sequence,
            creation_time: creation_time.into(),
        }
    }

    /// Returns the raw table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the stream partition.
    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Returns the sequence number of this segment within its partition.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Returns the creation time component.
    pub fn creation_time(&self) -> &str {
        &self.creation_time
    }

}

impl fmt::Display for LlcSegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
            self.table, self.partition, self.sequence, self.creation_time
        )
    }
}

impl FromStr for LlcSegmentName {
    type Err = ProtocolError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ProtocolError::InvalidSegmentName {
            name: name.to_string(),
            reason,
        };

        let parts: Vec<&str> = name.split(SEPARATOR).collect();
        let [table, partition, sequence, creation_time] = parts.as_slice() else {
            return Err(invalid("expected four components"));
        };

        if table.is_empty() || creation_time.is_empty() {
            return Err(invalid("empty component"));
        }
        if name.contains('/') {
            return Err(invalid("contains '/'"));
        }

        let partition = partition
            .parse()
            .map_err(|_| invalid("partition is not a number"))?;
        let sequence = sequence
            .parse()
            .map_err(|_| invalid("sequence is not a number"))?;

        Ok(Self::new(*table, partition, sequence, *creation_time))
    }
}
