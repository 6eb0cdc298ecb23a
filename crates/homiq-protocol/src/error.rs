//! Error types for Homiq frame parsing and construction

use thiserror::Error;

/// Reasons a line of text is rejected as a frame
///
/// A rejected line is line noise: the caller discards it without replying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line does not start with `<` and end with `>`
    #[error("missing frame markers")]
    MissingMarkers,

    /// Splitting on `;` did not give exactly 9 fields
    #[error("expected 9 fields, got {0}")]
    FieldCount(usize),

    /// First or last field is not the bare bracket marker
    #[error("malformed bracket fields")]
    MalformedBrackets,

    /// TYPE field is neither `s` nor `a`
    #[error("invalid frame type: {0:?}")]
    InvalidType(String),

    /// ID field is not a decimal integer
    #[error("invalid frame id: {0:?}")]
    InvalidId(String),

    /// ID field parsed but lies outside 1..=511
    #[error("frame id {0} out of range 1..=511")]
    IdOutOfRange(i64),

    /// CRC field is not a decimal integer
    #[error("invalid checksum field: {0:?}")]
    InvalidCrc(String),
}

/// Errors raised when building a frame in code
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Sequence id outside 1..=511
    #[error("frame id {0} out of range 1..=511")]
    IdOutOfRange(u32),

    /// Unknown frame type letter
    #[error("invalid frame type: {0:?}")]
    InvalidType(String),
}
