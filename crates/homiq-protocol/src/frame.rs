//! Homiq frame model, parser and serializer
//!
//! Wire format: `<;CMD;VAL;SRC;DST;ID;TYPE;CRC;>\r\n`
//!
//! - `ID` is a rolling decimal sequence number in `1..=511`
//! - `TYPE` is `s` (send) or `a` (ack)
//! - `CRC` is the decimal checksum described in [`crate::crc`]
//!
//! `PG` (programming mode) frames are accepted regardless of checksum.

use std::fmt;

use crate::crc::frame_crc;
use crate::error::{FrameError, ParseError};

/// Command that bypasses checksum validation
pub const PROGRAMMING_CMD: &str = "PG";

/// Wire terminator appended by the serializer
pub const FRAME_TERMINATOR: &str = "\r\n";

/// Number of `;`-separated fields, including the bracket markers
const FIELD_COUNT: usize = 9;

/// Rolling per-source sequence number, always within `1..=511`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub struct FrameId(u16);

impl FrameId {
    /// Lowest valid id
    pub const MIN: FrameId = FrameId(1);
    /// Highest valid id; the sequence wraps back to [`FrameId::MIN`] after it
    pub const MAX: FrameId = FrameId(511);

    /// Create an id, rejecting values outside `1..=511`
    pub fn new(id: u16) -> Result<Self, FrameError> {
        if (Self::MIN.0..=Self::MAX.0).contains(&id) {
            Ok(Self(id))
        } else {
            Err(FrameError::IdOutOfRange(id as u32))
        }
    }

    /// Get the raw value
    pub fn get(self) -> u16 {
        self.0
    }

    /// The id following this one, wrapping `511 -> 1`
    pub fn next(self) -> Self {
        Self(self.0 % Self::MAX.0 + 1)
    }
}

impl TryFrom<u16> for FrameId {
    type Error = FrameError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<FrameId> for u16 {
    fn from(id: FrameId) -> Self {
        id.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frame direction marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FrameType {
    /// `s`: a command or unsolicited report
    Send,
    /// `a`: acknowledgement of a send frame
    Ack,
}

impl FrameType {
    /// Wire letter for this type
    pub fn as_char(self) -> char {
        match self {
            FrameType::Send => 's',
            FrameType::Ack => 'a',
        }
    }

    /// Parse the wire letter
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "s" => Some(FrameType::Send),
            "a" => Some(FrameType::Ack),
            _ => None,
        }
    }
}

impl TryFrom<&str> for FrameType {
    type Error = FrameError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::from_wire(s).ok_or_else(|| FrameError::InvalidType(s.to_string()))
    }
}

/// One protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Frame {
    /// Command, e.g. `I.3`, `O.0`, `HB`, `ID.0`, `PG`
    pub cmd: String,
    /// Value; numeric, float or free text depending on the command
    pub val: String,
    /// Source node address
    pub src: String,
    /// Destination node address
    pub dst: String,
    /// Sequence id
    pub id: FrameId,
    /// Send or ack
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub frame_type: FrameType,
    /// Checksum as carried on the wire
    pub crc: u8,
}

impl Frame {
    /// Create a frame with a freshly computed checksum
    pub fn new(
        cmd: impl Into<String>,
        val: impl Into<String>,
        src: impl Into<String>,
        dst: impl Into<String>,
        id: FrameId,
        frame_type: FrameType,
    ) -> Self {
        let mut frame = Self {
            cmd: cmd.into(),
            val: val.into(),
            src: src.into(),
            dst: dst.into(),
            id,
            frame_type,
            crc: 0,
        };
        frame.crc = frame.compute_crc();
        frame
    }

    /// Create a `send` frame
    pub fn send(
        cmd: impl Into<String>,
        val: impl Into<String>,
        src: impl Into<String>,
        dst: impl Into<String>,
        id: FrameId,
    ) -> Self {
        Self::new(cmd, val, src, dst, id, FrameType::Send)
    }

    /// Build the acknowledgement for this frame
    ///
    /// Swaps `src`/`dst`, keeps `cmd` and `id`, and echoes `val` unless a
    /// response value is given.
    pub fn ack(&self, response_val: Option<&str>) -> Self {
        Self::new(
            self.cmd.clone(),
            response_val.unwrap_or(&self.val),
            self.dst.clone(),
            self.src.clone(),
            self.id,
            FrameType::Ack,
        )
    }

    /// Checksum over this frame's fields
    pub fn compute_crc(&self) -> u8 {
        frame_crc(
            &self.cmd,
            &self.val,
            &self.src,
            &self.dst,
            self.id.get(),
            self.frame_type.as_char(),
        )
    }

    /// Whether the carried checksum matches the fields
    pub fn crc_matches(&self) -> bool {
        self.crc == self.compute_crc()
    }

    /// Serialize to wire format, CRLF terminated
    ///
    /// With `recalculate_crc` the checksum is derived from the fields,
    /// otherwise the carried `crc` is written as is.
    pub fn serialize(&self, recalculate_crc: bool) -> String {
        let crc = if recalculate_crc {
            self.compute_crc()
        } else {
            self.crc
        };
        format!(
            "<;{};{};{};{};{};{};{};>{}",
            self.cmd,
            self.val,
            self.src,
            self.dst,
            self.id,
            self.frame_type.as_char(),
            crc,
            FRAME_TERMINATOR
        )
    }

    /// Encode to wire bytes with a recomputed checksum
    pub fn encode(&self) -> Vec<u8> {
        self.serialize(true).into_bytes()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.serialize(false).trim_end())
    }
}

/// A frame read off the wire, with its source text and checksum verdict
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParsedFrame {
    /// Decoded fields
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub frame: Frame,
    /// Trimmed input text
    pub raw: String,
    /// Checksum matched, or the command is checksum exempt
    pub valid: bool,
}

impl ParsedFrame {
    /// Shorthand for the command
    pub fn cmd(&self) -> &str {
        &self.frame.cmd
    }

    /// Whether this is a `send` frame
    pub fn is_send(&self) -> bool {
        self.frame.frame_type == FrameType::Send
    }
}

/// Parse one line of text into a frame
///
/// Returns `None` for anything that is not a syntactically valid frame; the
/// caller should discard such lines. A frame whose checksum does not match
/// is still returned, flagged `valid == false`.
pub fn parse_frame(raw: &str) -> Option<ParsedFrame> {
    try_parse_frame(raw).ok()
}

/// Parse one line of text, reporting why it was rejected
pub fn try_parse_frame(raw: &str) -> Result<ParsedFrame, ParseError> {
    let trimmed = raw.trim();

    if !trimmed.starts_with('<') || !trimmed.ends_with('>') {
        return Err(ParseError::MissingMarkers);
    }

    let parts: Vec<&str> = trimmed.split(';').collect();
    if parts.len() != FIELD_COUNT {
        return Err(ParseError::FieldCount(parts.len()));
    }
    if parts[0] != "<" || parts[8] != ">" {
        return Err(ParseError::MalformedBrackets);
    }

    let (cmd, val, src, dst) = (parts[1], parts[2], parts[3], parts[4]);
    let (id_str, type_str, crc_str) = (parts[5], parts[6], parts[7]);

    let frame_type = FrameType::from_wire(type_str)
        .ok_or_else(|| ParseError::InvalidType(type_str.to_string()))?;

    let id_num: i64 = id_str
        .parse()
        .map_err(|_| ParseError::InvalidId(id_str.to_string()))?;
    let id = u16::try_from(id_num)
        .ok()
        .and_then(|id| FrameId::new(id).ok())
        .ok_or(ParseError::IdOutOfRange(id_num))?;

    let crc_num: i64 = crc_str
        .parse()
        .map_err(|_| ParseError::InvalidCrc(crc_str.to_string()))?;

    let expected = frame_crc(cmd, val, src, dst, id.get(), frame_type.as_char());
    let valid = cmd == PROGRAMMING_CMD || crc_num == i64::from(expected);

    Ok(ParsedFrame {
        frame: Frame {
            cmd: cmd.to_string(),
            val: val.to_string(),
            src: src.to_string(),
            dst: dst.to_string(),
            id,
            frame_type,
            // Out-of-range checksums are kept modulo 256; `valid` already reflects the mismatch
            crc: (crc_num & 0xFF) as u8,
        },
        raw: trimmed.to_string(),
        valid,
    })
}

/// Serialize a frame to wire format
pub fn serialize_frame(frame: &Frame, recalculate_crc: bool) -> String {
    frame.serialize(recalculate_crc)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn field() -> impl Strategy<Value = String> {
        "[A-Za-z0-9.]{0,6}"
    }

    proptest! {
        #[test]
        fn round_trip_preserves_fields(
            cmd in "[A-Z]{1,3}(\\.[0-9]{1,2})?",
            val in field(),
            src in field(),
            dst in field(),
            raw_id in 1u16..=511,
            ack: bool,
        ) {
            prop_assume!(cmd != PROGRAMMING_CMD);
            let frame_type = if ack { FrameType::Ack } else { FrameType::Send };
            let frame = Frame::new(cmd, val, src, dst, FrameId::new(raw_id).unwrap(), frame_type);

            let parsed = parse_frame(&frame.serialize(true)).unwrap();
            prop_assert!(parsed.valid);
            prop_assert_eq!(parsed.frame, frame);
        }
    }
}
