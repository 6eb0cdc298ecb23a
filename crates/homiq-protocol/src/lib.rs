//! Homiq Protocol Library
//!
//! This crate provides parsing and encoding for the Homiq home-automation
//! bus protocol as it appears on the TCP side of an RS-485 bridge:
//!
//! - **Frame codec**: `<;CMD;VAL;SRC;DST;ID;TYPE;CRC;>\r\n` parsing and serialization
//! - **Checksum**: bit-serial CRC-8, polynomial `0x18`, initial value `0`
//! - **Stream de-framing**: reassembles lines from arbitrary TCP chunks
//!
//! # Example
//!
//! ```rust
//! use homiq_protocol::{parse_frame, FrameBuffer, FrameType};
//!
//! let mut buffer = FrameBuffer::new();
//! let lines = buffer.push(b"garbage\n<;HB;1;0;0;1;s;1;>\r\n");
//! assert_eq!(lines.len(), 1);
//!
//! let parsed = parse_frame(&lines[0]).unwrap();
//! assert!(parsed.valid);
//!
//! let ack = parsed.frame.ack(Some("1"));
//! assert_eq!(ack.frame_type, FrameType::Ack);
//! assert_eq!(ack.serialize(true), "<;HB;1;0;0;1;a;32;>\r\n");
//! ```

pub mod buffer;
pub mod crc;
pub mod error;
pub mod frame;

pub use buffer::FrameBuffer;
pub use crc::{crc8, crc8_str, frame_crc};
pub use error::{FrameError, ParseError};
pub use frame::{
    parse_frame, serialize_frame, try_parse_frame, Frame, FrameId, FrameType, ParsedFrame,
    PROGRAMMING_CMD,
};
