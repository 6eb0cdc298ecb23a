//! Stream de-framer
//!
//! TCP delivers bytes in arbitrary chunks. [`FrameBuffer`] accumulates them,
//! splits on `\n`, strips a trailing `\r` and yields every line that looks
//! like a frame (`<` ... `>`). Anything else is line noise and is dropped
//! without complaint. A trailing partial line stays buffered until the rest
//! arrives.

use tracing::{debug, warn};

/// Maximum length of a pending partial line before it is treated as noise
const MAX_LINE_LEN: usize = 1024;

/// Per-connection accumulating line buffer
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
    discarded: u64,
}

impl FrameBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(128),
            discarded: 0,
        }
    }

    /// Append raw bytes
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // A peer that never sends a newline must not grow the buffer forever
        if self.buffer.len() > MAX_LINE_LEN * 4 && !self.buffer.contains(&b'\n') {
            warn!(
                "Discarding {} bytes of unterminated input",
                self.buffer.len() - MAX_LINE_LEN
            );
            let start = self.buffer.len() - MAX_LINE_LEN;
            self.buffer.drain(..start);
            self.discarded += 1;
        }
    }

    /// Extract the next candidate frame line, skipping noise
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let newline = self.buffer.iter().position(|&b| b == b'\n')?;
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let text = String::from_utf8_lossy(&line);
            if text.starts_with('<') && text.ends_with('>') {
                return Some(text.into_owned());
            }

            if !text.is_empty() {
                debug!("Discarding non-frame line: {:?}", text);
                self.discarded += 1;
            }
        }
    }

    /// Append a chunk and return every complete candidate line it finishes
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.push_bytes(data);
        std::iter::from_fn(|| self.next_line()).collect()
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Number of non-empty lines dropped as noise so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Drop any buffered partial input
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
