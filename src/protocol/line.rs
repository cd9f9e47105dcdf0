//! Line splitting for modem output.
//!
//! Modem output is a stream of `\r\n`-terminated lines. The `>` prompt of
//! `AT+CMGS` carries no line ending and simply stays buffered until the next
//! line break arrives.

use bytes::{Buf, BytesMut};

/// Longest line kept while waiting for a terminator.
pub const MAX_LINE_LEN: usize = 4096;

/// Line decoder that handles partial data.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
}

impl LineDecoder {
    /// Creates a new line decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Feeds data into the decoder.
    ///
    /// If the buffer grows past [`MAX_LINE_LEN`] without a line break, the
    /// buffered bytes are discarded.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > MAX_LINE_LEN && !self.buffer.contains(&b'\n') {
            tracing::warn!("discarding {} bytes without line break", self.buffer.len());
            self.buffer.clear();
        }
    }

    /// Returns the next complete, non-empty line with surrounding whitespace
    /// trimmed, or `None` if more data is needed.
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(pos);
            self.buffer.advance(1);
            let line = String::from_utf8_lossy(&raw).trim().to_owned();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
