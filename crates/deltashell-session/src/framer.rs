//! Sentinel-delimited framing of interpreter output.

use thiserror::Error;

/// Framer error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramerError {
    #[error("Output buffer exceeded {limit} bytes without a sentinel")]
    Overflow { limit: usize },
    #[error("Sentinel must not be empty")]
    EmptySentinel,
}

/// Splits an arbitrarily chunked byte stream into sentinel-terminated frames.
///
/// Bytes are buffered until the sentinel appears; everything before it is
/// one frame, everything after it stays buffered for the next one. The
/// search works on raw bytes so a multi-byte character or the sentinel
/// itself may straddle chunk boundaries.
#[derive(Debug)]
pub struct OutputFramer {
    sentinel: Vec<u8>,
    buffer: Vec<u8>,
    /// Offset before which no sentinel can start.
    scan_from: usize,
    max_buffer_bytes: usize,
}

impl OutputFramer {
    /// Create a framer for the given sentinel.
    ///
    /// # Errors
    /// Returns `FramerError::EmptySentinel` if `sentinel` is empty.
    pub fn new(sentinel: &str, max_buffer_bytes: usize) -> Result<Self, FramerError> {
        if sentinel.is_empty() {
            return Err(FramerError::EmptySentinel);
        }
        Ok(Self {
            sentinel: sentinel.as_bytes().to_vec(),
            buffer: Vec::new(),
            scan_from: 0,
            max_buffer_bytes,
        })
    }

    /// Append a chunk and return every frame it completes, in order.
    ///
    /// Frames are decoded lossily and trimmed of surrounding whitespace.
    ///
    /// # Errors
    /// Returns `FramerError::Overflow` if the chunk completed no frame and the
    /// unterminated buffer now exceeds the limit. A chunk that completes
    /// frames always returns them; an oversized tail is reported on the next
    /// push.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, FramerError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.find_sentinel() {
            let prefix = &self.buffer[..pos];
            frames.push(String::from_utf8_lossy(prefix).trim().to_string());
            self.buffer.drain(..pos + self.sentinel.len());
            self.scan_from = 0;
        }

        // A partial sentinel may sit at the very end; rescan only that tail.
        self.scan_from = self
            .buffer
            .len()
            .saturating_sub(self.sentinel.len() - 1);

        if frames.is_empty() && self.buffer.len() > self.max_buffer_bytes {
            return Err(FramerError::Overflow {
                limit: self.max_buffer_bytes,
            });
        }

        Ok(frames)
    }

    /// Bytes buffered since the last frame boundary.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
    }

    fn find_sentinel(&self) -> Option<usize> {
        let haystack = self.buffer.get(self.scan_from..)?;
        haystack
            .windows(self.sentinel.len())
            .position(|window| window == self.sentinel.as_slice())
            .map(|offset| self.scan_from + offset)
    }
}
