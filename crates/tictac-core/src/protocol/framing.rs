//! Newline framing for the text protocol.
//!
//! # Why a framer is needed
//!
//! TCP is a stream protocol.  A single `read()` may return half a line, or
//! several lines at once.  [`LineFramer`] accumulates bytes across reads and
//! hands out complete lines one at a time, in arrival order:
//!
//! ```text
//! read #1: "ROLE X\nMO"      → yields "ROLE X"; keeps "MO"
//! read #2: "VE 1 1\n\nWIN\n" → yields "MOVE 1 1", then "WIN" (empty line dropped)
//! ```
//!
//! Lines are decoded as UTF-8 (invalid sequences are replaced, not rejected)
//! and trimmed, which also strips a trailing `\r` from CRLF peers.

use tracing::trace;

/// Record delimiter on the wire.
pub const DELIMITER: u8 = b'\n';

/// Reassembles newline-delimited lines from arbitrary byte chunks.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    /// Creates an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes to the internal buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete, non-empty line.
    ///
    /// Returns `None` when the buffer holds no further delimiter.  Bytes after
    /// the last delimiter stay buffered for the next [`extend`](Self::extend).
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let end = self.buf.iter().position(|&b| b == DELIMITER)?;
            let raw: Vec<u8> = self.buf.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..end]).trim().to_string();
            if line.is_empty() {
                trace!("discarding empty line");
                continue;
            }
            return Some(line);
        }
    }

    /// Appends `bytes` and drains every complete line, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.extend(bytes);
        std::iter::from_fn(|| self.next_line()).collect()
    }

    /// Number of buffered bytes not yet forming a complete line.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

/// Appends the record delimiter to `line`, producing the bytes to write.
pub fn frame_line(line: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(DELIMITER);
    bytes
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_line() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"WIN\n"), vec!["WIN"]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_partial_line_is_buffered_until_delimiter() {
        // Arrange
        let mut framer = LineFramer::new();

        // Act
        let first = framer.push(b"MOVE 1");
        let second = framer.push(b" 2\n");

        // Assert
        assert!(first.is_empty());
        assert_eq!(second, vec!["MOVE 1 2"]);
    }

    #[test]
    fn test_multiple_lines_in_one_read_are_yielded_in_order() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"ROLE X\nSTART O\nMOVE 0 0\n");
        assert_eq!(lines, vec!["ROLE X", "START O", "MOVE 0 0"]);
    }

    #[test]
    fn test_empty_lines_are_discarded() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"\n\n  \nREMATCH\n\n");
        assert_eq!(lines, vec!["REMATCH"]);
    }

    #[test]
    fn test_crlf_is_tolerated() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"RESET\r\n"), vec!["RESET"]);
    }

    #[test]
    fn test_trailing_partial_line_stays_pending() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"WIN\nREM");
        assert_eq!(lines, vec!["WIN"]);
        assert_eq!(framer.pending_len(), 3);
        assert_eq!(framer.push(b"ATCH\n"), vec!["REMATCH"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_rejected() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"WIN\xFF\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("WIN"));
    }

    #[test]
    fn test_frame_line_appends_delimiter() {
        assert_eq!(frame_line("MOVE 2 2"), b"MOVE 2 2\n".to_vec());
    }
}
