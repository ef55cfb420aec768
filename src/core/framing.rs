//! CRLF line framing for modem output
//!
//! Framing works on raw bytes; text decoding happens per extracted line, so a
//! malformed UTF-8 sequence can never desynchronize the delimiter search.

use bytes::{Buf, BytesMut};

/// Line delimiter used by AT-command modems
pub const CRLF: &[u8] = b"\r\n";

/// Streaming line decoder that keeps partial data between calls
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: BytesMut,
    /// Prefix of `buffer` already searched without finding a delimiter
    scanned: usize,
}

impl LineFramer {
    /// Create a new framer with an empty buffer
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            scanned: 0,
        }
    }

    /// Append `data` and iterate over the complete lines now available.
    ///
    /// Lines are produced lazily; anything the iterator does not consume stays
    /// buffered and is returned by the next call. Empty lines are skipped.
    pub fn feed(&mut self, data: &[u8]) -> Lines<'_> {
        self.buffer.extend_from_slice(data);
        Lines { framer: self }
    }

    /// Bytes received but not yet terminated by a delimiter
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop buffered partial data
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    fn next_line(&mut self) -> Option<String> {
        loop {
            // Back up one byte in case the CR of a split delimiter was the last one scanned.
            let start = self.scanned.saturating_sub(CRLF.len() - 1);
            let Some(offset) = self.buffer[start..].windows(CRLF.len()).position(|w| w == CRLF) else {
                self.scanned = self.buffer.len();
                return None;
            };
            let line = self.buffer.split_to(start + offset);
            self.buffer.advance(CRLF.len());
            self.scanned = 0;
            if line.is_empty() {
                continue;
            }
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
    }
}

/// Iterator over complete lines, returned by [`LineFramer::feed`]
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(framer: &mut LineFramer, data: &[u8]) -> Vec<String> {
        framer.feed(data).collect()
    }

    #[test]
    fn test_splits_on_crlf() {
        let mut framer = LineFramer::new();
        let lines = collect(&mut framer, b"AT\r\nOK\r\n+CSQ: 21,0\r\npart");
        assert_eq!(lines, vec!["AT", "OK", "+CSQ: 21,0"]);
        assert_eq!(framer.pending(), b"part");
    }

    #[test]
    fn test_empty_lines_skipped() {
        let mut framer = LineFramer::new();
        let lines = collect(&mut framer, b"\r\n\r\nOK\r\n\r\n");
        assert_eq!(lines, vec!["OK"]);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn test_delimiter_split_across_chunks() {
        let mut framer = LineFramer::new();
        assert!(collect(&mut framer, b"OK\r").is_empty());
        assert_eq!(collect(&mut framer, b"\nERROR\r\n"), vec!["OK", "ERROR"]);
    }

    #[test]
    fn test_long_line_is_not_rescanned() {
        let mut framer = LineFramer::new();
        for _ in 0..4096 {
            assert!(collect(&mut framer, b"x").is_empty());
        }
        assert_eq!(framer.scanned, 4096);

        assert!(collect(&mut framer, b"\r").is_empty());
        let lines = collect(&mut framer, b"\nOK\r\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 4096);
        assert_eq!(lines[1], "OK");
        assert_eq!(framer.scanned, 0);
    }

    #[test]
    fn test_lone_cr_or_lf_is_data() {
        let mut framer = LineFramer::new();
        let lines = collect(&mut framer, b"a\rb\nc\r\n");
        assert_eq!(lines, vec!["a\rb\nc"]);
    }

    #[test]
    fn test_chunking_does_not_change_lines() {
        let stream: &[u8] =
            b"AT+CMGF=1\r\r\nOK\r\n\r\n+CMT: \"+123\",,\"25/01/01,00:00:00\"\r\nHello \xE4\xB8\xAD\r\n\r\nOK\r\ntail";

        let mut whole = LineFramer::new();
        let expected = collect(&mut whole, stream);

        for chunk_size in 1..stream.len() {
            let mut framer = LineFramer::new();
            let mut lines = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                lines.extend(framer.feed(chunk));
            }
            assert_eq!(lines, expected, "chunk size {}", chunk_size);
            assert_eq!(framer.pending(), b"tail");
        }
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut framer = LineFramer::new();
        let lines = collect(&mut framer, b"ab\xFF\xFEcd\r\nOK\r\n");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ab"));
        assert!(lines[0].contains('\u{FFFD}'));
        assert!(lines[0].ends_with("cd"));
        assert_eq!(lines[1], "OK");
    }

    #[test]
    fn test_unconsumed_lines_stay_buffered() {
        let mut framer = LineFramer::new();
        let first = framer.feed(b"one\r\ntwo\r\n").next();
        assert_eq!(first.as_deref(), Some("one"));
        assert_eq!(collect(&mut framer, b""), vec!["two"]);

        framer.feed(b"partial");
        framer.clear();
        assert!(framer.pending().is_empty());
    }
}
