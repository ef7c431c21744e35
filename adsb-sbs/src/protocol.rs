//! Line framing for the BaseStation TCP stream.
//!
//! Lines end in `\r\n`. dump1090 also sends a bare `\r\n` heartbeat when
//! there is no traffic; those produce no line.

use tracing::warn;

/// SBS end-of-message delimiter.
pub const DELIMITER: &[u8] = b"\r\n";

/// Longest partial line kept while waiting for a delimiter.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Accumulates stream chunks and splits out complete lines.
#[derive(Debug, Default)]
pub struct SbsFramer {
    buf: Vec<u8>,
    /// Set after an oversized partial line was thrown away; the rest of
    /// that line is dropped when its delimiter arrives.
    discarding: bool,
}

impl SbsFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete, non-empty line in it,
    /// delimiter removed. A trailing partial line stays buffered.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        // the buffer holds no delimiter, except one split across chunks
        let mut search_from = self.buf.len().saturating_sub(DELIMITER.len() - 1);
        self.buf.extend_from_slice(data);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = find_delimiter(&self.buf[search_from..]) {
            let end = search_from + pos;
            if self.discarding {
                self.discarding = false;
            } else if end > start {
                lines.push(self.buf[start..end].to_vec());
            }
            start = end + DELIMITER.len();
            search_from = start;
        }
        self.buf.drain(..start);

        if self.buf.len() > MAX_LINE_LEN {
            warn!("Discarding {} bytes with no line delimiter", self.buf.len());
            let split_delimiter = self.buf.last() == Some(&DELIMITER[0]);
            self.clear();
            if split_delimiter {
                self.buf.push(DELIMITER[0]);
            }
            self.discarding = true;
        }
        lines
    }

    /// Bytes held back waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

fn find_delimiter(data: &[u8]) -> Option<usize> {
    data.windows(DELIMITER.len()).position(|w| w == DELIMITER)
}

/// Copy `msg` into a buffer ready for sending, optionally terminated.
pub fn frame(msg: &[u8], add_delimiter: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(msg.len() + DELIMITER.len());
    out.extend_from_slice(msg);
    if add_delimiter {
        out.extend_from_slice(DELIMITER);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &[u8] = b"MSG,8,1,1,7C79B7,1,2017/03/25,10:41:45.013,2017/03/25,10:41:45.031,,,,,,,,,,,,0";

    #[test]
    fn test_single_line() {
        let mut framer = SbsFramer::new();
        let lines = framer.push(&frame(LINE, true));
        assert_eq!(lines, vec![LINE.to_vec()]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_partial_chunks() {
        let mut framer = SbsFramer::new();
        let data = frame(LINE, true);
        let (a, b) = data.split_at(20);

        assert!(framer.push(a).is_empty());
        assert_eq!(framer.pending(), 20);
        assert_eq!(framer.push(b), vec![LINE.to_vec()]);
    }

    #[test]
    fn test_delimiter_split_across_chunks() {
        let mut framer = SbsFramer::new();
        let mut first = LINE.to_vec();
        first.push(b'\r');
        assert!(framer.push(&first).is_empty());
        assert_eq!(framer.push(b"\n"), vec![LINE.to_vec()]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut framer = SbsFramer::new();
        let mut data = frame(LINE, true);
        data.extend(frame(LINE, true));

        let lines: Vec<_> = data.iter().flat_map(|b| framer.push(&[*b])).collect();
        assert_eq!(lines, vec![LINE.to_vec(), LINE.to_vec()]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_oversized_line_discarded() {
        let mut framer = SbsFramer::new();
        assert!(framer.push(&vec![b'A'; MAX_LINE_LEN + 1]).is_empty());
        assert_eq!(framer.pending(), 0);

        let mut rest = b"AAAA\r\n".to_vec();
        rest.extend(frame(LINE, true));
        assert_eq!(framer.push(&rest), vec![LINE.to_vec()]);
    }

    #[test]
    fn test_heartbeats_dropped() {
        let mut framer = SbsFramer::new();
        let mut data = b"\r\n\r\n".to_vec();
        data.extend(frame(LINE, true));
        data.extend_from_slice(b"\r\n");
        data.extend(frame(LINE, true));

        let lines = framer.push(&data);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.as_slice() == LINE));
    }

    #[test]
    fn test_frame_without_delimiter() {
        assert_eq!(frame(LINE, false), LINE.to_vec());
        assert!(frame(LINE, true).ends_with(DELIMITER));
    }
}
