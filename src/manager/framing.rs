// ABOUTME: Byte-stream line framing for child process output.
// ABOUTME: Growable buffer with an index-based newline scan.

use bytes::BytesMut;

/// Frames a continuous byte stream into discrete lines.
///
/// Chunks are appended to a growable buffer; complete lines are split off
/// and any trailing partial line is retained for the next chunk. The scan
/// offset remembers how far the retained tail has already been searched, so
/// bursts never rescan bytes that are known newline-free.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: BytesMut,
    scan_from: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line completed by it, in arrival
    /// order. A trailing `\r` is stripped from each line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        loop {
            let Some(rel) = self.buf[self.scan_from..].iter().position(|&b| b == b'\n') else {
                self.scan_from = self.buf.len();
                break;
            };
            let end = self.scan_from + rel;
            let line = self.buf.split_to(end + 1);
            self.scan_from = 0;
            let mut line = &line[..line.len() - 1];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
        }
        lines
    }

    /// Bytes of an incomplete trailing line currently held.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.scan_from = 0;
    }
}
