//! Server-sent event framing for chunked chat streams
//!
//! [`SseReader`] is a small buffered state machine: raw transport chunks go in
//! through [`SseReader::feed`], whole `data:` payloads come out. Chunk
//! boundaries may fall anywhere, including inside a multi-byte character, so
//! the carry-over is kept as bytes and only complete records are decoded.

use serde_json::Value;

/// Payload that marks the end of the stream
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

/// One significant line decoded from the stream
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A `data:` payload that parsed as JSON
    Data(Value),
    /// The terminal sentinel
    Done,
}

/// Reassembles server-sent event records from arbitrarily split chunks.
#[derive(Debug, Default)]
pub struct SseReader {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a record separator
    scanned: usize,
    done: bool,
    skipped: usize,
}

impl SseReader {
    /// Create an empty reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame completed by it.
    ///
    /// Once the sentinel has been seen the reader is closed: anything still
    /// buffered is dropped and later chunks are ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }

        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        while let Some(pos) = find_record_separator(&self.buffer, self.scanned) {
            let record: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            self.scanned = 0;
            if self.parse_record(&record[..pos], &mut frames) {
                self.close();
                return frames;
            }
        }
        // The last byte may be the first half of a separator
        self.scanned = self.buffer.len().saturating_sub(1);

        frames
    }

    /// Give the residual carry-over one last parse attempt and close the reader.
    ///
    /// Called when the transport is exhausted or fails before the sentinel.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }

        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() {
            self.parse_record(&rest, &mut frames);
        }
        self.close();
        frames
    }

    /// Whether the sentinel was seen or the reader was finished
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of payloads skipped because they were not valid JSON
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn close(&mut self) {
        self.done = true;
        self.buffer.clear();
        self.scanned = 0;
    }

    /// Parse one record into `frames`. Returns `true` on the sentinel.
    fn parse_record(&mut self, record: &[u8], frames: &mut Vec<SseFrame>) -> bool {
        let text = String::from_utf8_lossy(record);
        for line in text.lines() {
            let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                continue;
            };
            let payload = payload.trim();
            if payload.is_empty() {
                continue;
            }
            if payload == DONE_SENTINEL {
                frames.push(SseFrame::Done);
                return true;
            }
            match serde_json::from_str::<Value>(payload) {
                Ok(value) => frames.push(SseFrame::Data(value)),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!("Skipping malformed stream payload ({}): {}", e, payload);
                }
            }
        }
        false
    }
}

/// Position of the first blank-line separator at or after `from`.
fn find_record_separator(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STREAM: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n\n",
        "event: message\n",
        "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"思考…\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"，世界\"}}]}\n\n",
        "data: [DONE]\n\n",
    );

    fn read_all(chunks: &[&[u8]]) -> Vec<SseFrame> {
        let mut reader = SseReader::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(reader.feed(chunk));
        }
        frames.extend(reader.finish());
        frames
    }

    #[test]
    fn test_single_chunk() {
        let frames = read_all(&[STREAM.as_bytes()]);
        assert_eq!(frames.len(), 4);
        assert_eq!(
            frames[0],
            SseFrame::Data(json!({"choices":[{"delta":{"content":"你好"}}]}))
        );
        assert_eq!(frames[3], SseFrame::Done);
    }

    #[test]
    fn test_split_at_every_byte_boundary() {
        let bytes = STREAM.as_bytes();
        let expected = read_all(&[bytes]);
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(read_all(&[a, b]), expected, "split at byte {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let bytes = STREAM.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(read_all(&chunks), read_all(&[bytes]));
    }

    #[test]
    fn test_three_way_splits() {
        let bytes = STREAM.as_bytes();
        let expected = read_all(&[bytes]);
        for i in (0..bytes.len()).step_by(7) {
            for j in (i..bytes.len()).step_by(5) {
                let chunks = [&bytes[..i], &bytes[i..j], &bytes[j..]];
                assert_eq!(read_all(&chunks), expected, "splits at {} and {}", i, j);
            }
        }
    }

    #[test]
    fn test_malformed_payload_is_skipped() {
        let input = concat!(
            "data: {\"n\":1}\n\n",
            "data: {not json\n\n",
            "data: {\"n\":2}\n\n",
        );
        let mut reader = SseReader::new();
        let frames = reader.feed(input.as_bytes());
        assert_eq!(
            frames,
            vec![SseFrame::Data(json!({"n":1})), SseFrame::Data(json!({"n":2}))]
        );
        assert_eq!(reader.skipped(), 1);
        assert!(!reader.is_done());
    }

    #[test]
    fn test_done_stops_reading_buffered_records() {
        let input = "data: {\"n\":1}\n\ndata: [DONE]\n\ndata: {\"n\":2}\n\n";
        let mut reader = SseReader::new();
        let frames = reader.feed(input.as_bytes());
        assert_eq!(frames, vec![SseFrame::Data(json!({"n":1})), SseFrame::Done]);
        assert!(reader.is_done());
        assert!(reader.feed(b"data: {\"n\":3}\n\n").is_empty());
        assert!(reader.finish().is_empty());
    }

    #[test]
    fn test_partial_record_is_carried_over() {
        let mut reader = SseReader::new();
        assert!(reader.feed(b"data: {\"n\":").is_empty());
        assert_eq!(reader.feed(b"1}\n\n"), vec![SseFrame::Data(json!({"n":1}))]);
    }

    #[test]
    fn test_separator_search_from_offset() {
        assert_eq!(find_record_separator(b"ab\n\ncd", 0), Some(2));
        assert_eq!(find_record_separator(b"ab\n\ncd", 2), Some(2));
        assert_eq!(find_record_separator(b"\n\nab\n", 2), None);
        assert_eq!(find_record_separator(b"ab", 5), None);
    }

    #[test]
    fn test_scan_resumes_near_end_of_carry_over() {
        let mut reader = SseReader::new();
        let payload = format!("data: {{\"text\":\"{}\"}}", "x".repeat(4096));
        for chunk in payload.as_bytes().chunks(16) {
            assert!(reader.feed(chunk).is_empty());
            assert_eq!(reader.scanned, reader.buffer.len() - 1);
        }

        // separator split across two chunks
        assert!(reader.feed(b"\n").is_empty());
        let frames = reader.feed(b"\n");
        assert_eq!(frames, vec![SseFrame::Data(json!({"text": "x".repeat(4096)}))]);
        assert!(reader.buffer.is_empty());
        assert_eq!(reader.scanned, 0);
    }

    #[test]
    fn test_finish_parses_residual() {
        let mut reader = SseReader::new();
        assert!(reader.feed(b"data: {\"n\":1}").is_empty());
        assert_eq!(reader.finish(), vec![SseFrame::Data(json!({"n":1}))]);
        assert!(reader.is_done());
    }

    #[test]
    fn test_crlf_framing() {
        let input = "data: {\"n\":1}\r\n\r\ndata: [DONE]\r\n\r\n";
        let frames = read_all(&[input.as_bytes()]);
        assert_eq!(frames, vec![SseFrame::Data(json!({"n":1})), SseFrame::Done]);
    }

    #[test]
    fn test_multiple_data_lines_in_one_record() {
        let input = "data: {\"n\":1}\ndata: {\"n\":2}\n\n";
        let frames = read_all(&[input.as_bytes()]);
        assert_eq!(
            frames,
            vec![SseFrame::Data(json!({"n":1})), SseFrame::Data(json!({"n":2}))]
        );
    }

    #[test]
    fn test_prefix_without_space() {
        let frames = read_all(&["data:{\"n\":1}\n\n".as_bytes()]);
        assert_eq!(frames, vec![SseFrame::Data(json!({"n":1}))]);
    }
}
