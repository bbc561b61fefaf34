//! SSE re-framing plumbing.
//!
//! Upstream byte streams are split into lines by [`SseLineBuffer`]; a
//! [`LineTransform`] turns each line into zero or more complete SSE frames
//! for the client. The transforms themselves are plain state structs, so
//! tests can drive them line by line without a real stream.

use crate::error::Result;
use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;

/// Safety valve for a single buffered line. A well-formed SSE line never gets
/// anywhere near this; hitting it means the upstream is not SSE at all.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

pub type ByteStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>>;

/// Accumulates raw bytes and yields complete lines.
///
/// The trailing fragment after the last newline stays buffered until the next
/// chunk (or [`SseLineBuffer::flush`] at end of stream), which is what makes
/// output independent of how the bytes were chunked. Bytes are buffered raw
/// and decoded per complete line, so a multi-byte character straddling a
/// chunk boundary survives intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buf: Vec<u8>,
    overflowed: bool,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every complete line it finishes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            let mut line = &self.buf[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        self.buf.drain(..start);

        if self.buf.len() > MAX_LINE_BYTES {
            // Emit the oversized fragment as a line rather than growing forever.
            self.overflowed = true;
            let rest = std::mem::take(&mut self.buf);
            lines.push(String::from_utf8_lossy(&rest).into_owned());
        }

        lines
    }

    /// Drain any trailing partial line at end of stream.
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            let rest = std::mem::take(&mut self.buf);
            Some(String::from_utf8_lossy(&rest).into_owned())
        }
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }
}

/// A per-line SSE re-framer. Emitted strings must each be a complete SSE
/// frame (terminated by a blank line).
pub trait LineTransform: Send {
    /// Process one upstream line (without its newline).
    fn on_line(&mut self, line: &str, out: &mut Vec<String>);

    /// Called once when the upstream ends, to flush terminal events.
    fn on_end(&mut self, out: &mut Vec<String>);
}

/// Strip the `data:` field prefix from an SSE line, if present.
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
        .map(str::trim)
}

/// Format a named SSE frame.
pub fn frame(event: &str, data: &str) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

/// Format a data-only SSE frame.
pub fn data_frame(data: &str) -> String {
    format!("data: {data}\n\n")
}

/// Drive a [`LineTransform`] over an upstream byte stream, producing the
/// re-framed SSE bytes for the client.
pub fn reframe_stream<T>(upstream: ByteStream, mut transform: T) -> ByteStream
where
    T: LineTransform + 'static,
{
    let stream = async_stream::stream! {
        let mut buffer = SseLineBuffer::new();
        let mut out = Vec::new();

        tokio::pin!(upstream);

        while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    // Flush what we have, then surface the error.
                    if let Some(line) = buffer.flush() {
                        transform.on_line(&line, &mut out);
                    }
                    transform.on_end(&mut out);
                    for frame in out.drain(..) {
                        yield Ok(Bytes::from(frame));
                    }
                    yield Err(e);
                    return;
                }
            };

            for line in buffer.push(&chunk) {
                transform.on_line(&line, &mut out);
            }
            for frame in out.drain(..) {
                yield Ok(Bytes::from(frame));
            }
        }

        if let Some(line) = buffer.flush() {
            transform.on_line(&line, &mut out);
        }
        transform.on_end(&mut out);
        for frame in out.drain(..) {
            yield Ok(Bytes::from(frame));
        }
    };

    Box::pin(stream)
}

/// Collect a frame stream into a single string. Test helper for comparing
/// chunking-independent output.
pub async fn collect_frames(stream: ByteStream) -> Result<String> {
    let mut out = String::new();
    let mut stream = stream;
    while let Some(chunk) = stream.next().await {
        out.push_str(&String::from_utf8_lossy(&chunk?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_splits_on_newline() {
        let mut buf = SseLineBuffer::new();
        let lines = buf.push(b"data: a\ndata: b\npartial");
        assert_eq!(lines, vec!["data: a", "data: b"]);
        assert_eq!(buf.flush(), Some("partial".to_string()));
        assert_eq!(buf.flush(), None);
    }

    #[test]
    fn test_line_buffer_handles_byte_at_a_time() {
        let mut whole = SseLineBuffer::new();
        let whole_lines = whole.push(b"data: hello\n\ndata: [DONE]\n");

        let mut split = SseLineBuffer::new();
        let mut split_lines = Vec::new();
        for b in b"data: hello\n\ndata: [DONE]\n" {
            split_lines.extend(split.push(&[*b]));
        }

        assert_eq!(whole_lines, split_lines);
    }

    #[test]
    fn test_line_buffer_multibyte_chars_split_across_chunks() {
        let payload = "data: {\"x\":\"héllo wörld\"}\n".as_bytes();

        let mut whole = SseLineBuffer::new();
        let whole_lines = whole.push(payload);

        let mut split = SseLineBuffer::new();
        let mut split_lines = Vec::new();
        for b in payload {
            split_lines.extend(split.push(&[*b]));
        }

        assert_eq!(whole_lines, split_lines);
        assert_eq!(whole_lines, vec!["data: {\"x\":\"héllo wörld\"}"]);
    }

    #[test]
    fn test_line_buffer_strips_carriage_return() {
        let mut buf = SseLineBuffer::new();
        let lines = buf.push(b"data: x\r\n");
        assert_eq!(lines, vec!["data: x"]);
    }

    #[test]
    fn test_line_buffer_overflow() {
        let mut buf = SseLineBuffer::new();
        let big = vec![b'x'; MAX_LINE_BYTES + 1];
        let lines = buf.push(&big);
        assert_eq!(lines.len(), 1);
        assert!(buf.overflowed());
    }

    #[test]
    fn test_data_payload() {
        assert_eq!(data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:[DONE]"), Some("[DONE]"));
        assert_eq!(data_payload("event: ping"), None);
    }
}
