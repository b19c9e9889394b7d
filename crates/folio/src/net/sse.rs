//! Incremental Server-Sent Events parser for chat-completion streams.
//!
//! [`SseParser`] consumes raw byte chunks from an open response body and
//! emits [`StreamEvent`] values as complete frames become available. Frames
//! are delimited by a blank line (`\n\n`); each frame's `data:` payload is
//! either the `[DONE]` sentinel or a JSON chunk whose
//! `choices[0].delta.content` field carries an incremental text delta.
//!
//! The buffer holds *undecoded* bytes, so a multi-byte UTF-8 character
//! split across chunk boundaries is never decoded early: frames are only
//! decoded once their delimiter has arrived, and the delimiter is ASCII.

use serde::Deserialize;
use tracing::{trace, warn};

/// A single event observed on a report stream.
///
/// Consumed exactly once by the caller; a stream always terminates with
/// `Done` or `Error`, never silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental text content delta.
    Delta(String),
    /// The stream completed normally.
    Done,
    /// The stream failed; deltas already delivered remain valid.
    Error(String),
}

/// End-of-content sentinel sent by OpenAI-compatible backends.
const DONE_SENTINEL: &str = "[DONE]";

/// Raw SSE data chunk shape.
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

/// Incremental parser for one SSE stream.
///
/// Feed it chunks as they arrive; it returns the events completed by each
/// chunk. Non-restartable: a new stream requires a new parser.
#[derive(Debug, Default)]
pub struct SseParser {
    /// Bytes not yet framed. Never holds more than one incomplete frame.
    buf: Vec<u8>,
    saw_done: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen. No further content is
    /// expected after this, though the connection may still be open.
    pub fn saw_done(&self) -> bool {
        self.saw_done
    }

    /// Consume one raw chunk, returning any events completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = find_delimiter(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..pos + 2).collect();
            self.parse_frame(&frame, &mut events);
        }
        events
    }

    /// Flush the trailing unterminated frame, if any, after the underlying
    /// stream has closed.
    pub fn finish(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let frame = std::mem::take(&mut self.buf);
            self.parse_frame(&frame, &mut events);
        }
        events
    }

    /// Scan one complete frame for a `data:` line and extract its payload.
    fn parse_frame(&mut self, frame: &[u8], events: &mut Vec<StreamEvent>) {
        // The frame is complete, so decoding here can never split a
        // character that continues in a later chunk.
        let text = String::from_utf8_lossy(frame);
        for line in text.lines() {
            let line = line.trim();
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();

            if payload == DONE_SENTINEL {
                trace!("stream termination sentinel received");
                self.saw_done = true;
                continue;
            }

            match serde_json::from_str::<StreamChunk>(payload) {
                Ok(chunk) => {
                    let content = chunk
                        .choices
                        .and_then(|c| c.into_iter().next())
                        .and_then(|c| c.delta)
                        .and_then(|d| d.content);
                    if let Some(content) = content
                        && !content.is_empty()
                    {
                        events.push(StreamEvent::Delta(content));
                    }
                }
                // A single malformed frame must not abort the stream.
                Err(e) => warn!("skipping malformed SSE frame ({e}): {payload}"),
            }
        }
    }
}

/// Position of the first `\n\n` frame delimiter, if any.
fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(s: &str) -> String {
        format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{s}\"}}}}]}}\n\n")
    }

    fn events_single_chunk(input: &[u8]) -> Vec<StreamEvent> {
        let mut parser = SseParser::new();
        let mut events = parser.feed(input);
        events.extend(parser.finish());
        events
    }

    #[test]
    fn well_formed_stream_yields_deltas_in_order() {
        let input = format!("{}{}data: [DONE]\n\n", delta("Hello"), delta(" world"));
        let mut parser = SseParser::new();
        let events = parser.feed(input.as_bytes());
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Hello".into()),
                StreamEvent::Delta(" world".into()),
            ]
        );
        assert!(parser.saw_done());
    }

    #[test]
    fn chunk_split_equivalence_at_every_byte_offset() {
        let input = format!(
            "{}{}{}data: [DONE]\n\n",
            delta("Hello"),
            delta(" wörld"), // multi-byte char exercises UTF-8 boundaries
            delta("!")
        );
        let bytes = input.as_bytes();
        let expected = events_single_chunk(bytes);
        assert_eq!(expected.len(), 3);

        for split in 1..bytes.len() {
            let mut parser = SseParser::new();
            let mut events = parser.feed(&bytes[..split]);
            events.extend(parser.feed(&bytes[split..]));
            events.extend(parser.finish());
            assert_eq!(events, expected, "split at byte {split}");
        }
    }

    #[test]
    fn byte_at_a_time_feed_matches_single_chunk() {
        let input = format!("{}{}", delta("流式"), delta("输出"));
        let expected = events_single_chunk(input.as_bytes());

        let mut parser = SseParser::new();
        let mut events = Vec::new();
        for b in input.as_bytes() {
            events.extend(parser.feed(std::slice::from_ref(b)));
        }
        events.extend(parser.finish());
        assert_eq!(events, expected);
    }

    #[test]
    fn malformed_frame_is_skipped_not_fatal() {
        let input = format!("{}data: {{not json}}\n\n{}", delta("a"), delta("b"));
        let events = events_single_chunk(input.as_bytes());
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("a".into()),
                StreamEvent::Delta("b".into()),
            ]
        );
    }

    #[test]
    fn done_sentinel_emits_no_delta() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: [DONE]\n\n");
        assert!(events.is_empty());
        assert!(parser.saw_done());
    }

    #[test]
    fn empty_content_emits_nothing() {
        let input = delta("");
        assert!(events_single_chunk(input.as_bytes()).is_empty());
    }

    #[test]
    fn frames_without_data_prefix_are_ignored() {
        let input = format!(": keep-alive comment\n\nevent: ping\n\n{}", delta("x"));
        let events = events_single_chunk(input.as_bytes());
        assert_eq!(events, vec![StreamEvent::Delta("x".into())]);
    }

    #[test]
    fn trailing_unterminated_frame_is_flushed_on_finish() {
        let mut parser = SseParser::new();
        // No closing blank line before the connection drops.
        let events = parser.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}");
        assert!(events.is_empty());
        assert_eq!(parser.finish(), vec![StreamEvent::Delta("tail".into())]);
    }

    #[test]
    fn crlf_lines_are_tolerated() {
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\r\n\n";
        let events = events_single_chunk(input.as_bytes());
        assert_eq!(events, vec![StreamEvent::Delta("ok".into())]);
    }
}
