//! # Event-stream decoder
//!
//! Incremental `text/event-stream` parser. Chunks may split lines anywhere,
//! including between the `\r` and `\n` of a CRLF pair, so the decoder keeps
//! the unfinished tail across calls to [`SseDecoder::feed`].
//!
//! Handled fields:
//! - `data` appends a line to the pending payload
//! - `event` sets the pending event type (default `message`)
//! - `id` sets the last event id, which survives across events
//! - `retry` sets the reconnection delay in milliseconds
//!
//! Lines starting with `:` are comments. A blank line dispatches the pending
//! event if it has any data.

use std::time::Duration;

use bytes::{Buf, BytesMut};

pub const DEFAULT_EVENT_TYPE: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Whether an EventSource would deliver this to `onmessage`.
    pub fn is_message(&self) -> bool {
        self.event == DEFAULT_EVENT_TYPE
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    started: bool,
    /// A chunk ended in `\r`; a leading `\n` on the next chunk belongs to it.
    pending_cr: bool,
    event_type: String,
    data: String,
    last_event_id: Option<String>,
    retry: Option<Duration>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the most recent event that carried one.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Reconnection delay most recently advertised by the server.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    /// Drop any partially received event. Called between connections; the
    /// last event id and retry delay are kept.
    pub fn reset_connection(&mut self) {
        self.buffer.clear();
        self.started = false;
        self.pending_cr = false;
        self.event_type.clear();
        self.data.clear();
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        if self.pending_cr && !self.buffer.is_empty() {
            if self.buffer[0] == b'\n' {
                self.buffer.advance(1);
            }
            self.pending_cr = false;
        }

        if !self.started {
            if self.buffer.len() < 3 && b"\xEF\xBB\xBF".starts_with(&self.buffer) {
                return events;
            }
            if self.buffer.starts_with(b"\xEF\xBB\xBF") {
                self.buffer.advance(3);
            }
            self.started = true;
        }

        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n' || b == b'\r') {
            let terminator = self.buffer[end];
            let line = self.buffer.split_to(end);
            self.buffer.advance(1);
            if terminator == b'\r' {
                if self.buffer.is_empty() {
                    self.pending_cr = true;
                } else if self.buffer[0] == b'\n' {
                    self.buffer.advance(1);
                }
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "event" => {
                self.event_type.clear();
                self.event_type.push_str(value);
            }
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(ms) = value.parse::<u64>() {
                        self.retry = Some(Duration::from_millis(ms));
                    }
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event_type.clear();
            return None;
        }

        let mut data = std::mem::take(&mut self.data);
        if data.ends_with('\n') {
            data.pop();
        }
        let event = if self.event_type.is_empty() {
            DEFAULT_EVENT_TYPE.to_string()
        } else {
            std::mem::take(&mut self.event_type)
        };

        Some(SseEvent {
            event,
            data,
            id: self.last_event_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_of(events: &[SseEvent]) -> Vec<&str> {
        events.iter().map(|e| e.data.as_str()).collect()
    }

    #[test]
    fn single_message() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"basecount\": 1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"basecount\": 1}");
        assert!(events[0].is_message());
    }

    #[test]
    fn data_without_space_after_colon() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data:abc\n\n");
        assert_eq!(data_of(&events), vec!["abc"]);
    }

    #[test]
    fn only_one_leading_space_is_stripped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data:  two\n\n");
        assert_eq!(data_of(&events), vec![" two"]);
    }

    #[test]
    fn multiline_data_joined_with_newline() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: first\ndata: second\n\n");
        assert_eq!(data_of(&events), vec!["first\nsecond"]);
    }

    #[test]
    fn chunk_boundaries_anywhere() {
        let stream = b"data: {\"basecount\": 10}\n\ndata: {\"basecount\": 20}\n\n";
        for split in 1..stream.len() {
            let mut decoder = SseDecoder::new();
            let mut events = decoder.feed(&stream[..split]);
            events.extend(decoder.feed(&stream[split..]));
            assert_eq!(
                data_of(&events),
                vec!["{\"basecount\": 10}", "{\"basecount\": 20}"],
                "split at {split}"
            );
        }
    }

    #[test]
    fn crlf_and_cr_line_endings() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: a\r\n\r\ndata: b\r\rdata: c\n\n");
        assert_eq!(data_of(&events), vec!["a", "b", "c"]);
    }

    #[test]
    fn crlf_split_across_chunks_is_one_line_break() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: a\r").is_empty());
        assert!(decoder.feed(b"\n").is_empty());
        let events = decoder.feed(b"\r\n");
        assert_eq!(data_of(&events), vec!["a"]);
    }

    #[test]
    fn comments_and_unknown_fields_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keepalive\nfoo: bar\ndata: x\n\n");
        assert_eq!(data_of(&events), vec!["x"]);
    }

    #[test]
    fn blank_line_without_data_dispatches_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"\n\n: ping\n\nevent: status\n\n").is_empty());
        // The discarded event type must not leak into the next event.
        let events = decoder.feed(b"data: y\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn named_events_are_not_messages() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: runlist\ndata: []\n\ndata: z\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "runlist");
        assert!(!events[0].is_message());
        assert!(events[1].is_message());
    }

    #[test]
    fn id_persists_across_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"id: 7\ndata: a\n\ndata: b\n\n");
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[1].id.as_deref(), Some("7"));
        assert_eq!(decoder.last_event_id(), Some("7"));
    }

    #[test]
    fn id_with_nul_is_ignored() {
        let mut decoder = SseDecoder::new();
        decoder.feed(b"id: 1\n\nid: a\0b\n\n");
        assert_eq!(decoder.last_event_id(), Some("1"));
    }

    #[test]
    fn retry_field() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.retry(), None);
        decoder.feed(b"retry: 1500\n\n");
        assert_eq!(decoder.retry(), Some(Duration::from_millis(1500)));
        decoder.feed(b"retry: soon\n\nretry: -5\n\n");
        assert_eq!(decoder.retry(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn leading_bom_is_dropped() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"\xEF\xBB").is_empty());
        let events = decoder.feed(b"\xBFdata: a\n\n");
        assert_eq!(data_of(&events), vec!["a"]);
    }

    #[test]
    fn reset_connection_drops_partial_event() {
        let mut decoder = SseDecoder::new();
        decoder.feed(b"id: 3\nretry: 10\ndata: half");
        decoder.reset_connection();
        let events = decoder.feed(b"data: whole\n\n");
        assert_eq!(data_of(&events), vec!["whole"]);
        assert_eq!(decoder.last_event_id(), Some("3"));
        assert_eq!(decoder.retry(), Some(Duration::from_millis(10)));
    }
}
