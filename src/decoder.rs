//! Stream decoding
//!
//! Turns the transport's byte stream into [`StreamEvent`]s. Framing is
//! Server-Sent-Events style (`event:` / `data:` fields terminated by a blank
//! line); lines that are not SSE fields are self-contained frames, which
//! covers newline-delimited JSON. Line reassembly across chunk boundaries is
//! left to `LinesCodec`, so partial lines and split UTF-8 sequences never
//! reach the classifier.

use crate::error::StreamError;
use crate::wire::ChatSnapshot;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::io;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

/// Longest accepted line; snapshots carry whole conversations
pub const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of the stream, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta { text: String },
    ChatSnapshot { chat: ChatSnapshot },
    Done,
    Error { cause: StreamError },
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { text: text.into() }
    }

    /// Done and Error end the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Event names recognised for each event kind.
///
/// Matched case-insensitively against the SSE `event:` name, else the JSON
/// `type` field. A bare `[DONE]` payload always ends the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMarkers {
    pub delta: Vec<String>,
    pub chat: Vec<String>,
    pub done: Vec<String>,
    pub error: Vec<String>,
}

impl Default for EventMarkers {
    fn default() -> Self {
        fn names(list: &[&str]) -> Vec<String> {
            list.iter().map(|s| (*s).to_string()).collect()
        }
        Self {
            delta: names(&["delta", "text"]),
            chat: names(&["chat", "chat.updated"]),
            done: names(&["done", "end", DONE_SENTINEL]),
            error: names(&["error"]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Delta,
    Chat,
    Done,
    Error,
}

impl EventMarkers {
    fn kind_of(&self, name: &str) -> Option<FrameKind> {
        let name = name.trim();
        let hit = |list: &[String]| list.iter().any(|m| m.eq_ignore_ascii_case(name));
        // Terminal markers win if a name is configured twice
        if hit(&self.done) {
            Some(FrameKind::Done)
        } else if hit(&self.error) {
            Some(FrameKind::Error)
        } else if hit(&self.chat) {
            Some(FrameKind::Chat)
        } else if hit(&self.delta) {
            Some(FrameKind::Delta)
        } else {
            None
        }
    }
}

// ============================================================================
// Line decoder
// ============================================================================

/// Incremental line-to-event decoder.
///
/// Feed complete lines (without the trailing newline) through
/// [`push_line`](Self::push_line) and call [`finish`](Self::finish) once the
/// source is exhausted. After a terminal event every further input is dropped.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    markers: EventMarkers,
    event_name: Option<String>,
    data: Vec<String>,
    /// Ignore lines until the next blank line
    skipping_frame: bool,
    terminated: bool,
}

impl StreamDecoder {
    pub fn new(markers: EventMarkers) -> Self {
        Self {
            markers,
            event_name: None,
            data: Vec::new(),
            skipping_frame: false,
            terminated: false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn push_line(&mut self, line: &str) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        let mut events = Vec::new();

        if self.skipping_frame {
            self.skipping_frame = !line.is_empty();
            return events;
        }
        if line.is_empty() {
            self.dispatch(&mut events);
            return events;
        }
        if line.starts_with(':') {
            return events;
        }

        match split_field(line) {
            Some(("event", value)) => {
                // A new name without a blank line starts a new frame
                if self.event_name.is_some() && !self.data.is_empty() {
                    self.dispatch(&mut events);
                }
                self.event_name = Some(value.to_string());
            }
            Some(("data", value)) => self.data.push(value.to_string()),
            Some(_) => {}
            None => {
                self.dispatch(&mut events);
                if !self.terminated {
                    self.emit_bare(line, &mut events);
                }
            }
        }
        events
    }

    /// Flush the pending frame; a stream that never terminated gets a
    /// synthetic `Done`.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.dispatch(&mut events);
        if !self.terminated {
            tracing::debug!("Stream ended without a terminal frame, synthesizing Done");
            self.emit(StreamEvent::Done, &mut events);
        }
        events
    }

    /// A line of the current frame was lost. The partial frame is dropped
    /// rather than dispatched with missing data.
    fn drop_frame(&mut self) {
        let had_name = self.event_name.take().is_some();
        let had_data = !std::mem::take(&mut self.data).is_empty();
        if had_name || had_data {
            tracing::warn!("Dropping frame with an unreadable line");
            self.skipping_frame = true;
        }
    }

    /// Input error from the source; ends the stream
    pub fn fail(&mut self, cause: StreamError) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.dispatch(&mut events);
        if !self.terminated {
            self.emit(StreamEvent::Error { cause }, &mut events);
        }
        events
    }

    fn dispatch(&mut self, events: &mut Vec<StreamEvent>) {
        let name = self.event_name.take();
        let data = std::mem::take(&mut self.data);
        if name.is_none() && data.is_empty() {
            return;
        }
        if self.terminated {
            return;
        }
        let data = data.join("\n");
        if let Some(event) = self.classify(name.as_deref(), &data) {
            self.emit(event, events);
        }
    }

    fn emit_bare(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        let event = match self.classify(None, line) {
            // Plain text lines keep the newline the codec removed
            Some(StreamEvent::Delta { text }) if text == line && !looks_like_json(line) => {
                Some(StreamEvent::Delta {
                    text: format!("{line}\n"),
                })
            }
            other => other,
        };
        if let Some(event) = event {
            self.emit(event, events);
        }
    }

    fn emit(&mut self, event: StreamEvent, events: &mut Vec<StreamEvent>) {
        if self.terminated {
            return;
        }
        self.terminated = event.is_terminal();
        events.push(event);
    }

    fn classify(&self, name: Option<&str>, data: &str) -> Option<StreamEvent> {
        let parsed: Option<Value> = serde_json::from_str(data).ok();
        let type_field = parsed
            .as_ref()
            .and_then(|v| v.get("type"))
            .and_then(Value::as_str);

        let kind = name
            .and_then(|n| self.markers.kind_of(n))
            .or_else(|| type_field.and_then(|t| self.markers.kind_of(t)))
            .or_else(|| (data.trim() == DONE_SENTINEL).then_some(FrameKind::Done));

        match kind {
            Some(FrameKind::Done) => Some(StreamEvent::Done),
            Some(FrameKind::Error) => Some(StreamEvent::Error {
                cause: StreamError::protocol(error_message(parsed.as_ref(), data)),
            }),
            Some(FrameKind::Chat) => Some(decode_snapshot(parsed, data)),
            Some(FrameKind::Delta) => {
                let text = delta_text(parsed.as_ref()).unwrap_or(data);
                (!text.is_empty()).then(|| StreamEvent::delta(text))
            }
            None => {
                if let Some(name) = name.or(type_field) {
                    tracing::warn!(event = %name, "Unrecognized stream event, passing through as text");
                }
                (!data.is_empty()).then(|| StreamEvent::delta(data))
            }
        }
    }
}

/// Split an SSE field line. Only the field names SSE defines count, so bare
/// text such as `Note: ...` is not mistaken for a field.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let (field, value) = line.split_once(':')?;
    if !matches!(field, "event" | "data" | "id" | "retry") {
        return None;
    }
    Some((field, value.strip_prefix(' ').unwrap_or(value)))
}

fn looks_like_json(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with('{') || line.starts_with('[') || line.starts_with('"')
}

fn delta_text(parsed: Option<&Value>) -> Option<&str> {
    match parsed? {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => ["delta", "text", "content"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str)),
        _ => None,
    }
}

fn error_message(parsed: Option<&Value>, raw: &str) -> String {
    let from_json = parsed.and_then(|v| {
        v.get("message")
            .and_then(Value::as_str)
            .or_else(|| v.get("error").and_then(Value::as_str))
            .or_else(|| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
            })
    });
    let message = from_json.unwrap_or(raw).trim();
    if message.is_empty() {
        "Stream reported an error".to_string()
    } else {
        message.to_string()
    }
}

fn decode_snapshot(parsed: Option<Value>, raw: &str) -> StreamEvent {
    let candidate = parsed.map(|value| match value {
        Value::Object(mut map) if map.get("chat").is_some_and(Value::is_object) => {
            map.remove("chat").unwrap_or(Value::Null)
        }
        other => other,
    });

    match candidate.map(serde_json::from_value::<ChatSnapshot>) {
        Some(Ok(chat)) => StreamEvent::ChatSnapshot { chat },
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Malformed chat snapshot, passing through as text");
            StreamEvent::delta(raw)
        }
        None => {
            tracing::warn!("Chat snapshot is not JSON, passing through as text");
            StreamEvent::delta(raw)
        }
    }
}

// ============================================================================
// Byte stream adapter
// ============================================================================

type Lines<S> = FramedRead<StreamReader<S, Bytes>, LinesCodec>;

/// Pulls events out of a byte stream
pub struct EventStream<S>
where
    S: Stream<Item = Result<Bytes, io::Error>> + Unpin,
{
    lines: Lines<S>,
    decoder: StreamDecoder,
    pending: VecDeque<StreamEvent>,
    /// The codec reports the end of input once after a decode error
    resume_after_error: bool,
    exhausted: bool,
}

impl<S> EventStream<S>
where
    S: Stream<Item = Result<Bytes, io::Error>> + Unpin,
{
    pub fn new(bytes: S, markers: EventMarkers) -> Self {
        Self {
            lines: FramedRead::new(
                StreamReader::new(bytes),
                LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            ),
            decoder: StreamDecoder::new(markers),
            pending: VecDeque::new(),
            resume_after_error: false,
            exhausted: false,
        }
    }

    /// Next event, or `None` once the terminal event has been returned
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.exhausted {
                return None;
            }

            let batch = match self.lines.next().await {
                Some(Ok(line)) => self.decoder.push_line(&line),
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    // The codec discards the rest of the line on its own
                    tracing::warn!(max = MAX_LINE_LENGTH, "Stream line too long, skipped");
                    self.decoder.drop_frame();
                    self.resume_after_error = true;
                    Vec::new()
                }
                None if self.resume_after_error => {
                    self.resume_after_error = false;
                    Vec::new()
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    tracing::warn!(error = %e, "Stream read failed");
                    self.decoder
                        .fail(StreamError::network(format!("Stream read failed: {e}")))
                }
                None => self.decoder.finish(),
            };

            if self.decoder.is_terminated() {
                self.exhausted = true;
            }
            self.pending.extend(batch);
        }
    }
}
