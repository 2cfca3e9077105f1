//! Wire protocol layer: SSE framing and event payload decoding.
//!
//! The decoder is tolerant of arbitrary chunk boundaries: partial lines and
//! partial frames are buffered and completed by later chunks, so the decoded
//! event sequence is identical for every chunking of the same bytes.

use crate::errors::StreamError;

/// One decoded protocol event.
///
/// Produced by [`EventDecoder`], consumed exactly once by the assembler.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A contiguous fragment of generated text.
    Delta(String),
    /// An incremental piece of a streamed tool call, keyed by index.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    /// Terminal failure reported by the backend or detected while decoding.
    Error(StreamError),
    /// Terminal success.
    Done,
}

impl StreamEvent {
    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }
}

/// One server-sent event frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE frame decoder.
///
/// Feed raw network chunks in arrival order; complete frames come out as soon
/// as their terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    /// Consumes one chunk and returns every frame completed by it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        self.line.extend_from_slice(chunk);
        while let Some(nl) = self.line.iter().position(|&b| b == b'\n') {
            let rest = self.line.split_off(nl + 1);
            let raw = std::mem::replace(&mut self.line, rest);
            let text = String::from_utf8_lossy(&raw);
            if let Some(frame) = self.consume_line(text.trim_end_matches(['\n', '\r'])) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flushes a trailing frame that was never terminated by a blank line.
    ///
    /// Call once at end of stream; some backends omit the final delimiter.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.line.is_empty() {
            let raw = std::mem::take(&mut self.line);
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches('\r');
            if !line.is_empty() {
                self.consume_field(line);
            }
        }
        self.take_frame()
    }

    fn consume_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.take_frame();
        }
        self.consume_field(line);
        None
    }

    fn consume_field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            self.event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines.push(rest.trim_start().to_string());
        }
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data_lines).join("\n"),
        };
        Some(frame)
    }
}

/// Maps one SSE frame to zero or more protocol events.
///
/// Returns `Err` only for payloads that fail to parse as JSON; upstream
/// `error` records are regular `StreamEvent::Error` values.
pub fn decode_frame(frame: &SseFrame) -> Result<Vec<StreamEvent>, StreamError> {
    let data = frame.data.trim();
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data == "[DONE]" {
        return Ok(vec![StreamEvent::Done]);
    }
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| StreamError::Decode(format!("invalid event payload: {e}")))?;
    Ok(decode_payload(&value))
}

fn decode_payload(value: &serde_json::Value) -> Vec<StreamEvent> {
    if let Some(kind) = value.get("type").and_then(|v| v.as_str()) {
        return match kind {
            "delta" => value
                .get("content")
                .and_then(|v| v.as_str())
                .filter(|t| !t.is_empty())
                .map(|t| StreamEvent::Delta(t.to_string()))
                .into_iter()
                .collect(),
            "tool_call" => decode_tool_call(value).into_iter().collect(),
            "done" => vec![StreamEvent::Done],
            "error" => {
                let message = value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .or_else(|| {
                        value
                            .get("error")
                            .and_then(|e| e.get("message"))
                            .and_then(|v| v.as_str())
                    })
                    .unwrap_or("upstream stream error");
                vec![StreamEvent::Error(StreamError::Upstream(message.into()))]
            }
            // Unknown record types are skipped, not fatal.
            _ => Vec::new(),
        };
    }
    decode_chat_completion_payload(value)
}

/// Decodes the OpenAI chat-completions delta shape
/// (`choices[0].delta.content`, streamed `tool_calls`, `finish_reason`).
fn decode_chat_completion_payload(value: &serde_json::Value) -> Vec<StreamEvent> {
    let Some(choice) = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|c| c.first())
    else {
        if let Some(message) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
        {
            return vec![StreamEvent::Error(StreamError::Upstream(message.into()))];
        }
        return Vec::new();
    };

    let mut events = Vec::new();
    if let Some(delta) = choice.get("delta") {
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(StreamEvent::Delta(text.to_string()));
            }
        }
        if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for call in calls {
                if let Some(event) = decode_tool_call(call) {
                    events.push(event);
                }
            }
        }
    }
    if choice
        .get("finish_reason")
        .is_some_and(|v| v.as_str().is_some())
    {
        // Any finish reason ends the logical stream; a trailing [DONE]
        // sentinel after this is ignored by the decoder's terminal latch.
        events.push(StreamEvent::Done);
    }
    events
}

fn decode_tool_call(value: &serde_json::Value) -> Option<StreamEvent> {
    let index = value.get("index").and_then(|v| v.as_u64())? as usize;
    let as_string = |v: Option<&serde_json::Value>| {
        v.and_then(|v| v.as_str()).map(ToOwned::to_owned)
    };
    let function = value.get("function");
    Some(StreamEvent::ToolCallDelta {
        index,
        id: as_string(value.get("id")),
        name: as_string(function.and_then(|f| f.get("name")).or(value.get("name"))),
        arguments: as_string(
            function
                .and_then(|f| f.get("arguments"))
                .or(value.get("arguments")),
        ),
    })
}

/// Turns a raw byte stream into an ordered event sequence.
///
/// Buffers partial frames across chunk boundaries, latches after the first
/// terminal event, and synthesizes a terminal failure when the stream ends
/// without `done`/`error`.
#[derive(Debug, Default)]
pub struct EventDecoder {
    sse: SseDecoder,
    terminal: bool,
}

impl EventDecoder {
    /// Decodes one network chunk into the events it completes.
    ///
    /// After a terminal event has been produced, further chunks decode to
    /// nothing.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.terminal {
            return Vec::new();
        }
        let mut events = Vec::new();
        for frame in self.sse.push_chunk(chunk) {
            if self.decode_into(&frame, &mut events) {
                break;
            }
        }
        events
    }

    /// Signals end of stream and returns any final events.
    ///
    /// If no terminal event was decoded, a synthesized connection failure is
    /// produced so the consumer never observes a silently dropped stream.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.terminal {
            return Vec::new();
        }
        let mut events = Vec::new();
        if let Some(frame) = self.sse.finish() {
            self.decode_into(&frame, &mut events);
        }
        if !self.terminal {
            self.terminal = true;
            events.push(StreamEvent::Error(StreamError::Connection(
                "stream closed unexpectedly".into(),
            )));
        }
        events
    }

    /// Returns true once a terminal event has been produced.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    fn decode_into(&mut self, frame: &SseFrame, events: &mut Vec<StreamEvent>) -> bool {
        match decode_frame(frame) {
            Ok(decoded) => {
                for event in decoded {
                    let terminal = event.is_terminal();
                    events.push(event);
                    if terminal {
                        self.terminal = true;
                        return true;
                    }
                }
                false
            }
            Err(err) => {
                events.push(StreamEvent::Error(err));
                self.terminal = true;
                true
            }
        }
    }
}
