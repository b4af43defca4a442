//! Incremental decoder for the chat stream wire format: text blocks
//! separated by a blank line, each carrying one `event:` line and one or
//! more `data:` lines. CRLF is normalized to LF, multi-line `data:` payloads
//! are joined with `\n`, and payloads that fail to JSON-decode fall back to
//! a raw string.

use serde_json::Value;

use crate::types::ThoughtStep;

/// One parsed `event`/`data` block.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub event: String,
    pub data: Value,
}

/// Byte-buffer frame decoder. Frames are only cut at ASCII `\n\n`, so a
/// multi-byte character split across network reads survives intact.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    pending_cr: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a network read and drain every complete frame.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<RawFrame> {
        for &b in bytes {
            if self.pending_cr {
                self.pending_cr = false;
                if b == b'\n' {
                    self.buf.push(b'\n');
                    continue;
                }
                self.buf.push(b'\r');
            }
            if b == b'\r' {
                self.pending_cr = true;
            } else {
                self.buf.push(b);
            }
        }
        self.drain_frames()
    }

    /// Flush a trailing block that was never terminated by a blank line.
    pub fn finish(&mut self) -> Vec<RawFrame> {
        if self.pending_cr {
            self.buf.push(b'\r');
            self.pending_cr = false;
        }
        let mut frames = self.drain_frames();
        if !self.buf.is_empty() {
            let block = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            frames.extend(parse_block(&block));
        }
        frames
    }

    fn drain_frames(&mut self) -> Vec<RawFrame> {
        let mut frames = Vec::new();
        loop {
            let Some(split) = find_separator(&self.buf) else {
                return frames;
            };
            let block = String::from_utf8_lossy(&self.buf[..split]).into_owned();
            self.buf.drain(..split + 2);
            frames.extend(parse_block(&block));
        }
    }
}

fn find_separator(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_block(block: &str) -> Option<RawFrame> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // Anything else (comment lines, retry hints) is skipped.
    }
    let event = event?;
    let joined = data_lines.join("\n");
    let data = serde_json::from_str(&joined).unwrap_or(Value::String(joined));
    Some(RawFrame { event, data })
}

/// Typed event of one chat turn.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Session {
        session_id: u64,
    },
    Thought(ThoughtStep),
    Chunk {
        delta: String,
    },
    Done {
        answer: String,
        session_id: Option<u64>,
        thought_steps: Vec<ThoughtStep>,
        side_effects: Vec<Value>,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// `None` for unknown event names; those are tolerated and skipped.
    pub fn from_frame(frame: &RawFrame) -> Option<StreamEvent> {
        match frame.event.as_str() {
            "session" => frame
                .data
                .get("session_id")
                .and_then(Value::as_u64)
                .map(|session_id| StreamEvent::Session { session_id }),
            "thought" => Some(StreamEvent::Thought(thought_from(&frame.data))),
            "chunk" => Some(StreamEvent::Chunk {
                delta: string_field(&frame.data, "delta"),
            }),
            "done" => Some(StreamEvent::Done {
                answer: string_field(&frame.data, "answer"),
                session_id: frame.data.get("session_id").and_then(Value::as_u64),
                thought_steps: frame
                    .data
                    .get("thought_steps")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default(),
                side_effects: frame
                    .data
                    .get("side_effects")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            }),
            "error" => {
                let message = match string_field(&frame.data, "message") {
                    m if m.is_empty() => "stream error".to_string(),
                    m => m,
                };
                Some(StreamEvent::Error { message })
            }
            _ => None,
        }
    }
}

/// Named string field of a JSON payload, or the payload itself when the
/// server sent a bare string.
fn string_field(data: &Value, field: &str) -> String {
    data.get(field)
        .and_then(Value::as_str)
        .or_else(|| data.as_str())
        .unwrap_or_default()
        .to_string()
}

fn thought_from(data: &Value) -> ThoughtStep {
    if let Ok(step) = serde_json::from_value::<ThoughtStep>(data.clone()) {
        if !step.message.is_empty() || !step.phase.is_empty() {
            return step;
        }
    }
    ThoughtStep {
        phase: String::new(),
        message: data.as_str().unwrap_or_default().to_string(),
        status: String::new(),
    }
}
