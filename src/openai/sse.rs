//! Decoding of `text/event-stream` chat completion responses.
//!
//! Bytes arrive in arbitrary pieces from the HTTP body (HTTP/2 frames
//! can split an event, or a multi-byte character, anywhere) so the
//! decoder buffers raw bytes and only yields complete events.
use serde::Deserialize;

use super::error::GenerateError;

#[derive(Debug, PartialEq)]
pub enum Frame {
    /// The JSON payload of a `data:` event
    Data(String),
    /// `data: [DONE]`
    Done,
}

#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    foreign: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next piece of the body and return every event it
    /// completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(event_end) = find_event_end(&self.buffer) {
            let (end, sep_len) = event_end;
            let event: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            let event = String::from_utf8_lossy(&event);
            if let Some(frame) = self.parse_event(&event) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Whatever is left once the body ends. Some servers don't
    /// terminate the final event with a blank line.
    pub fn finish(&mut self) -> Option<Frame> {
        let rest = std::mem::take(&mut self.buffer);
        let event = String::from_utf8_lossy(&rest);
        self.parse_event(&event)
    }

    /// Whether the body contained lines that are not event stream
    /// fields, such as a plain JSON or HTML response.
    pub fn saw_foreign_content(&self) -> bool {
        self.foreign
    }

    fn parse_event(&mut self, event: &str) -> Option<Frame> {
        let mut data_lines = Vec::new();
        for line in event.lines().map(|line| line.trim_end_matches('\r')) {
            if let Some(data) = line.strip_prefix("data:") {
                data_lines.push(data.trim());
            } else if !is_sse_field(line) {
                self.foreign = true;
            }
        }
        // Multiple data lines in one event are joined with newlines
        let data = data_lines.join("\n");

        // Data can sometimes be empty, and comments (`: keep-alive`) or
        // `event:` lines have no data at all.
        if data.is_empty() {
            return None;
        }
        if data == "[DONE]" {
            return Some(Frame::Done);
        }
        Some(Frame::Data(data))
    }
}

// Returns the index where the event ends and the length of the
// separator that follows it.
fn find_event_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn is_sse_field(line: &str) -> bool {
    line.trim().is_empty()
        || line.starts_with(':')
        || ["event:", "id:", "retry:"]
            .iter()
            .any(|field| line.starts_with(field))
}

/// Tracks what a stream delivered so that a body with no usable frames
/// fails instead of completing empty.
#[derive(Debug, Default)]
pub struct FrameTally {
    parsed: usize,
    malformed: usize,
    done: bool,
}

impl FrameTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a data frame. Malformed frames are counted, logged and
    /// skipped.
    pub fn parse(&mut self, data: &str) -> Result<Option<String>, GenerateError> {
        match parse_fragment(data) {
            Ok(fragment) => {
                self.parsed += 1;
                Ok(fragment)
            }
            Err(GenerateError::MalformedFrame(e)) => {
                self.malformed += 1;
                tracing::warn!("Skipping malformed completion chunk: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn mark_done(&mut self) {
        self.done = true;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The error for a body that ended without a usable stream, if any.
    pub fn finish(&self, saw_foreign_content: bool) -> Option<GenerateError> {
        if self.parsed == 0 && self.malformed > 0 {
            return Some(GenerateError::MalformedFrame(format!(
                "None of the {} frames in the stream could be decoded",
                self.malformed
            )));
        }
        if self.parsed == 0 && saw_foreign_content {
            return Some(GenerateError::Model {
                status: None,
                message: String::from("Response was not an event stream"),
            });
        }
        if !self.done {
            return Some(GenerateError::TransientNetwork(String::from(
                "stream ended before [DONE]",
            )));
        }
        None
    }
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<serde_json::Value>,
}

/// Pull the text fragment out of a chunk's `choices[0].delta.content`.
///
/// `Ok(None)` means the frame was valid but carried no text (role
/// announcements, finish reasons, usage). A provider error object in
/// the stream is a `Model` error, anything undecodable is a
/// `MalformedFrame`.
pub fn parse_fragment(data: &str) -> Result<Option<String>, GenerateError> {
    let chunk = serde_json::from_str::<CompletionChunk>(data)
        .map_err(|e| GenerateError::MalformedFrame(format!("{e}: {data}")))?;

    if let Some(error) = chunk.error {
        let message = error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(GenerateError::Model {
            status: None,
            message,
        });
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty()))
}
