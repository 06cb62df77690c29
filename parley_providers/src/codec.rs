//! Wire format of the responses endpoint: the request body, the
//! non-streaming response, and the `data: ` lines of a streamed response.

use parley_config::Configuration;
use parley_core::{ChatMessage, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Event type carrying a fragment of assistant text.
pub const OUTPUT_TEXT_DELTA: &str = "response.output_text.delta";

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Outbound request body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResponsesRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub input: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: f64,
}

impl ResponsesRequest {
    pub fn new(
        config: &Configuration,
        input: Vec<ChatMessage>,
        extra_instructions: Option<&str>,
        stream: bool,
    ) -> Self {
        Self {
            model: config.model().to_string(),
            instructions: merge_instructions(config.system_prompt(), extra_instructions),
            input,
            stream,
            temperature: config.temperature(),
        }
    }
}

/// Combine the system prompt with per-call instructions.
///
/// Both sides are trimmed; blank sides are dropped and two non-blank sides
/// are joined by a blank line, prompt first.
#[must_use]
pub fn merge_instructions(system_prompt: &str, extra: Option<&str>) -> Option<String> {
    let prompt = system_prompt.trim();
    let extra = extra.map_or("", str::trim);

    match (prompt.is_empty(), extra.is_empty()) {
        (true, true) => None,
        (false, true) => Some(prompt.to_string()),
        (true, false) => Some(extra.to_string()),
        (false, false) => Some(format!("{prompt}\n\n{extra}")),
    }
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    output: Option<Vec<OutputItem>>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    content: Option<Vec<ContentPart>>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Extract the assistant text from a non-streaming response body.
///
/// Only `message` output items and their `output_text` parts count; an item
/// or part without a `type` is treated as matching. A body that is not JSON,
/// or not shaped like a response, is a decode error.
pub fn decode_response(body: &str) -> Result<String> {
    let body: ResponseBody = serde_json::from_str(body)?;

    let text: String = body
        .output
        .unwrap_or_default()
        .into_iter()
        .filter(|item| item.kind.as_deref().is_none_or(|kind| kind == "message"))
        .flat_map(|item| item.content.unwrap_or_default())
        .filter(|part| part.kind.as_deref().is_none_or(|kind| kind == "output_text"))
        .filter_map(|part| part.text)
        .collect();

    if text.is_empty() {
        return Err(Error::EmptyResponse);
    }
    Ok(text)
}

/// Top-level error body, e.g. `{"error": {"message": "...", "type": "..."}}`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub error: ApiError,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Best-effort message for a failed response: the envelope message, else the
/// raw body.
#[must_use]
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body.trim())
        .map_or_else(|_| body.trim().to_string(), |envelope| envelope.error.message)
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    error: Option<StreamEventError>,
}

#[derive(Debug, Deserialize)]
struct StreamEventError {
    #[serde(default)]
    message: Option<String>,
}

/// Outcome of decoding one line of an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    /// Nothing visible: comments, other event types, keep-alives.
    Skip,
    /// The `[DONE]` sentinel.
    Done,
    /// A non-empty fragment of assistant text.
    Delta(String),
}

/// Decode one line of a streamed response.
///
/// An error envelope, or an event whose type mentions `error` and carries a
/// message, fails the stream.
pub fn decode_stream_line(line: &str) -> Result<StreamLine> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(StreamLine::Skip);
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(StreamLine::Skip);
    }
    if payload == DONE_SENTINEL {
        return Ok(StreamLine::Done);
    }

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(payload) {
        return Err(Error::Stream(envelope.error.message));
    }

    let event = match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!("failed to parse stream event: {e}, data: {payload}");
            return Ok(StreamLine::Skip);
        }
    };

    let StreamEvent { kind, delta, error } = event;
    match (error.and_then(|error| error.message), delta) {
        (Some(message), _) if kind.contains("error") => Err(Error::Stream(message)),
        (_, Some(delta)) if kind == OUTPUT_TEXT_DELTA && !delta.is_empty() => {
            Ok(StreamLine::Delta(delta))
        }
        _ => Ok(StreamLine::Skip),
    }
}

/// Longest unterminated line held back before the stream is failed.
pub const MAX_PENDING_LINE: usize = 1024 * 1024;

/// Splits a byte stream into lines, holding back a trailing partial line
/// (and any partial UTF-8 sequence in it) until the rest arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed a chunk, returning every line it completes, without terminators.
    ///
    /// Fails once the unterminated remainder exceeds [`MAX_PENDING_LINE`].
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|byte| *byte == b'\n') {
            let end = start + offset + 1;
            lines.push(decode_line(&self.pending[start..end]));
            start = end;
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_PENDING_LINE {
            self.pending.clear();
            return Err(Error::Stream(format!(
                "stream line exceeds {MAX_PENDING_LINE} bytes"
            )));
        }
        Ok(lines)
    }

    /// The unterminated remainder, if any, once the stream has closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}
