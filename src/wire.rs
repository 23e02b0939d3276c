use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::Message;

/// Payload that marks the normal end of a reply stream.
pub const DONE_SENTINEL: &str = "[DONE]";

// -- Request body sent to the proxy -----------------------------------------

/// JSON body POSTed to the proxy's stream endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest<'a> {
    pub messages: &'a [Message],
    pub system_prompt: &'a str,
}

// -- SSE payload types ------------------------------------------------------

/// The JSON object carried by a `data:` line.
#[derive(Debug, Deserialize)]
pub struct WirePayload {
    #[serde(default)]
    pub text: Option<String>,
    /// Either a bare string or an object with a `message` field.
    #[serde(default)]
    pub error: Option<Value>,
}

/// Decoded meaning of one frame's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// A non-empty text delta.
    Delta(String),
    /// An explicit upstream failure.
    Error(String),
    /// The terminator sentinel.
    Done,
    /// Valid JSON carrying nothing to yield (no text, empty text, no error).
    Empty,
    /// The data was not a JSON payload object; carries the parse error.
    Malformed(String),
}

impl FramePayload {
    pub fn parse(data: &str) -> Self {
        if data == DONE_SENTINEL {
            return FramePayload::Done;
        }
        match serde_json::from_str::<WirePayload>(data) {
            Ok(WirePayload { error: Some(err), .. }) => FramePayload::Error(error_text(&err)),
            Ok(WirePayload { text: Some(text), .. }) if !text.is_empty() => {
                FramePayload::Delta(text)
            }
            Ok(_) => FramePayload::Empty,
            Err(e) => FramePayload::Malformed(e.to_string()),
        }
    }
}

fn error_text(err: &Value) -> String {
    match err {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
        other => other.to_string(),
    }
}

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// Value of the frame's `event:` line, if it had one.
    pub event_name: Option<String>,
    pub payload: FramePayload,
}
