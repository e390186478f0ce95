//! Push events emitted by the gateway while a run streams.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ChatMessage, ContentBlock, Role};

/// Event state reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatEventState {
    Delta,
    Final,
    Aborted,
    Error,
}

/// A `chat` push event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub session_key: String,
    pub state: ChatEventState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ChatEvent {
    pub fn new(session_key: impl Into<String>, state: ChatEventState) -> Self {
        Self {
            run_id: None,
            session_key: session_key.into(),
            state,
            message: None,
            error_message: None,
        }
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: Value) -> Self {
        self.message = Some(message);
        self
    }

    #[must_use]
    pub fn with_error_message(mut self, error_message: impl Into<String>) -> Self {
        self.error_message = Some(error_message.into());
        self
    }
}

/// Display text of a streamed message payload.
///
/// Accepts a bare string, a message whose `content` is a string or an array
/// of blocks (text blocks are joined with `\n`), or a message with a `text`
/// field. Returns `None` when nothing textual is found.
pub fn extract_text(message: &Value) -> Option<String> {
    match message {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => match map.get("content") {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Array(blocks)) => {
                let parts: Vec<&str> = blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect();
                (!parts.is_empty()).then(|| parts.join("\n"))
            }
            _ => map.get("text").and_then(Value::as_str).map(str::to_owned),
        },
        _ => None,
    }
}

/// The message carried by an `aborted` event, when it is a well-formed
/// assistant message (role `assistant`, array content).
pub fn normalize_aborted_message(message: &Value) -> Option<ChatMessage> {
    let role = message.get("role").and_then(Value::as_str)?;
    if role != "assistant" || !message.get("content").is_some_and(Value::is_array) {
        return None;
    }
    serde_json::from_value::<ChatMessage>(message.clone())
        .ok()
        .filter(|m| m.role == Role::Assistant)
}

/// Assistant message synthesized from a partially streamed buffer.
pub fn message_from_stream(stream: &str, timestamp: i64) -> Option<ChatMessage> {
    (!stream.trim().is_empty()).then(|| {
        ChatMessage::new(
            Role::Assistant,
            vec![ContentBlock::text(stream)],
            timestamp,
        )
    })
}
