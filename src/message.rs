//! Chat message model shared by history, runs, and the attachment lifecycle.
//!
//! Messages arrive from the gateway as loosely-shaped JSON. The model keeps
//! what the controller needs typed ([`Role`], [`ContentBlock`],
//! [`MessageMarker`]) and round-trips everything else verbatim: unknown
//! content blocks land in [`ContentBlock::Other`], unknown message fields in
//! [`ChatMessage::extra`].
//!
//! # Examples
//!
//! ```
//! use voxchat::message::{ChatMessage, Role};
//!
//! let msg: ChatMessage =
//!     serde_json::from_str(r#"{"role":"assistant","content":"hi","timestamp":5}"#).unwrap();
//! assert_eq!(msg.role, Role::Assistant);
//! assert_eq!(msg.text(), "hi");
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Returns the current time in Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// True when a session key selects a session.
///
/// Empty and whitespace-only keys mean "no session".
pub fn is_session_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    /// Any role this client does not know about.
    #[serde(other)]
    Other,
}

/// Where a media payload lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaSource {
    /// Inline base64 payload.
    Base64 { data: String },
    /// Remotely hosted payload.
    Url { url: String },
}

/// An inline image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBlock {
    pub mime_type: String,
    pub source: MediaSource,
}

/// A voice note attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceNoteBlock {
    pub mime_type: String,
    pub source: MediaSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_parts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_note_id: Option<String>,
}

/// One block of message content.
///
/// Serialized with a `type` tag (`text`, `image`, `voice_note`). Blocks of
/// any other type, or known types with an unexpected shape, are kept as
/// [`ContentBlock::Other`] and re-serialized unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ContentBlock {
    Text { text: String },
    Image(ImageBlock),
    VoiceNote(VoiceNoteBlock),
    Other(Value),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text { text: String },
    Image(ImageBlock),
    VoiceNote(VoiceNoteBlock),
}

impl From<Value> for ContentBlock {
    fn from(value: Value) -> Self {
        match serde_json::from_value::<WireBlock>(value.clone()) {
            Ok(WireBlock::Text { text }) => Self::Text { text },
            Ok(WireBlock::Image(image)) => Self::Image(image),
            Ok(WireBlock::VoiceNote(note)) => Self::VoiceNote(note),
            Err(_) => Self::Other(value),
        }
    }
}

impl From<ContentBlock> for Value {
    fn from(block: ContentBlock) -> Self {
        let wire = match block {
            ContentBlock::Other(value) => return value,
            ContentBlock::Text { text } => WireBlock::Text { text },
            ContentBlock::Image(image) => WireBlock::Image(image),
            ContentBlock::VoiceNote(note) => WireBlock::VoiceNote(note),
        };
        serde_json::to_value(wire).unwrap_or(Value::Null)
    }
}

impl ContentBlock {
    /// Convenience constructor for a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Provenance tag carried by locally-originated messages.
///
/// Used to find and patch a message later, and to drop local copies once
/// the gateway echoes the same message back. Never used for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MessageMarker {
    /// A voice note captured in this client, keyed by attachment id.
    LocalVoiceNote { id: String },
}

impl MessageMarker {
    /// The id the marker points at.
    pub fn id(&self) -> &str {
        match self {
            Self::LocalVoiceNote { id } => id,
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, deserialize_with = "deserialize_content")]
    pub content: Vec<ContentBlock>,
    /// Unix epoch milliseconds (0 when the gateway omitted it).
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: i64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_marker"
    )]
    pub marker: Option<MessageMarker>,
    /// Fields this client does not interpret (usage, stop reason, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ChatMessage {
    /// Build a message from content blocks.
    pub fn new(role: Role, content: Vec<ContentBlock>, timestamp: i64) -> Self {
        Self {
            role,
            content,
            timestamp,
            marker: None,
            extra: serde_json::Map::new(),
        }
    }

    /// A single-text-block assistant message.
    pub fn assistant_text(text: impl Into<String>, timestamp: i64) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::text(text)], timestamp)
    }

    /// A single-text-block user message.
    pub fn user_text(text: impl Into<String>, timestamp: i64) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)], timestamp)
    }

    /// Attach a provenance marker.
    #[must_use]
    pub fn with_marker(mut self, marker: MessageMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    /// The id of the marker, if any.
    pub fn marker_id(&self) -> Option<&str> {
        self.marker.as_ref().map(MessageMarker::id)
    }

    /// Concatenated text blocks, newline separated.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Mutable access to every voice-note block in this message.
    pub fn voice_notes_mut(&mut self) -> impl Iterator<Item = &mut VoiceNoteBlock> {
        self.content.iter_mut().filter_map(|block| match block {
            ContentBlock::VoiceNote(note) => Some(note),
            _ => None,
        })
    }
}

/// Accepts a plain string, an array of blocks, or null.
fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::String(text) => vec![ContentBlock::Text { text }],
        Value::Array(items) => items.into_iter().map(ContentBlock::from).collect(),
        _ => Vec::new(),
    })
}

/// Accepts integer or float milliseconds; anything else becomes 0.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    })
}

/// Unknown marker shapes are dropped instead of failing the whole message.
fn deserialize_marker<'de, D>(deserializer: D) -> Result<Option<MessageMarker>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| serde_json::from_value(value).ok()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn string_content_becomes_text_block() {
        let msg: ChatMessage =
            serde_json::from_value(json!({"role": "user", "content": "hello"})).unwrap();
        assert_eq!(msg.content, vec![ContentBlock::text("hello")]);
        assert_eq!(msg.timestamp, 0);
        assert!(msg.marker.is_none());
    }

    #[test]
    fn unknown_blocks_round_trip_verbatim() {
        let raw = json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "a"},
                {"type": "tool_use", "id": "t1", "input": {"x": 1}}
            ],
            "timestamp": 10,
            "stopReason": "end_turn"
        });
        let msg: ChatMessage = serde_json::from_value(raw.clone()).unwrap();
        assert!(matches!(msg.content[1], ContentBlock::Other(_)));
        assert_eq!(msg.extra.get("stopReason"), Some(&json!("end_turn")));
        assert_eq!(serde_json::to_value(&msg).unwrap(), raw);
    }

    #[test]
    fn voice_note_block_parses_camel_case() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "role": "user",
            "content": [{
                "type": "voice_note",
                "mimeType": "audio/webm",
                "source": {"type": "base64", "data": "AAAA"},
                "fileName": "memo.webm",
                "persistedNoteId": "n1"
            }],
            "marker": {"kind": "local-voice-note", "id": "att-1"}
        }))
        .unwrap();
        match &msg.content[0] {
            ContentBlock::VoiceNote(note) => {
                assert_eq!(note.mime_type, "audio/webm");
                assert_eq!(note.file_name.as_deref(), Some("memo.webm"));
                assert_eq!(note.persisted_note_id.as_deref(), Some("n1"));
            }
            other => unreachable!("expected voice note, got {other:?}"),
        }
        assert_eq!(msg.marker_id(), Some("att-1"));
    }

    #[test]
    fn unknown_marker_kind_is_ignored() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "role": "user",
            "content": [],
            "marker": {"kind": "something-else", "id": "x"}
        }))
        .unwrap();
        assert!(msg.marker.is_none());
    }

    #[test]
    fn float_timestamp_is_truncated() {
        let msg: ChatMessage =
            serde_json::from_value(json!({"role": "user", "timestamp": 1234.9})).unwrap();
        assert_eq!(msg.timestamp, 1234);
    }

    #[test]
    fn unknown_role_maps_to_other() {
        let msg: ChatMessage =
            serde_json::from_value(json!({"role": "toolResult", "content": []})).unwrap();
        assert_eq!(msg.role, Role::Other);
    }

    #[test]
    fn text_joins_text_blocks_only() {
        let msg = ChatMessage::new(
            Role::Assistant,
            vec![
                ContentBlock::text("one"),
                ContentBlock::Other(json!({"type": "thinking"})),
                ContentBlock::text("two"),
            ],
            1,
        );
        assert_eq!(msg.text(), "one\ntwo");
    }

    #[test]
    fn session_key_must_not_be_blank() {
        assert!(is_session_key("main"));
        assert!(!is_session_key(""));
        assert!(!is_session_key("   "));
    }
}
