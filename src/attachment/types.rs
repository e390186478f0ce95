//! Attachment and local voice-note types.

use serde::{Deserialize, Serialize};

use super::transcript;
use crate::message::{
    ChatMessage, ContentBlock, ImageBlock, MediaSource, MessageMarker, Role, VoiceNoteBlock,
};

/// What an attachment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachmentKind {
    Image,
    VoiceNote,
}

/// How the attachment entered the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentSource {
    /// Picked from the filesystem.
    Upload,
    /// Recorded in the client.
    Record,
}

impl AttachmentSource {
    /// Wire name of the source.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Record => "record",
        }
    }
}

/// A UI-scoped attachment awaiting send.
///
/// `persisted_note_id` is absent until the durable save completes. Once set
/// it never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Client-generated unique id.
    pub id: String,
    pub kind: AttachmentKind,
    /// Base64-encoded payload.
    pub data: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub source: AttachmentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_parts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_note_id: Option<String>,
}

impl Attachment {
    fn new(
        kind: AttachmentKind,
        data: impl Into<String>,
        mime_type: impl Into<String>,
        source: AttachmentSource,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            data: data.into(),
            mime_type: mime_type.into(),
            file_name: None,
            source,
            duration_ms: None,
            transcript: None,
            transcript_parts: None,
            persisted_note_id: None,
        }
    }

    /// An uploaded image.
    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::new(AttachmentKind::Image, data, mime_type, AttachmentSource::Upload)
    }

    /// A voice note, recorded or uploaded.
    pub fn voice_note(
        data: impl Into<String>,
        mime_type: impl Into<String>,
        source: AttachmentSource,
    ) -> Self {
        Self::new(AttachmentKind::VoiceNote, data, mime_type, source)
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    #[must_use]
    pub fn with_transcript_parts(mut self, parts: Vec<String>) -> Self {
        self.transcript_parts = Some(parts);
        self
    }

    pub fn is_voice_note(&self) -> bool {
        self.kind == AttachmentKind::VoiceNote
    }

    /// Transcript text after normalization, if any survives.
    pub fn resolved_transcript(&self) -> Option<String> {
        transcript::resolve(self.transcript.as_deref(), self.transcript_parts.as_deref())
    }

    /// Record the durable note id.
    ///
    /// Returns false (and changes nothing) when an id is already set.
    pub fn set_persisted_note_id(&mut self, note_id: &str) -> bool {
        if self.persisted_note_id.is_some() {
            return false;
        }
        self.persisted_note_id = Some(note_id.to_owned());
        true
    }

    /// The content block rendering this attachment inside a message.
    pub fn to_content_block(&self) -> ContentBlock {
        let source = MediaSource::Base64 {
            data: self.data.clone(),
        };
        match self.kind {
            AttachmentKind::Image => ContentBlock::Image(ImageBlock {
                mime_type: self.mime_type.clone(),
                source,
            }),
            AttachmentKind::VoiceNote => ContentBlock::VoiceNote(VoiceNoteBlock {
                mime_type: self.mime_type.clone(),
                source,
                file_name: self.file_name.clone(),
                transcript: self.resolved_transcript(),
                transcript_parts: self.transcript_parts.clone(),
                persisted_note_id: self.persisted_note_id.clone(),
            }),
        }
    }
}

/// A locally captured voice note kept in the session cache ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVoiceNote {
    /// Same as the attachment id.
    pub id: String,
    /// Capture time, Unix epoch milliseconds.
    pub timestamp: i64,
    pub attachment: Attachment,
}

impl LocalVoiceNote {
    pub fn from_attachment(attachment: Attachment, timestamp: i64) -> Self {
        Self {
            id: attachment.id.clone(),
            timestamp,
            attachment,
        }
    }

    /// The history message standing in for this note until the gateway
    /// echoes it back.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::new(
            Role::User,
            vec![self.attachment.to_content_block()],
            self.timestamp,
        )
        .with_marker(MessageMarker::LocalVoiceNote {
            id: self.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn attachment_ids_are_unique() {
        let a = Attachment::image("AAAA", "image/png");
        let b = Attachment::image("AAAA", "image/png");
        assert_ne!(a.id, b.id);
        assert_eq!(a.source, AttachmentSource::Upload);
    }

    #[test]
    fn persisted_note_id_is_write_once() {
        let mut att = Attachment::voice_note("AAAA", "audio/webm", AttachmentSource::Record);
        assert!(att.set_persisted_note_id("n1"));
        assert!(!att.set_persisted_note_id("n2"));
        assert_eq!(att.persisted_note_id.as_deref(), Some("n1"));
    }

    #[test]
    fn serializes_with_camel_case_and_kebab_kind() {
        let att = Attachment::voice_note("AAAA", "audio/webm", AttachmentSource::Record)
            .with_id("att-1")
            .with_duration_ms(1500);
        let json = serde_json::to_value(&att).unwrap();
        assert_eq!(json["kind"], "voice-note");
        assert_eq!(json["mimeType"], "audio/webm");
        assert_eq!(json["durationMs"], 1500);
        assert_eq!(json["source"], "record");
        assert!(json.get("persistedNoteId").is_none());
    }

    #[test]
    fn local_note_message_carries_marker_and_block() {
        let att = Attachment::voice_note("AAAA", "audio/webm", AttachmentSource::Record)
            .with_id("att-7")
            .with_file_name("memo.webm")
            .with_transcript_parts(vec![" hi ".into()]);
        let note = LocalVoiceNote::from_attachment(att, 42);
        let msg = note.to_message();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.timestamp, 42);
        assert_eq!(msg.marker_id(), Some("att-7"));
        match &msg.content[0] {
            ContentBlock::VoiceNote(block) => {
                assert_eq!(block.file_name.as_deref(), Some("memo.webm"));
                assert_eq!(block.transcript.as_deref(), Some("hi"));
                assert!(block.persisted_note_id.is_none());
            }
            other => unreachable!("expected voice note block, got {other:?}"),
        }
    }

    #[test]
    fn image_renders_as_image_block() {
        let att = Attachment::image("BBBB", "image/jpeg");
        match att.to_content_block() {
            ContentBlock::Image(image) => {
                assert_eq!(image.mime_type, "image/jpeg");
                assert_eq!(
                    image.source,
                    MediaSource::Base64 {
                        data: "BBBB".into()
                    }
                );
            }
            other => unreachable!("expected image block, got {other:?}"),
        }
    }
}
