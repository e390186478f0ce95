//! Typed params/results for the gateway methods the controller calls.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{GatewayClient, MethodName};
use crate::attachment::{Attachment, AttachmentKind, AttachmentSource, transcript};
use crate::error::{ChatError, Result};
use crate::message::ChatMessage;

async fn call<P, R>(gateway: &dyn GatewayClient, method: MethodName, params: &P) -> Result<R>
where
    P: Serialize + Sync,
    R: DeserializeOwned,
{
    let params = serde_json::to_value(params)?;
    let raw = gateway.request(method.as_str(), params).await?;
    serde_json::from_value(raw).map_err(|e| {
        ChatError::Protocol(format!("{} returned a malformed payload: {e}", method.as_str()))
    })
}

// ── chat.history ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub session_key: String,
    pub limit: u32,
}

/// One page of authoritative history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default, deserialize_with = "deserialize_messages")]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
}

/// Skips individual messages that do not parse instead of failing the page.
fn deserialize_messages<'de, D>(deserializer: D) -> std::result::Result<Vec<ChatMessage>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed history message");
                None
            }
        })
        .collect())
}

/// Fetch the authoritative history of a session.
pub async fn fetch_history(
    gateway: &dyn GatewayClient,
    session_key: &str,
    limit: u32,
) -> Result<HistoryPage> {
    let params = HistoryParams {
        session_key: session_key.to_owned(),
        limit,
    };
    call(gateway, MethodName::ChatHistory, &params).await
}

// ── chat.send ───────────────────────────────────────────────────

/// An attachment as the gateway receives it with `chat.send`.
///
/// Voice notes that already have a durable copy travel by `noteId` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundAttachment {
    Image {
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        content: String,
    },
    VoiceNote {
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
}

impl From<&Attachment> for OutboundAttachment {
    fn from(attachment: &Attachment) -> Self {
        match attachment.kind {
            AttachmentKind::Image => Self::Image {
                mime_type: attachment.mime_type.clone(),
                file_name: attachment.file_name.clone(),
                content: attachment.data.clone(),
            },
            AttachmentKind::VoiceNote => Self::VoiceNote {
                mime_type: attachment.mime_type.clone(),
                file_name: attachment.file_name.clone(),
                content: attachment
                    .persisted_note_id
                    .is_none()
                    .then(|| attachment.data.clone()),
                note_id: attachment.persisted_note_id.clone(),
                transcript: attachment.resolved_transcript(),
                duration_ms: attachment.duration_ms,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendParams {
    pub session_key: String,
    pub message: String,
    /// Always false: replies stream back as push events.
    pub deliver: bool,
    /// The client-generated run id.
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<OutboundAttachment>>,
}

impl SendParams {
    pub fn new(session_key: &str, message: &str, run_id: &str, attachments: &[Attachment]) -> Self {
        Self {
            session_key: session_key.to_owned(),
            message: message.to_owned(),
            deliver: false,
            idempotency_key: run_id.to_owned(),
            attachments: (!attachments.is_empty())
                .then(|| attachments.iter().map(OutboundAttachment::from).collect()),
        }
    }
}

/// Submit a user message. The result payload is opaque to the controller.
pub async fn send_message(gateway: &dyn GatewayClient, params: &SendParams) -> Result<Value> {
    call(gateway, MethodName::ChatSend, params).await
}

// ── chat.abort ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortParams {
    pub session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Ask the gateway to stop a run. Best effort; confirmation arrives as an
/// `aborted` or `error` push event.
pub async fn abort_run(
    gateway: &dyn GatewayClient,
    session_key: &str,
    run_id: Option<&str>,
) -> Result<()> {
    let params = AbortParams {
        session_key: session_key.to_owned(),
        run_id: run_id.map(str::to_owned),
    };
    let _: Value = call(gateway, MethodName::ChatAbort, &params).await?;
    Ok(())
}

// ── voice_notes.save ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPayload {
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Base64 audio.
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveVoiceNoteParams {
    pub session_key: String,
    pub source: AttachmentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_parts: Option<Vec<String>>,
    pub audio: AudioPayload,
}

impl SaveVoiceNoteParams {
    /// Build the durable-save request for a voice-note attachment.
    ///
    /// Transcript parts are sent normalized; the free-form transcript is the
    /// resolved text.
    pub fn from_attachment(session_key: &str, attachment: &Attachment) -> Self {
        let parts = attachment
            .transcript_parts
            .as_deref()
            .map(transcript::normalize_parts)
            .filter(|parts| !parts.is_empty());
        Self {
            session_key: session_key.to_owned(),
            source: attachment.source,
            duration_ms: attachment.duration_ms,
            transcript: attachment.resolved_transcript(),
            transcript_parts: parts,
            audio: AudioPayload {
                mime_type: attachment.mime_type.clone(),
                file_name: attachment.file_name.clone(),
                content: attachment.data.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedNote {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedVoiceNote {
    pub note: SavedNote,
}

/// Durably save a voice note, returning the backend-assigned note id.
pub async fn save_voice_note(
    gateway: &dyn GatewayClient,
    params: &SaveVoiceNoteParams,
) -> Result<String> {
    let saved: SavedVoiceNote = call(gateway, MethodName::VoiceNotesSave, params).await?;
    if saved.note.id.trim().is_empty() {
        return Err(ChatError::Protocol(
            "voice_notes.save returned an empty note id".into(),
        ));
    }
    Ok(saved.note.id)
}

// ── sessions.list ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsListParams {
    pub limit: u32,
}

/// One row of the session list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionsPage {
    #[serde(default)]
    pub sessions: Vec<SessionSummary>,
}

pub async fn list_sessions(gateway: &dyn GatewayClient, limit: u32) -> Result<SessionsPage> {
    call(gateway, MethodName::SessionsList, &SessionsListParams { limit }).await
}

// ── agent.identity ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityParams {
    pub session_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

pub async fn fetch_identity(gateway: &dyn GatewayClient, session_key: &str) -> Result<AgentIdentity> {
    let params = IdentityParams {
        session_key: session_key.to_owned(),
    };
    call(gateway, MethodName::AgentIdentity, &params).await
}
