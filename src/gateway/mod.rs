//! Gateway RPC boundary.
//!
//! The controller talks to the remote agent backend only through
//! [`GatewayClient::request`]. Transport framing, authentication and
//! reconnection live on the other side of this trait.
//!
//! Typed wrappers for each method the controller uses are in [`api`];
//! [`recording::RecordingGateway`] is an in-process fake for tests and
//! offline hosts.

pub mod api;
pub mod recording;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use api::{
    AbortParams, AgentIdentity, AudioPayload, HistoryPage, HistoryParams, IdentityParams,
    OutboundAttachment, SaveVoiceNoteParams, SavedVoiceNote, SendParams, SessionSummary,
    SessionsListParams, SessionsPage,
};
pub use recording::RecordingGateway;

/// Request/response endpoint of the remote gateway.
///
/// Implementations return [`crate::error::ChatError::Transport`] when the
/// request could not be delivered and [`crate::error::ChatError::Gateway`]
/// when the backend rejected it.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Issue one request and wait for its result payload.
    async fn request(&self, method: &str, params: Value) -> Result<Value>;
}

/// Gateway methods used by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodName {
    ChatHistory,
    ChatSend,
    ChatAbort,
    VoiceNotesSave,
    SessionsList,
    AgentIdentity,
}

impl MethodName {
    /// Render method name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChatHistory => "chat.history",
            Self::ChatSend => "chat.send",
            Self::ChatAbort => "chat.abort",
            Self::VoiceNotesSave => "voice_notes.save",
            Self::SessionsList => "sessions.list",
            Self::AgentIdentity => "agent.identity",
        }
    }

    /// Parse a method name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "chat.history" => Some(Self::ChatHistory),
            "chat.send" => Some(Self::ChatSend),
            "chat.abort" => Some(Self::ChatAbort),
            "voice_notes.save" => Some(Self::VoiceNotesSave),
            "sessions.list" => Some(Self::SessionsList),
            "agent.identity" => Some(Self::AgentIdentity),
            _ => None,
        }
    }
}
