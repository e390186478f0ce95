//! Error types for the chat session controller.
//!
//! Each error variant carries a stable error code (SCREAMING_SNAKE_CASE)
//! that is included in the Display output and accessible via [`ChatError::code()`].
//! Codes are part of the public API contract and will not change.

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Invalid or missing configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// The gateway request could not be delivered or no reply arrived.
    pub const TRANSPORT_FAILED: &str = "TRANSPORT_FAILED";

    /// The gateway rejected the request.
    pub const GATEWAY_REJECTED: &str = "GATEWAY_REJECTED";

    /// The gateway replied with a payload of the wrong shape.
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";

    /// The key-value storage backend failed.
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";

    /// Media capture or encoding failed.
    pub const MEDIA_ERROR: &str = "MEDIA_ERROR";

    /// A run is already bound to the controller.
    pub const RUN_ACTIVE: &str = "RUN_ACTIVE";

    /// No session key is selected.
    pub const NO_SESSION: &str = "NO_SESSION";

    /// The gateway connection is down.
    pub const DISCONNECTED: &str = "DISCONNECTED";
}

/// Errors produced by the chat controller and its collaborators.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Invalid or missing configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Transport-level failure talking to the gateway.
    #[error("[{}] {}", error_codes::TRANSPORT_FAILED, .0)]
    Transport(String),

    /// Application-level rejection from the gateway.
    #[error("[{}] {}", error_codes::GATEWAY_REJECTED, .0)]
    Gateway(String),

    /// Malformed gateway payload.
    #[error("[{}] {}", error_codes::PROTOCOL_ERROR, .0)]
    Protocol(String),

    /// Storage backend failure (quota exceeded, unavailable, I/O).
    #[error("[{}] {}", error_codes::STORAGE_ERROR, .0)]
    Storage(String),

    /// Media capture or encoding failure.
    #[error("[{}] {}", error_codes::MEDIA_ERROR, .0)]
    Media(String),

    /// A second run was started while one is active.
    #[error("[{}] {}", error_codes::RUN_ACTIVE, .0)]
    RunActive(String),

    /// The session key is empty or whitespace-only.
    #[error("[{}] {}", error_codes::NO_SESSION, .0)]
    NoSession(String),

    /// The gateway is not connected.
    #[error("[{}] {}", error_codes::DISCONNECTED, .0)]
    Disconnected(String),
}

impl ChatError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Transport(_) => error_codes::TRANSPORT_FAILED,
            Self::Gateway(_) => error_codes::GATEWAY_REJECTED,
            Self::Protocol(_) => error_codes::PROTOCOL_ERROR,
            Self::Storage(_) => error_codes::STORAGE_ERROR,
            Self::Media(_) => error_codes::MEDIA_ERROR,
            Self::RunActive(_) => error_codes::RUN_ACTIVE,
            Self::NoSession(_) => error_codes::NO_SESSION,
            Self::Disconnected(_) => error_codes::DISCONNECTED,
        }
    }

    /// Returns the inner message without the code prefix.
    ///
    /// This is the text surfaced to the UI as the last error.
    pub fn message(&self) -> &str {
        match self {
            Self::Config(m)
            | Self::Transport(m)
            | Self::Gateway(m)
            | Self::Protocol(m)
            | Self::Storage(m)
            | Self::Media(m)
            | Self::RunActive(m)
            | Self::NoSession(m)
            | Self::Disconnected(m) => m,
        }
    }

    /// Returns true if retrying the same operation later may succeed.
    ///
    /// Transport failures, storage hiccups and a dropped connection are
    /// transient; rejections and malformed payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Storage(_) | Self::Disconnected(_) => true,
            Self::RunActive(_) => true,
            Self::Config(_)
            | Self::Gateway(_)
            | Self::Protocol(_)
            | Self::Media(_)
            | Self::NoSession(_) => false,
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_prefix() {
        let err = ChatError::Transport("socket closed".into());
        let display = format!("{err}");
        assert!(display.starts_with("[TRANSPORT_FAILED]"));
        assert!(display.contains("socket closed"));
    }

    #[test]
    fn message_returns_inner_text() {
        let err = ChatError::Gateway("unknown session".into());
        assert_eq!(err.message(), "unknown session");
    }

    #[test]
    fn all_codes_are_screaming_snake_case() {
        let errors = [
            ChatError::Config("x".into()),
            ChatError::Transport("x".into()),
            ChatError::Gateway("x".into()),
            ChatError::Protocol("x".into()),
            ChatError::Storage("x".into()),
            ChatError::Media("x".into()),
            ChatError::RunActive("x".into()),
            ChatError::NoSession("x".into()),
            ChatError::Disconnected("x".into()),
        ];
        for err in &errors {
            let code = err.code();
            assert!(
                code.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
                "code {code:?} is not SCREAMING_SNAKE_CASE"
            );
        }
    }

    #[test]
    fn retryable_split() {
        assert!(ChatError::Transport("x".into()).is_retryable());
        assert!(ChatError::Disconnected("x".into()).is_retryable());
        assert!(!ChatError::Gateway("x".into()).is_retryable());
        assert!(!ChatError::Protocol("x".into()).is_retryable());
        assert!(!ChatError::NoSession("x".into()).is_retryable());
    }

    #[test]
    fn serde_error_maps_to_protocol() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("not json");
        let err = match parse {
            Err(e) => ChatError::from(e),
            Ok(_) => unreachable!("parse should fail"),
        };
        assert_eq!(err.code(), "PROTOCOL_ERROR");
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChatError>();
    }
}
