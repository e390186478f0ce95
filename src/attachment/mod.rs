//! Attachments and their lifecycle from capture to durable persistence.

pub mod lifecycle;
pub mod transcript;
pub mod types;

pub use lifecycle::{AttachmentState, VoiceNotePersister, patch_attachments, patch_history};
pub use transcript::compose_outbound_text;
pub use types::{Attachment, AttachmentKind, AttachmentSource, LocalVoiceNote};
