//! Durable voice-note persistence.
//!
//! ```text
//! Captured ──persist──▶ Persisting ──ok──▶ Persisted { note_id }
//!                            │
//!                            └──err──▶ Failed { error }   (local copy kept)
//! ```
//!
//! [`VoiceNotePersister`] serializes persistence per attachment id and
//! remembers every id the backend handed out, so concurrent or repeated
//! requests for the same attachment issue exactly one durable save.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::types::Attachment;
use crate::error::{ChatError, Result};
use crate::gateway::GatewayClient;
use crate::gateway::api::{self, SaveVoiceNoteParams};
use crate::message::ChatMessage;

/// Lifecycle state of one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentState {
    Captured,
    Persisting,
    Persisted { note_id: String },
    Failed { error: String },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Persists voice notes through `voice_notes.save`, at most once per id.
pub struct VoiceNotePersister {
    gateway: Arc<dyn GatewayClient>,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    persisted: Mutex<HashMap<String, String>>,
    states: Mutex<HashMap<String, AttachmentState>>,
}

impl VoiceNotePersister {
    pub fn new(gateway: Arc<dyn GatewayClient>) -> Self {
        Self {
            gateway,
            gates: Mutex::new(HashMap::new()),
            persisted: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Current state of an attachment, if it is known.
    pub fn state(&self, attachment_id: &str) -> Option<AttachmentState> {
        lock(&self.states).get(attachment_id).cloned()
    }

    pub fn mark_captured(&self, attachment_id: &str) {
        lock(&self.states)
            .entry(attachment_id.to_owned())
            .or_insert(AttachmentState::Captured);
    }

    /// Drop tracking for an attachment removed before it was sent.
    pub fn forget(&self, attachment_id: &str) {
        lock(&self.states).remove(attachment_id);
        let mut gates = lock(&self.gates);
        if gates
            .get(attachment_id)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            gates.remove(attachment_id);
        }
    }

    fn set_state(&self, attachment_id: &str, state: AttachmentState) {
        lock(&self.states).insert(attachment_id.to_owned(), state);
    }

    fn gate(&self, attachment_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.gates)
            .entry(attachment_id.to_owned())
            .or_default()
            .clone()
    }

    /// Drop the gate for `attachment_id` unless another call is waiting on it.
    fn release_gate(&self, attachment_id: &str, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut gates = lock(&self.gates);
        let ours = gates
            .get(attachment_id)
            .is_some_and(|current| Arc::ptr_eq(current, gate));
        // One reference in the map, one held by the caller.
        if ours && Arc::strong_count(gate) <= 2 {
            gates.remove(attachment_id);
        }
    }

    fn known_note_id(&self, attachment_id: &str) -> Option<String> {
        lock(&self.persisted).get(attachment_id).cloned()
    }

    /// Durably save a voice note and return its note id.
    ///
    /// Returns the existing id without a gateway call when the attachment
    /// already carries one, or when an earlier call for the same id already
    /// succeeded. Concurrent calls for one id wait for the first to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Media`] for non-voice-note attachments and the
    /// gateway error when the save fails. The attachment moves to
    /// [`AttachmentState::Failed`] and can be retried.
    pub async fn persist(&self, session_key: &str, attachment: &Attachment) -> Result<String> {
        if let Some(note_id) = &attachment.persisted_note_id {
            return Ok(note_id.clone());
        }
        if !attachment.is_voice_note() {
            return Err(ChatError::Media(format!(
                "attachment {} is not a voice note",
                attachment.id
            )));
        }

        let gate = self.gate(&attachment.id);
        let _guard = gate.lock().await;
        if let Some(note_id) = self.known_note_id(&attachment.id) {
            self.release_gate(&attachment.id, &gate);
            return Ok(note_id);
        }

        self.set_state(&attachment.id, AttachmentState::Persisting);
        let params = SaveVoiceNoteParams::from_attachment(session_key, attachment);
        match api::save_voice_note(self.gateway.as_ref(), &params).await {
            Ok(note_id) => {
                lock(&self.persisted).insert(attachment.id.clone(), note_id.clone());
                self.set_state(
                    &attachment.id,
                    AttachmentState::Persisted {
                        note_id: note_id.clone(),
                    },
                );
                self.release_gate(&attachment.id, &gate);
                tracing::debug!(
                    attachment_id = %attachment.id,
                    note_id = %note_id,
                    "voice note persisted"
                );
                Ok(note_id)
            }
            Err(e) => {
                self.set_state(
                    &attachment.id,
                    AttachmentState::Failed {
                        error: e.message().to_owned(),
                    },
                );
                tracing::warn!(
                    attachment_id = %attachment.id,
                    session_key,
                    error = %e,
                    "voice note persistence failed, keeping local copy"
                );
                self.release_gate(&attachment.id, &gate);
                Err(e)
            }
        }
    }
}

/// Write `note_id` into the voice-note blocks of the history message
/// carrying the attachment's marker. Existing ids are left alone.
pub fn patch_history(messages: &mut [ChatMessage], attachment_id: &str, note_id: &str) -> bool {
    let mut patched = false;
    for message in messages
        .iter_mut()
        .filter(|m| m.marker_id() == Some(attachment_id))
    {
        for block in message.voice_notes_mut() {
            if block.persisted_note_id.is_none() {
                block.persisted_note_id = Some(note_id.to_owned());
                patched = true;
            }
        }
    }
    patched
}

/// Write `note_id` into the matching pending attachment.
pub fn patch_attachments(attachments: &mut [Attachment], attachment_id: &str, note_id: &str) -> bool {
    attachments
        .iter_mut()
        .filter(|a| a.id == attachment_id)
        .fold(false, |patched, a| a.set_persisted_note_id(note_id) || patched)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::attachment::types::{AttachmentSource, LocalVoiceNote};
    use crate::gateway::RecordingGateway;
    use crate::message::ContentBlock;

    fn recorded_note() -> Attachment {
        Attachment::voice_note("AUD", "audio/webm", AttachmentSource::Record).with_id("att-1")
    }

    fn persister() -> (Arc<RecordingGateway>, VoiceNotePersister) {
        let gateway = Arc::new(RecordingGateway::new());
        let persister = VoiceNotePersister::new(gateway.clone());
        (gateway, persister)
    }

    #[tokio::test]
    async fn already_persisted_attachment_skips_gateway() {
        let (gateway, persister) = persister();
        let mut att = recorded_note();
        att.set_persisted_note_id("n-existing");
        assert_eq!(persister.persist("main", &att).await.unwrap(), "n-existing");
        assert_eq!(persister.persist("main", &att).await.unwrap(), "n-existing");
        assert_eq!(gateway.count("voice_notes.save"), 0);
    }

    #[tokio::test]
    async fn second_persist_of_same_id_reuses_memo() {
        let (gateway, persister) = persister();
        let att = recorded_note();
        let first = persister.persist("main", &att).await.unwrap();
        let second = persister.persist("main", &att).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(gateway.count("voice_notes.save"), 1);
        assert_eq!(
            persister.state("att-1"),
            Some(AttachmentState::Persisted { note_id: first })
        );
    }

    #[tokio::test]
    async fn concurrent_persists_issue_one_save() {
        let (gateway, persister) = persister();
        let persister = Arc::new(persister);
        let release = gateway.hold_next("voice_notes.save");
        let att = recorded_note();

        let a = {
            let (p, att) = (persister.clone(), att.clone());
            tokio::spawn(async move { p.persist("main", &att).await })
        };
        while gateway.count("voice_notes.save") == 0 {
            tokio::task::yield_now().await;
        }
        let b = {
            let (p, att) = (persister.clone(), att.clone());
            tokio::spawn(async move { p.persist("main", &att).await })
        };
        assert_eq!(persister.state("att-1"), Some(AttachmentState::Persisting));
        release.send(()).unwrap();

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(gateway.count("voice_notes.save"), 1);
    }

    #[tokio::test]
    async fn failure_is_reported_and_retryable() {
        let (gateway, persister) = persister();
        gateway.script_err("voice_notes.save", ChatError::Transport("offline".into()));
        let att = recorded_note();
        persister.mark_captured(&att.id);
        assert_eq!(persister.state("att-1"), Some(AttachmentState::Captured));

        let err = persister.persist("main", &att).await.unwrap_err();
        assert_eq!(err.code(), "TRANSPORT_FAILED");
        assert_eq!(
            persister.state("att-1"),
            Some(AttachmentState::Failed {
                error: "offline".into()
            })
        );

        let note_id = persister.persist("main", &att).await.unwrap();
        assert_eq!(note_id, "note-1");
        assert_eq!(gateway.count("voice_notes.save"), 2);
    }

    #[tokio::test]
    async fn gates_are_released_after_failure_and_forget() {
        let (gateway, persister) = persister();
        gateway.script_err("voice_notes.save", ChatError::Transport("offline".into()));
        let att = recorded_note();
        persister.mark_captured(&att.id);

        assert!(persister.persist("main", &att).await.is_err());
        assert!(lock(&persister.gates).is_empty());

        persister.forget(&att.id);
        assert_eq!(persister.state("att-1"), None);
        assert!(lock(&persister.gates).is_empty());
    }

    #[tokio::test]
    async fn waiting_caller_releases_gate_after_memo_hit() {
        let (gateway, persister) = persister();
        let persister = Arc::new(persister);
        let release = gateway.hold_next("voice_notes.save");
        let att = recorded_note();

        let a = {
            let (p, att) = (persister.clone(), att.clone());
            tokio::spawn(async move { p.persist("main", &att).await })
        };
        while gateway.count("voice_notes.save") == 0 {
            tokio::task::yield_now().await;
        }
        let b = {
            let (p, att) = (persister.clone(), att.clone());
            tokio::spawn(async move { p.persist("main", &att).await })
        };
        tokio::task::yield_now().await;
        release.send(()).unwrap();

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert!(lock(&persister.gates).is_empty());
    }

    #[tokio::test]
    async fn images_are_not_persisted() {
        let (gateway, persister) = persister();
        let image = Attachment::image("IMG", "image/png");
        let err = persister.persist("main", &image).await.unwrap_err();
        assert_eq!(err.code(), "MEDIA_ERROR");
        assert_eq!(gateway.count("voice_notes.save"), 0);
    }

    #[test]
    fn patch_history_targets_marker_only() {
        let note = LocalVoiceNote::from_attachment(recorded_note(), 10);
        let other = LocalVoiceNote::from_attachment(
            Attachment::voice_note("AUD", "audio/webm", AttachmentSource::Record).with_id("att-2"),
            11,
        );
        let mut history = vec![
            ChatMessage::user_text("hi", 1),
            note.to_message(),
            other.to_message(),
        ];
        assert!(patch_history(&mut history, "att-1", "n1"));
        let ids: Vec<Option<String>> = history
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|b| match b {
                ContentBlock::VoiceNote(v) => Some(v.persisted_note_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![Some("n1".to_owned()), None]);
        assert!(!patch_history(&mut history, "att-1", "n2"));
    }

    #[test]
    fn patch_attachments_is_write_once() {
        let mut attachments = vec![recorded_note(), Attachment::image("IMG", "image/png")];
        assert!(patch_attachments(&mut attachments, "att-1", "n1"));
        assert!(!patch_attachments(&mut attachments, "att-1", "n2"));
        assert_eq!(attachments[0].persisted_note_id.as_deref(), Some("n1"));
        assert!(attachments[1].persisted_note_id.is_none());
    }
}
