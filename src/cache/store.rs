//! Versioned per-session cache on top of a [`KeyValueStore`].
//!
//! The whole cache is one JSON document under a single storage key:
//!
//! ```json
//! { "version": 1, "sessions": { "<session key>": { "draft": "...", "attachments": [], "voiceNotes": [] } } }
//! ```
//!
//! Reads fail soft: a missing, unparsable or wrong-version document reads
//! as empty and is never partially trusted. Writes fail soft too: backend
//! errors are logged and dropped, leaving in-memory state authoritative.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::backend::KeyValueStore;
use crate::attachment::{Attachment, LocalVoiceNote, patch_attachments};
use crate::config::CacheConfig;
use crate::message::is_session_key;

/// Version of the persisted cache document.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Cached state for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_notes: Option<Vec<LocalVoiceNote>>,
}

impl SessionCacheEntry {
    pub fn is_empty(&self) -> bool {
        self.draft.as_deref().is_none_or(str::is_empty)
            && self.attachments.as_ref().is_none_or(Vec::is_empty)
            && self.voice_notes.as_ref().is_none_or(Vec::is_empty)
    }

    /// Drop empty fields and cap lists to their most recent items.
    /// Returns `None` when nothing is left.
    fn normalized(mut self, max_attachments: usize, max_voice_notes: usize) -> Option<Self> {
        self.draft = self.draft.filter(|d| !d.is_empty());
        self.attachments = self
            .attachments
            .map(|list| keep_last(list, max_attachments))
            .filter(|list| !list.is_empty());
        self.voice_notes = self
            .voice_notes
            .map(|list| keep_last(list, max_voice_notes))
            .filter(|list| !list.is_empty());
        (!self.is_empty()).then_some(self)
    }
}

fn keep_last<T>(mut list: Vec<T>, cap: usize) -> Vec<T> {
    if list.len() > cap {
        list.drain(..list.len() - cap);
    }
    list
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    #[serde(default)]
    sessions: BTreeMap<String, SessionCacheEntry>,
}

impl Default for CacheDocument {
    fn default() -> Self {
        Self {
            version: CACHE_SCHEMA_VERSION,
            sessions: BTreeMap::new(),
        }
    }
}

/// Per-session draft / attachment / voice-note cache.
#[derive(Clone)]
pub struct LocalCacheStore {
    backend: Arc<dyn KeyValueStore>,
    storage_key: String,
    max_attachments: usize,
    max_voice_notes: usize,
}

impl LocalCacheStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, config: &CacheConfig) -> Self {
        Self {
            backend,
            storage_key: config.storage_key.clone(),
            max_attachments: config.max_attachments,
            max_voice_notes: config.max_voice_notes,
        }
    }

    async fn load_document(&self) -> CacheDocument {
        let raw = match self.backend.get_item(&self.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return CacheDocument::default(),
            Err(e) => {
                tracing::warn!(storage_key = %self.storage_key, error = %e, "session cache read failed");
                return CacheDocument::default();
            }
        };
        match serde_json::from_str::<CacheDocument>(&raw) {
            Ok(doc) if doc.version == CACHE_SCHEMA_VERSION => doc,
            Ok(doc) => {
                tracing::debug!(
                    found = doc.version,
                    expected = CACHE_SCHEMA_VERSION,
                    "session cache version mismatch, discarding"
                );
                CacheDocument::default()
            }
            Err(e) => {
                tracing::debug!(error = %e, "session cache unparsable, discarding");
                CacheDocument::default()
            }
        }
    }

    async fn save_document(&self, doc: &CacheDocument) {
        let raw = match serde_json::to_string(doc) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "session cache serialization failed");
                return;
            }
        };
        if let Err(e) = self.backend.set_item(&self.storage_key, &raw).await {
            tracing::warn!(storage_key = %self.storage_key, error = %e, "session cache write failed");
        }
    }

    /// The cached entry for a session, if any.
    pub async fn read(&self, session_key: &str) -> Option<SessionCacheEntry> {
        if !is_session_key(session_key) {
            return None;
        }
        self.load_document().await.sessions.remove(session_key)
    }

    /// Replace the entry for a session.
    pub async fn write(&self, session_key: &str, entry: SessionCacheEntry) {
        self.update(session_key, |_| Some(entry)).await;
    }

    /// Read-modify-write one session entry.
    ///
    /// `f` receives the current entry (empty when absent). Returning `None`,
    /// or an entry that normalizes to empty, removes the session.
    pub async fn update<F>(&self, session_key: &str, f: F)
    where
        F: FnOnce(SessionCacheEntry) -> Option<SessionCacheEntry> + Send,
    {
        if !is_session_key(session_key) {
            return;
        }
        let mut doc = self.load_document().await;
        let current = doc.sessions.remove(session_key).unwrap_or_default();
        if let Some(next) =
            f(current).and_then(|e| e.normalized(self.max_attachments, self.max_voice_notes))
        {
            doc.sessions.insert(session_key.to_owned(), next);
        }
        self.save_document(&doc).await;
    }

    /// Remove everything cached for a session.
    pub async fn remove(&self, session_key: &str) {
        self.update(session_key, |_| None).await;
    }

    pub async fn set_draft(&self, session_key: &str, draft: &str) {
        let draft = draft.to_owned();
        self.update(session_key, move |mut entry| {
            entry.draft = Some(draft);
            Some(entry)
        })
        .await;
    }

    pub async fn set_attachments(&self, session_key: &str, attachments: &[Attachment]) {
        let attachments = attachments.to_vec();
        self.update(session_key, move |mut entry| {
            entry.attachments = Some(attachments);
            Some(entry)
        })
        .await;
    }

    /// Clear the draft and pending attachments in one write.
    pub async fn clear_composer(&self, session_key: &str) {
        self.update(session_key, |mut entry| {
            entry.draft = None;
            entry.attachments = None;
            Some(entry)
        })
        .await;
    }

    /// Add a voice note to the ring, replacing any entry with the same id.
    pub async fn push_voice_note(&self, session_key: &str, note: LocalVoiceNote) {
        self.update(session_key, move |mut entry| {
            let mut notes = entry.voice_notes.take().unwrap_or_default();
            notes.retain(|existing| existing.id != note.id);
            notes.push(note);
            entry.voice_notes = Some(notes);
            Some(entry)
        })
        .await;
    }

    /// Record a durable note id on the cached voice note and on the
    /// matching pending attachment.
    pub async fn patch_voice_note(&self, session_key: &str, attachment_id: &str, note_id: &str) {
        let (attachment_id, note_id) = (attachment_id.to_owned(), note_id.to_owned());
        self.update(session_key, move |mut entry| {
            if let Some(notes) = entry.voice_notes.as_mut() {
                for note in notes.iter_mut().filter(|n| n.id == attachment_id) {
                    note.attachment.set_persisted_note_id(&note_id);
                }
            }
            if let Some(attachments) = entry.attachments.as_mut() {
                patch_attachments(attachments, &attachment_id, &note_id);
            }
            Some(entry)
        })
        .await;
    }

    /// Cached voice notes for a session, oldest first.
    pub async fn voice_notes(&self, session_key: &str) -> Vec<LocalVoiceNote> {
        self.read(session_key)
            .await
            .and_then(|entry| entry.voice_notes)
            .unwrap_or_default()
    }
}
