//! Chat session controller.
//!
//! [`ChatController`] owns the per-session chat state (history, composer,
//! queue, active run) and coordinates the gateway, the local cache and the
//! voice-note persister. All methods take `&self`: state sits behind a
//! mutex that is released before every gateway request, so push events
//! delivered through [`ChatController::handle_event`] interleave with an
//! in-flight send.
//!
//! # Send flow
//!
//! ```text
//! send ──▶ stop command? ──▶ chat.abort
//!   │
//!   ├──▶ busy? ──▶ queue (FIFO)
//!   │
//!   └──▶ persist voice notes ──▶ optimistic bubble ──▶ chat.send
//!                                        │                 │
//!                                        │      failure: roll back bubble,
//!                                        │      draft and attachments
//!                                        ▼
//!        final / aborted / error ──▶ reload history, flush queue
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::attachment::{
    Attachment, AttachmentState, LocalVoiceNote, VoiceNotePersister, compose_outbound_text,
    patch_attachments, patch_history,
};
use crate::cache::{KeyValueStore, LocalCacheStore};
use crate::commands::{is_reset_command, is_stop_command};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::gateway::api::{self, SendParams};
use crate::gateway::{GatewayClient, SessionSummary};
use crate::history::{local_voice_note_messages, merge_history};
use crate::message::{ChatMessage, ContentBlock, Role, is_session_key, now_millis};
use crate::queue::{QueuedMessage, SendQueue};
use crate::run::event::message_from_stream;
use crate::run::{ChatEvent, RunMachine, RunOutcome};

/// Options for [`ChatController::send`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendRequest {
    /// Send this text instead of the composer draft. The draft and pending
    /// attachments are left alone.
    pub message: Option<String>,
    /// Put the pre-send draft back into an empty composer once the send is
    /// accepted.
    pub restore_draft: bool,
}

impl SendRequest {
    /// Send the composer draft and pending attachments.
    pub fn draft() -> Self {
        Self::default()
    }

    /// Send `message` instead of the draft.
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            restore_draft: false,
        }
    }

    #[must_use]
    pub fn with_restore_draft(mut self) -> Self {
        self.restore_draft = true;
        self
    }
}

/// What [`ChatController::send`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing to send.
    Skipped,
    /// The text was a stop command; an abort was requested.
    AbortRequested,
    /// Busy; the message waits in the queue under this id.
    Queued { id: String },
    /// `chat.send` accepted the run.
    Sent { run_id: String },
}

/// Read-only view of controller state for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    pub session_key: String,
    pub connected: bool,
    pub messages: Vec<ChatMessage>,
    pub draft: String,
    pub attachments: Vec<Attachment>,
    pub queue: Vec<QueuedMessage>,
    pub run_id: Option<String>,
    pub stream: Option<String>,
    pub stream_started_at: Option<i64>,
    pub sending: bool,
    pub loading: bool,
    pub last_error: Option<String>,
    pub thinking_level: Option<String>,
    pub sessions: Vec<SessionSummary>,
    pub avatar: Option<String>,
}

#[derive(Debug)]
struct ChatState {
    session_key: String,
    connected: bool,
    messages: Vec<ChatMessage>,
    draft: String,
    attachments: Vec<Attachment>,
    queue: SendQueue,
    run: RunMachine,
    sending: bool,
    loading: bool,
    last_error: Option<String>,
    thinking_level: Option<String>,
    sessions: Vec<SessionSummary>,
    avatar: Option<String>,
    /// Runs started by `/new` or `/reset`.
    refresh_after: HashSet<String>,
}

impl ChatState {
    fn busy(&self) -> bool {
        self.sending || self.run.is_active()
    }

    fn clear_session(&mut self, session_key: String) {
        self.session_key = session_key;
        self.messages.clear();
        self.draft.clear();
        self.attachments.clear();
        self.queue.clear();
        self.run.reset();
        self.last_error = None;
        self.thinking_level = None;
        self.refresh_after.clear();
        self.loading = false;
    }
}

/// Composer state to put back when a send fails.
#[derive(Debug)]
struct Rollback {
    draft: String,
    attachments: Vec<Attachment>,
}

#[derive(Debug)]
struct Outbound {
    session_key: String,
    text: String,
    attachments: Vec<Attachment>,
    refresh_sessions: bool,
    rollback: Option<Rollback>,
    restore_draft: Option<String>,
}

enum Prepared {
    Abort,
    Skip,
    Queued(String),
    Send(Outbound),
}

/// Client-side controller for one chat view.
pub struct ChatController {
    config: ChatConfig,
    gateway: Arc<dyn GatewayClient>,
    cache: LocalCacheStore,
    persister: VoiceNotePersister,
    state: Mutex<ChatState>,
}

impl ChatController {
    /// Build a controller for `session_key` and restore its cached composer.
    ///
    /// The controller starts disconnected; call
    /// [`set_connected`](Self::set_connected) once the transport is up.
    /// For an on-disk cache pass
    /// [`FsKeyValueStore::from_config`](crate::cache::FsKeyValueStore::from_config)
    /// as `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] when `config` fails validation.
    pub async fn open(
        config: ChatConfig,
        gateway: Arc<dyn GatewayClient>,
        storage: Arc<dyn KeyValueStore>,
        session_key: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = LocalCacheStore::new(storage, &config.cache);
        let state = ChatState {
            session_key: String::new(),
            connected: false,
            messages: Vec::new(),
            draft: String::new(),
            attachments: Vec::new(),
            queue: SendQueue::new(),
            run: RunMachine::new(config.run.default_error_message.clone()),
            sending: false,
            loading: false,
            last_error: None,
            thinking_level: None,
            sessions: Vec::new(),
            avatar: None,
            refresh_after: HashSet::new(),
        };
        let controller = Self {
            persister: VoiceNotePersister::new(gateway.clone()),
            config,
            gateway,
            cache,
            state: Mutex::new(state),
        };
        controller.set_session_key(session_key).await;
        Ok(controller)
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> ChatSnapshot {
        let state = self.state.lock().await;
        ChatSnapshot {
            session_key: state.session_key.clone(),
            connected: state.connected,
            messages: state.messages.clone(),
            draft: state.draft.clone(),
            attachments: state.attachments.clone(),
            queue: state.queue.items(),
            run_id: state.run.run_id().map(str::to_owned),
            stream: state.run.stream().map(str::to_owned),
            stream_started_at: state.run.started_at(),
            sending: state.sending,
            loading: state.loading,
            last_error: state.last_error.clone(),
            thinking_level: state.thinking_level.clone(),
            sessions: state.sessions.clone(),
            avatar: state.avatar.clone(),
        }
    }

    pub async fn session_key(&self) -> String {
        self.state.lock().await.session_key.clone()
    }

    /// Lifecycle state of a captured attachment.
    pub fn attachment_state(&self, attachment_id: &str) -> Option<AttachmentState> {
        self.persister.state(attachment_id)
    }

    /// Update the connectivity signal. Reconnecting flushes the queue.
    pub async fn set_connected(&self, connected: bool) {
        let was_connected = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut state.connected, connected)
        };
        if connected && !was_connected {
            tracing::debug!("gateway connected, flushing send queue");
            self.flush_queue().await;
        }
    }

    /// Switch to another session.
    ///
    /// Drops the run, queue and history of the previous session and
    /// restores the new session's draft and attachments from the cache.
    /// Call [`refresh`](Self::refresh) afterwards to load its history.
    pub async fn set_session_key(&self, session_key: impl Into<String>) {
        let session_key = session_key.into();
        {
            let mut state = self.state.lock().await;
            if state.session_key == session_key {
                return;
            }
            if let Some(run) = state.run.active() {
                tracing::debug!(run_id = %run.run_id, "dropping active run on session switch");
            }
            state.clear_session(session_key.clone());
        }
        tracing::info!(session_key = %session_key, "chat session selected");

        let Some(entry) = self.cache.read(&session_key).await else {
            return;
        };
        let attachments = entry.attachments.unwrap_or_default();
        for attachment in attachments
            .iter()
            .filter(|a| a.is_voice_note() && a.persisted_note_id.is_none())
        {
            self.persister.mark_captured(&attachment.id);
        }
        let mut state = self.state.lock().await;
        if state.session_key == session_key {
            state.draft = entry.draft.unwrap_or_default();
            state.attachments = attachments;
        }
    }

    /// Replace the composer draft.
    pub async fn set_draft(&self, draft: impl Into<String>) {
        let draft = draft.into();
        let session_key = {
            let mut state = self.state.lock().await;
            state.draft.clone_from(&draft);
            state.session_key.clone()
        };
        self.cache.set_draft(&session_key, &draft).await;
    }

    /// Replace the pending attachments.
    pub async fn set_attachments(&self, attachments: Vec<Attachment>) {
        let (session_key, removed) = {
            let mut state = self.state.lock().await;
            let keep: HashSet<&str> = attachments.iter().map(|a| a.id.as_str()).collect();
            let removed: Vec<String> = state
                .attachments
                .iter()
                .filter(|a| !keep.contains(a.id.as_str()))
                .map(|a| a.id.clone())
                .collect();
            state.attachments.clone_from(&attachments);
            (state.session_key.clone(), removed)
        };
        for id in &removed {
            if !matches!(self.persister.state(id), Some(AttachmentState::Persisted { .. })) {
                self.persister.forget(id);
            }
        }
        self.cache.set_attachments(&session_key, &attachments).await;
    }

    /// Add a selected attachment. Voice notes go through
    /// [`capture_voice_note`](Self::capture_voice_note).
    ///
    /// # Errors
    ///
    /// Only voice notes can fail, see `capture_voice_note`.
    pub async fn add_attachment(&self, attachment: Attachment) -> Result<()> {
        if attachment.is_voice_note() {
            return self.capture_voice_note(attachment).await.map(|_| ());
        }
        let (session_key, attachments) = {
            let mut state = self.state.lock().await;
            state.attachments.push(attachment);
            (state.session_key.clone(), state.attachments.clone())
        };
        self.cache.set_attachments(&session_key, &attachments).await;
        Ok(())
    }

    /// Capture a voice note: show it in history, cache it, attach it to
    /// the composer, then try to persist it durably.
    ///
    /// The note stays usable when persistence fails; the error is returned
    /// so the UI can report it, and the save is retried at send time.
    ///
    /// # Errors
    ///
    /// [`ChatError::NoSession`] or [`ChatError::Media`] before capture;
    /// the durable-save error after capture.
    pub async fn capture_voice_note(&self, attachment: Attachment) -> Result<String> {
        if !attachment.is_voice_note() {
            return Err(ChatError::Media(format!(
                "attachment {} is not a voice note",
                attachment.id
            )));
        }
        let note = LocalVoiceNote::from_attachment(attachment.clone(), now_millis());
        let (session_key, attachments) = {
            let mut state = self.state.lock().await;
            if !is_session_key(&state.session_key) {
                return Err(ChatError::NoSession("no chat session selected".into()));
            }
            state.messages.push(note.to_message());
            state.attachments.push(attachment.clone());
            (state.session_key.clone(), state.attachments.clone())
        };
        self.persister.mark_captured(&attachment.id);
        self.cache.push_voice_note(&session_key, note).await;
        self.cache.set_attachments(&session_key, &attachments).await;
        self.persist_voice_note(&session_key, &attachment).await
    }

    /// Persist one voice note and patch its id everywhere it is shown.
    async fn persist_voice_note(&self, session_key: &str, attachment: &Attachment) -> Result<String> {
        let note_id = self.persister.persist(session_key, attachment).await?;
        {
            let mut state = self.state.lock().await;
            if state.session_key == session_key {
                patch_history(&mut state.messages, &attachment.id, &note_id);
                patch_attachments(&mut state.attachments, &attachment.id, &note_id);
            }
        }
        self.cache
            .patch_voice_note(session_key, &attachment.id, &note_id)
            .await;
        Ok(note_id)
    }

    /// Send the draft (or an override message).
    ///
    /// # Errors
    ///
    /// [`ChatError::Disconnected`] / [`ChatError::NoSession`] when nothing
    /// can be sent, otherwise the `chat.send` or `chat.abort` failure. A
    /// failed send has already been rolled back and recorded as the last
    /// error.
    pub async fn send(&self, request: SendRequest) -> Result<SendOutcome> {
        let prepared = self.prepare(request).await?;
        match prepared {
            Prepared::Skip => Ok(SendOutcome::Skipped),
            Prepared::Abort => {
                self.abort().await?;
                Ok(SendOutcome::AbortRequested)
            }
            Prepared::Queued(id) => Ok(SendOutcome::Queued { id }),
            Prepared::Send(outbound) => {
                let result = self.dispatch(outbound).await;
                self.flush_queue().await;
                result.map(|run_id| SendOutcome::Sent { run_id })
            }
        }
    }

    async fn prepare(&self, request: SendRequest) -> Result<Prepared> {
        let uses_draft = request.message.is_none();
        let (prepared, session_key) = {
            let mut state = self.state.lock().await;
            if !state.connected {
                return Err(ChatError::Disconnected("gateway not connected".into()));
            }
            if !is_session_key(&state.session_key) {
                return Err(ChatError::NoSession("no chat session selected".into()));
            }
            let text = request
                .message
                .unwrap_or_else(|| state.draft.clone())
                .trim()
                .to_owned();
            let attachments = if uses_draft {
                state.attachments.clone()
            } else {
                Vec::new()
            };
            if text.is_empty() && attachments.is_empty() {
                return Ok(Prepared::Skip);
            }

            let session_key = state.session_key.clone();
            if is_stop_command(&text) {
                if uses_draft {
                    state.draft.clear();
                }
                (Prepared::Abort, session_key)
            } else {
                let previous_draft = state.draft.clone();
                let rollback = uses_draft.then(|| Rollback {
                    draft: std::mem::take(&mut state.draft),
                    attachments: std::mem::take(&mut state.attachments),
                });
                let restore_draft = request
                    .restore_draft
                    .then_some(previous_draft)
                    .filter(|d| !d.trim().is_empty());
                let refresh_sessions = is_reset_command(&text);

                if state.busy() {
                    let id = state.queue.enqueue(QueuedMessage::new(
                        text,
                        attachments,
                        refresh_sessions,
                        now_millis(),
                    ));
                    tracing::debug!(queue_id = %id, queued = state.queue.len(), "run busy, message queued");
                    (Prepared::Queued(id), session_key)
                } else {
                    state.sending = true;
                    (
                        Prepared::Send(Outbound {
                            session_key: session_key.clone(),
                            text,
                            attachments,
                            refresh_sessions,
                            rollback,
                            restore_draft,
                        }),
                        session_key,
                    )
                }
            }
        };
        if uses_draft {
            match &prepared {
                Prepared::Abort => self.cache.set_draft(&session_key, "").await,
                Prepared::Queued(_) | Prepared::Send(_) => {
                    self.cache.clear_composer(&session_key).await;
                }
                Prepared::Skip => {}
            }
        }
        Ok(prepared)
    }

    /// Send one message now. The caller has set `sending`.
    async fn dispatch(&self, outbound: Outbound) -> Result<String> {
        let session_key = outbound.session_key.clone();
        let mut attachments = outbound.attachments.clone();
        for attachment in attachments
            .iter_mut()
            .filter(|a| a.is_voice_note() && a.persisted_note_id.is_none())
        {
            // Failures are logged by the persister; the note goes out with
            // its transcript and inline audio instead.
            if let Ok(note_id) = self.persist_voice_note(&session_key, attachment).await {
                attachment.set_persisted_note_id(&note_id);
            }
        }

        let text = compose_outbound_text(&outbound.text, &attachments);
        let run_id = uuid::Uuid::new_v4().to_string();
        let bubble = user_bubble(&text, &attachments, now_millis());
        {
            let mut state = self.state.lock().await;
            let began = if state.session_key == session_key {
                state.run.begin(&run_id, &session_key, now_millis())
            } else {
                Err(ChatError::NoSession(format!(
                    "session {session_key} is no longer selected"
                )))
            };
            if let Err(e) = began {
                state.sending = false;
                drop(state);
                tracing::debug!(session_key = %session_key, error = %e, "send abandoned before chat.send");
                self.restore_composer(&session_key, outbound.rollback).await;
                return Err(e);
            }
            if outbound.refresh_sessions {
                state.refresh_after.insert(run_id.clone());
            }
            state.messages.push(bubble.clone());
            state.last_error = None;
        }

        let params = SendParams::new(&session_key, &text, &run_id, &attachments);
        let result = api::send_message(self.gateway.as_ref(), &params).await;

        let mut state = self.state.lock().await;
        state.sending = false;
        match result {
            Ok(_) => {
                let streaming = state.run.accept(&run_id);
                tracing::debug!(run_id = %run_id, streaming, "chat.send accepted");
                let restored = match outbound.restore_draft {
                    Some(draft) if state.session_key == session_key && state.draft.is_empty() => {
                        state.draft.clone_from(&draft);
                        Some(draft)
                    }
                    _ => None,
                };
                drop(state);
                if let Some(draft) = restored {
                    self.cache.set_draft(&session_key, &draft).await;
                }
                Ok(run_id)
            }
            Err(e) => {
                state.run.reject(&run_id);
                state.refresh_after.remove(&run_id);
                tracing::warn!(
                    run_id = %run_id,
                    session_key = %session_key,
                    retryable = e.is_retryable(),
                    error = %e,
                    "chat.send failed"
                );
                if state.session_key == session_key {
                    if let Some(pos) = state.messages.iter().rposition(|m| *m == bubble) {
                        state.messages.remove(pos);
                    }
                    state.last_error = Some(e.message().to_owned());
                }
                drop(state);
                self.restore_composer(&session_key, outbound.rollback).await;
                Err(e)
            }
        }
    }

    /// Put the draft and attachments of a failed send back.
    ///
    /// Text typed since the send wins over the old draft; attachments added
    /// since are kept after the restored ones.
    async fn restore_composer(&self, session_key: &str, rollback: Option<Rollback>) {
        let Some(rollback) = rollback else {
            return;
        };
        let mut state = self.state.lock().await;
        if state.session_key != session_key {
            drop(state);
            self.roll_back_cache(session_key, rollback).await;
            return;
        }
        if state.draft.is_empty() {
            state.draft = rollback.draft;
        }
        let added = std::mem::take(&mut state.attachments);
        state.attachments = rollback.attachments;
        state.attachments.extend(added);
        let (draft, attachments) = (state.draft.clone(), state.attachments.clone());
        drop(state);
        self.cache.set_draft(session_key, &draft).await;
        self.cache.set_attachments(session_key, &attachments).await;
    }

    /// Same as `restore_composer` for a session that is no longer selected.
    async fn roll_back_cache(&self, session_key: &str, rollback: Rollback) {
        self.cache
            .update(session_key, move |mut entry| {
                if entry.draft.as_deref().is_none_or(str::is_empty) {
                    entry.draft = Some(rollback.draft);
                }
                let mut attachments = rollback.attachments;
                attachments.extend(entry.attachments.take().unwrap_or_default());
                entry.attachments = Some(attachments);
                Some(entry)
            })
            .await;
    }

    /// Send queued messages while the controller is idle.
    ///
    /// Stops at the first failure, which goes back to the head of the queue.
    pub async fn flush_queue(&self) {
        loop {
            let (item, session_key) = {
                let mut state = self.state.lock().await;
                if !state.connected || state.busy() || !is_session_key(&state.session_key) {
                    return;
                }
                let Some(item) = state.queue.pop_front() else {
                    return;
                };
                state.sending = true;
                (item, state.session_key.clone())
            };
            let outbound = Outbound {
                session_key: session_key.clone(),
                text: item.text.clone(),
                attachments: item.attachments.clone(),
                refresh_sessions: item.refresh_sessions,
                rollback: None,
                restore_draft: None,
            };
            if let Err(e) = self.dispatch(outbound).await {
                let mut state = self.state.lock().await;
                if state.session_key == session_key {
                    tracing::debug!(queue_id = %item.id, error = %e, "queued send failed, keeping it queued");
                    state.queue.push_front(item);
                } else {
                    tracing::debug!(
                        queue_id = %item.id,
                        session_key = %session_key,
                        error = %e,
                        "queued send failed after session switch, dropping it"
                    );
                }
                return;
            }
        }
    }

    /// Drop a queued message. Returns false when it was not queued.
    pub async fn remove_queued(&self, id: &str) -> bool {
        self.state.lock().await.queue.remove(id)
    }

    /// Ask the gateway to stop the active run.
    ///
    /// Local run state is only cleared by the `aborted`/`error` event.
    ///
    /// # Errors
    ///
    /// [`ChatError::Disconnected`], or the `chat.abort` failure (also
    /// recorded as the last error).
    pub async fn abort(&self) -> Result<()> {
        let (session_key, run_id) = {
            let state = self.state.lock().await;
            if !state.connected {
                return Err(ChatError::Disconnected("gateway not connected".into()));
            }
            (
                state.session_key.clone(),
                state.run.run_id().map(str::to_owned),
            )
        };
        if let Err(e) = api::abort_run(self.gateway.as_ref(), &session_key, run_id.as_deref()).await {
            tracing::warn!(session_key = %session_key, error = %e, "chat.abort failed");
            self.state.lock().await.last_error = Some(e.message().to_owned());
            return Err(e);
        }
        Ok(())
    }

    /// Apply a `chat` push event and run its follow-ups.
    ///
    /// Returns the transition for UI branching (`None` when ignored).
    /// `final` reloads history; every terminal event flushes the queue;
    /// runs started by a reset command reload the session list.
    pub async fn handle_event(&self, event: &ChatEvent) -> Option<RunOutcome> {
        let (outcome, refresh_sessions) = {
            let mut state = self.state.lock().await;
            let session_key = state.session_key.clone();
            let now = now_millis();
            let transition = state.run.apply(&session_key, event, now)?;
            if let Some(mut message) = transition.append.clone() {
                if message.timestamp == 0 {
                    message.timestamp = now;
                }
                state.messages.push(message);
            }
            if let Some(error) = &transition.error {
                state.last_error = Some(error.clone());
            }
            let refresh = transition.outcome.is_terminal()
                && transition
                    .finished_run_id(event)
                    .is_some_and(|id| state.refresh_after.remove(id));
            (transition.outcome, refresh)
        };

        if matches!(outcome, RunOutcome::Final | RunOutcome::ForeignFinal) {
            if let Err(e) = self.load_history().await {
                tracing::debug!(error = %e, "history reload after final skipped");
            }
        }
        if outcome.is_terminal() {
            self.flush_queue().await;
        }
        if refresh_sessions {
            if let Err(e) = self.load_sessions().await {
                tracing::debug!(error = %e, "session list reload after reset skipped");
            }
        }
        Some(outcome)
    }

    /// Clear a run whose stream has been open longer than
    /// `run.dead_run_timeout_ms`. Never fires when the timeout is unset.
    ///
    /// Returns true when a run was cleared.
    pub async fn expire_dead_run(&self, now: i64) -> bool {
        let Some(timeout_ms) = self.config.run.dead_run_timeout_ms else {
            return false;
        };
        {
            let mut state = self.state.lock().await;
            let Some(run) = state.run.expire(now, timeout_ms) else {
                return false;
            };
            tracing::warn!(run_id = %run.run_id, timeout_ms, "run timed out without a terminal event");
            if let Some(partial) = run.stream.as_deref().and_then(|s| message_from_stream(s, now)) {
                state.messages.push(partial);
            }
            state.refresh_after.remove(&run.run_id);
            state.last_error = Some("run timed out".into());
        }
        self.flush_queue().await;
        true
    }

    /// Load history, session list and agent avatar concurrently.
    ///
    /// # Errors
    ///
    /// The first failure among history and session list. Each failure is
    /// also recorded as the last error.
    pub async fn refresh(&self) -> Result<()> {
        let (history, sessions, ()) =
            tokio::join!(self.load_history(), self.load_sessions(), self.load_avatar());
        history.and(sessions)
    }

    /// Reload history and merge in local voice notes.
    ///
    /// # Errors
    ///
    /// [`ChatError::NoSession`] or the `chat.history` failure.
    pub async fn load_history(&self) -> Result<()> {
        let session_key = {
            let mut state = self.state.lock().await;
            if !is_session_key(&state.session_key) {
                return Err(ChatError::NoSession("no chat session selected".into()));
            }
            state.loading = true;
            state.session_key.clone()
        };
        let result =
            api::fetch_history(self.gateway.as_ref(), &session_key, self.config.history.limit).await;
        let cached = local_voice_note_messages(&self.cache.voice_notes(&session_key).await);

        let mut state = self.state.lock().await;
        if state.session_key != session_key {
            return Ok(());
        }
        state.loading = false;
        match result {
            Ok(page) => {
                // In-memory copies first: they survive cache write failures.
                let mut local: Vec<ChatMessage> = state
                    .messages
                    .iter()
                    .filter(|m| m.marker.is_some())
                    .cloned()
                    .collect();
                local.extend(cached);
                state.messages = merge_history(page.messages, &local);
                state.thinking_level = page.thinking_level;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session_key = %session_key, error = %e, "chat.history failed");
                state.last_error = Some(e.message().to_owned());
                Err(e)
            }
        }
    }

    /// Reload the session list.
    ///
    /// # Errors
    ///
    /// The `sessions.list` failure.
    pub async fn load_sessions(&self) -> Result<()> {
        match api::list_sessions(self.gateway.as_ref(), self.config.sessions.list_limit).await {
            Ok(page) => {
                self.state.lock().await.sessions = page.sessions;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "sessions.list failed");
                self.state.lock().await.last_error = Some(e.message().to_owned());
                Err(e)
            }
        }
    }

    /// Reload the agent avatar. Failures only clear it.
    async fn load_avatar(&self) {
        let session_key = self.session_key().await;
        let avatar = match api::fetch_identity(self.gateway.as_ref(), &session_key).await {
            Ok(identity) => identity.avatar.filter(|a| !a.trim().is_empty()),
            Err(e) => {
                tracing::debug!(error = %e, "agent.identity failed");
                None
            }
        };
        self.state.lock().await.avatar = avatar;
    }
}

/// The optimistic user message shown while `chat.send` is in flight.
fn user_bubble(text: &str, attachments: &[Attachment], timestamp: i64) -> ChatMessage {
    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(ContentBlock::text(text));
    }
    content.extend(
        attachments
            .iter()
            .filter(|a| !a.is_voice_note())
            .map(Attachment::to_content_block),
    );
    ChatMessage::new(Role::User, content, timestamp)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::attachment::AttachmentSource;
    use crate::cache::MemoryKeyValueStore;
    use crate::gateway::RecordingGateway;
    use crate::run::ChatEventState;

    async fn controller() -> (Arc<RecordingGateway>, MemoryKeyValueStore, ChatController) {
        let gateway = Arc::new(RecordingGateway::new());
        let storage = MemoryKeyValueStore::new();
        let controller = ChatController::open(
            ChatConfig::default(),
            gateway.clone(),
            Arc::new(storage.clone()),
            "main",
        )
        .await
        .unwrap();
        controller.set_connected(true).await;
        (gateway, storage, controller)
    }

    #[test]
    fn bubble_has_text_and_images_only() {
        let image = Attachment::image("IMG", "image/png");
        let note = Attachment::voice_note("AUD", "audio/webm", AttachmentSource::Record);
        let bubble = user_bubble("hi", &[image, note], 3);
        assert_eq!(bubble.content.len(), 2);
        assert_eq!(bubble.text(), "hi");
        assert!(matches!(bubble.content[1], ContentBlock::Image(_)));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = ChatConfig::default();
        config.history.limit = 0;
        let result = ChatController::open(
            config,
            Arc::new(RecordingGateway::new()),
            Arc::new(MemoryKeyValueStore::new()),
            "main",
        )
        .await;
        assert!(matches!(result, Err(ChatError::Config(_))));
    }

    #[tokio::test]
    async fn disconnected_send_is_refused() {
        let (gateway, _, controller) = controller().await;
        controller.set_connected(false).await;
        controller.set_draft("hello").await;
        let err = controller.send(SendRequest::draft()).await.unwrap_err();
        assert_eq!(err.code(), "DISCONNECTED");
        assert_eq!(gateway.count("chat.send"), 0);
        assert_eq!(controller.snapshot().await.draft, "hello");
    }

    #[tokio::test]
    async fn blank_draft_is_skipped() {
        let (gateway, _, controller) = controller().await;
        controller.set_draft("   ").await;
        assert_eq!(
            controller.send(SendRequest::draft()).await.unwrap(),
            SendOutcome::Skipped
        );
        assert_eq!(gateway.count("chat.send"), 0);
    }

    #[tokio::test]
    async fn stop_command_requests_abort_instead_of_sending() {
        let (gateway, _, controller) = controller().await;
        controller.send(SendRequest::text("hi")).await.unwrap();
        controller.set_draft("/stop").await;
        assert_eq!(
            controller.send(SendRequest::draft()).await.unwrap(),
            SendOutcome::AbortRequested
        );
        assert_eq!(gateway.count("chat.send"), 1);
        let snapshot = controller.snapshot().await;
        assert_eq!(
            gateway.calls_to("chat.abort"),
            vec![serde_json::json!({"sessionKey": "main", "runId": snapshot.run_id.clone().unwrap()})]
        );
        assert!(snapshot.run_id.is_some(), "abort is not assumed to succeed");
        assert!(snapshot.draft.is_empty());
    }

    #[tokio::test]
    async fn override_send_keeps_draft() {
        let (gateway, _, controller) = controller().await;
        controller.set_draft("typing").await;
        controller.send(SendRequest::text("other")).await.unwrap();
        assert_eq!(controller.snapshot().await.draft, "typing");
        assert_eq!(gateway.calls_to("chat.send")[0]["message"], "other");
    }

    #[tokio::test]
    async fn restore_draft_refills_composer_after_success() {
        let (_, _, controller) = controller().await;
        controller.set_draft("keep me").await;
        controller
            .send(SendRequest::draft().with_restore_draft())
            .await
            .unwrap();
        assert_eq!(controller.snapshot().await.draft, "keep me");
    }

    #[tokio::test]
    async fn session_switch_restores_cached_draft() {
        let (_, _, controller) = controller().await;
        controller.set_draft("for main").await;
        controller.set_session_key("side").await;
        assert!(controller.snapshot().await.draft.is_empty());
        controller.set_draft("for side").await;
        controller.set_session_key("main").await;
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.session_key, "main");
        assert_eq!(snapshot.draft, "for main");
    }

    #[tokio::test]
    async fn cached_composer_survives_reopen() {
        let (gateway, storage, controller) = controller().await;
        controller.set_draft("unsent").await;
        controller
            .add_attachment(Attachment::image("IMG", "image/png"))
            .await
            .unwrap();
        drop(controller);

        let reopened = ChatController::open(
            ChatConfig::default(),
            gateway,
            Arc::new(storage),
            "main",
        )
        .await
        .unwrap();
        let snapshot = reopened.snapshot().await;
        assert_eq!(snapshot.draft, "unsent");
        assert_eq!(snapshot.attachments.len(), 1);
    }

    #[tokio::test]
    async fn dead_run_timeout_disabled_by_default() {
        let (_, _, controller) = controller().await;
        controller.send(SendRequest::text("hi")).await.unwrap();
        assert!(!controller.expire_dead_run(i64::MAX).await);
        assert!(controller.snapshot().await.run_id.is_some());
    }

    #[tokio::test]
    async fn error_event_sets_last_error() {
        let (_, _, controller) = controller().await;
        let SendOutcome::Sent { run_id } = controller.send(SendRequest::text("hi")).await.unwrap()
        else {
            unreachable!("expected a sent run");
        };
        let event = ChatEvent::new("main", ChatEventState::Error).with_run_id(run_id);
        assert_eq!(controller.handle_event(&event).await, Some(RunOutcome::Error));
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.last_error.as_deref(), Some("chat error"));
        assert!(snapshot.run_id.is_none());
    }
}
