//! Lifecycle of the single in-flight run.
//!
//! ```text
//!          begin             accept / first delta
//! Idle ──────────▶ Sending ──────────────────────▶ Streaming
//!  ▲                  │                                │
//!  │      reject      │      final | aborted | error   │
//!  └──────────────────┴────────────────────────────────┘
//! ```
//!
//! Events for another session are ignored. Events for another run are
//! ignored too, except `final`, which is reported as
//! [`RunOutcome::ForeignFinal`] without touching the active run so the
//! caller can reload history.

use super::event::{
    ChatEvent, ChatEventState, extract_text, message_from_stream, normalize_aborted_message,
};
use crate::error::{ChatError, Result};
use crate::message::ChatMessage;

/// The active exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub run_id: String,
    pub session_key: String,
    /// Text streamed so far.
    pub stream: Option<String>,
    /// When the stream opened, Unix epoch milliseconds.
    pub started_at: Option<i64>,
}

impl Run {
    fn new(run_id: String, session_key: String, now: i64) -> Self {
        Self {
            run_id,
            session_key,
            stream: Some(String::new()),
            started_at: Some(now),
        }
    }
}

/// Where the machine is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    /// `chat.send` issued, not yet acknowledged.
    Sending(Run),
    /// Acknowledged or already streaming.
    Streaming(Run),
}

/// What an applied event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Delta,
    Final,
    /// `final` for a run other than the active one.
    ForeignFinal,
    Aborted,
    Error,
}

impl RunOutcome {
    /// Name handed to the UI layer. Foreign finals report as `final`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delta => "delta",
            Self::Final | Self::ForeignFinal => "final",
            Self::Aborted => "aborted",
            Self::Error => "error",
        }
    }

    /// True for outcomes that ended the active run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Final | Self::Aborted | Self::Error)
    }
}

/// Result of [`RunMachine::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub outcome: RunOutcome,
    /// Message to append to history.
    pub append: Option<ChatMessage>,
    /// Text to surface as the last error.
    pub error: Option<String>,
    /// The run this event ended, if one was active.
    pub finished: Option<Run>,
}

impl Transition {
    fn new(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            append: None,
            error: None,
            finished: None,
        }
    }

    /// Id of the run that ended, falling back to the event's run id.
    pub fn finished_run_id<'a>(&'a self, event: &'a ChatEvent) -> Option<&'a str> {
        self.finished
            .as_ref()
            .map(|run| run.run_id.as_str())
            .or(event.run_id.as_deref())
    }
}

/// Run state machine.
#[derive(Debug, Clone)]
pub struct RunMachine {
    phase: RunPhase,
    default_error: String,
}

impl RunMachine {
    /// `default_error` is surfaced for `error` events without a message.
    pub fn new(default_error: impl Into<String>) -> Self {
        Self {
            phase: RunPhase::Idle,
            default_error: default_error.into(),
        }
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    pub fn active(&self) -> Option<&Run> {
        match &self.phase {
            RunPhase::Idle => None,
            RunPhase::Sending(run) | RunPhase::Streaming(run) => Some(run),
        }
    }

    fn active_mut(&mut self) -> Option<&mut Run> {
        match &mut self.phase {
            RunPhase::Idle => None,
            RunPhase::Sending(run) | RunPhase::Streaming(run) => Some(run),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.active().map(|run| run.run_id.as_str())
    }

    pub fn stream(&self) -> Option<&str> {
        self.active().and_then(|run| run.stream.as_deref())
    }

    pub fn started_at(&self) -> Option<i64> {
        self.active().and_then(|run| run.started_at)
    }

    /// Bind a new run before its `chat.send` goes out.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::RunActive`] when a run is already bound.
    pub fn begin(&mut self, run_id: &str, session_key: &str, now: i64) -> Result<()> {
        if let Some(active) = self.active() {
            return Err(ChatError::RunActive(format!(
                "run {} is still active",
                active.run_id
            )));
        }
        self.phase = RunPhase::Sending(Run::new(run_id.to_owned(), session_key.to_owned(), now));
        Ok(())
    }

    /// The gateway acknowledged `run_id`.
    ///
    /// Returns false when that run is no longer active, i.e. a terminal
    /// event arrived while the request was in flight.
    pub fn accept(&mut self, run_id: &str) -> bool {
        match std::mem::take(&mut self.phase) {
            RunPhase::Sending(run) | RunPhase::Streaming(run) if run.run_id == run_id => {
                self.phase = RunPhase::Streaming(run);
                true
            }
            other => {
                self.phase = other;
                false
            }
        }
    }

    /// Unbind `run_id` after its send failed. No-op for any other run.
    pub fn reject(&mut self, run_id: &str) -> bool {
        if self.run_id() == Some(run_id) {
            self.phase = RunPhase::Idle;
            true
        } else {
            false
        }
    }

    /// Drop whatever run is active.
    pub fn reset(&mut self) -> Option<Run> {
        match std::mem::take(&mut self.phase) {
            RunPhase::Idle => None,
            RunPhase::Sending(run) | RunPhase::Streaming(run) => Some(run),
        }
    }

    /// Clear a run whose stream opened at least `timeout_ms` ago.
    pub fn expire(&mut self, now: i64, timeout_ms: u64) -> Option<Run> {
        let started_at = self.started_at()?;
        let timeout = i64::try_from(timeout_ms).unwrap_or(i64::MAX);
        if now.saturating_sub(started_at) >= timeout {
            self.reset()
        } else {
            None
        }
    }

    /// Apply a push event for the controller's current `session_key`.
    ///
    /// Returns `None` when the event is ignored.
    pub fn apply(&mut self, session_key: &str, event: &ChatEvent, now: i64) -> Option<Transition> {
        if event.session_key != session_key {
            tracing::debug!(
                event_session = %event.session_key,
                session_key,
                "ignoring chat event for another session"
            );
            return None;
        }

        let foreign = match (event.run_id.as_deref(), self.run_id()) {
            (Some(event_run), Some(active_run)) => event_run != active_run,
            _ => false,
        };
        if foreign {
            if event.state == ChatEventState::Final {
                return Some(Transition::new(RunOutcome::ForeignFinal));
            }
            tracing::debug!(
                run_id = ?event.run_id,
                active_run = ?self.run_id(),
                state = ?event.state,
                "ignoring chat event for another run"
            );
            return None;
        }

        let transition = match event.state {
            ChatEventState::Delta => {
                self.apply_delta(session_key, event, now);
                Transition::new(RunOutcome::Delta)
            }
            ChatEventState::Final => Transition {
                finished: self.reset(),
                ..Transition::new(RunOutcome::Final)
            },
            ChatEventState::Aborted => {
                let finished = self.reset();
                let append = event
                    .message
                    .as_ref()
                    .and_then(normalize_aborted_message)
                    .or_else(|| {
                        finished
                            .as_ref()
                            .and_then(|run| run.stream.as_deref())
                            .and_then(|stream| message_from_stream(stream, now))
                    });
                Transition {
                    append,
                    finished,
                    ..Transition::new(RunOutcome::Aborted)
                }
            }
            ChatEventState::Error => {
                let error = event
                    .error_message
                    .as_deref()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map_or_else(|| self.default_error.clone(), str::to_owned);
                Transition {
                    error: Some(error),
                    finished: self.reset(),
                    ..Transition::new(RunOutcome::Error)
                }
            }
        };
        Some(transition)
    }

    fn apply_delta(&mut self, session_key: &str, event: &ChatEvent, now: i64) {
        let Some(next) = event.message.as_ref().and_then(extract_text) else {
            return;
        };
        if self.active().is_none() {
            // Stream of a run started elsewhere; follow it until it ends.
            let Some(run_id) = event.run_id.clone() else {
                return;
            };
            self.phase = RunPhase::Streaming(Run::new(run_id, session_key.to_owned(), now));
        }
        if let RunPhase::Sending(_) = self.phase {
            if let RunPhase::Sending(run) = std::mem::take(&mut self.phase) {
                self.phase = RunPhase::Streaming(run);
            }
        }
        if let Some(run) = self.active_mut() {
            let current = run.stream.as_deref().map_or(0, |s| s.chars().count());
            if next.chars().count() >= current {
                run.stream = Some(next);
            }
        }
    }
}
