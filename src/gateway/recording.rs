//! In-process gateway fake.
//!
//! [`RecordingGateway`] records every request, replays scripted responses
//! per method, and falls back to an empty-but-valid payload for anything
//! not scripted. A request can be held open with
//! [`RecordingGateway::hold_next`] to reproduce push events that arrive
//! while a send is still in flight.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use super::{GatewayClient, MethodName};
use crate::error::{ChatError, Result};

/// One recorded request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
}

/// Gateway fake that records requests and replays scripted responses.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<RecordedCall>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<Value>>>>,
    holds: Mutex<HashMap<String, VecDeque<oneshot::Receiver<()>>>>,
    note_seq: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next unscripted call to `method`.
    pub fn script(&self, method: &str, response: Result<Value>) {
        lock(&self.scripted)
            .entry(method.to_owned())
            .or_default()
            .push_back(response);
    }

    pub fn script_ok(&self, method: &str, value: Value) {
        self.script(method, Ok(value));
    }

    pub fn script_err(&self, method: &str, error: ChatError) {
        self.script(method, Err(error));
    }

    /// Hold the next call to `method` open until the returned sender fires
    /// (or is dropped). The call is recorded before it blocks.
    pub fn hold_next(&self, method: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        lock(&self.holds)
            .entry(method.to_owned())
            .or_default()
            .push_back(rx);
        tx
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Params of every call to `method`, in order.
    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        lock(&self.calls)
            .iter()
            .filter(|call| call.method == method)
            .map(|call| call.params.clone())
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.method == method)
            .count()
    }

    fn default_response(&self, method: &str) -> Result<Value> {
        match MethodName::parse(method) {
            Some(MethodName::ChatHistory) => Ok(json!({ "messages": [] })),
            Some(MethodName::ChatSend) => Ok(json!({ "status": "started" })),
            Some(MethodName::ChatAbort) => Ok(json!({ "ok": true })),
            Some(MethodName::VoiceNotesSave) => {
                let seq = self.note_seq.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({ "note": { "id": format!("note-{seq}") } }))
            }
            Some(MethodName::SessionsList) => Ok(json!({ "sessions": [] })),
            Some(MethodName::AgentIdentity) => Ok(json!({})),
            None => Err(ChatError::Gateway(format!("unknown method: {method}"))),
        }
    }
}

#[async_trait]
impl GatewayClient for RecordingGateway {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        lock(&self.calls).push(RecordedCall {
            method: method.to_owned(),
            params,
        });
        let hold = lock(&self.holds)
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        let scripted = lock(&self.scripted)
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(response) => response,
            None => self.default_response(method),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn scripted_responses_replay_in_order_then_default() {
        let gateway = RecordingGateway::new();
        gateway.script_ok("chat.history", json!({ "messages": [], "thinkingLevel": "low" }));
        gateway.script_err("chat.history", ChatError::Transport("down".into()));

        let first = gateway.request("chat.history", json!({})).await.unwrap();
        assert_eq!(first["thinkingLevel"], "low");
        assert!(gateway.request("chat.history", json!({})).await.is_err());
        let third = gateway.request("chat.history", json!({})).await.unwrap();
        assert_eq!(third, json!({ "messages": [] }));
        assert_eq!(gateway.count("chat.history"), 3);
    }

    #[tokio::test]
    async fn default_note_ids_are_sequential() {
        let gateway = RecordingGateway::new();
        let a = gateway.request("voice_notes.save", json!({})).await.unwrap();
        let b = gateway.request("voice_notes.save", json!({})).await.unwrap();
        assert_eq!(a["note"]["id"], "note-1");
        assert_eq!(b["note"]["id"], "note-2");
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let gateway = RecordingGateway::new();
        let err = gateway.request("nope", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "GATEWAY_REJECTED");
    }

    #[tokio::test]
    async fn held_call_is_recorded_before_release() {
        let gateway = std::sync::Arc::new(RecordingGateway::new());
        let release = gateway.hold_next("chat.send");
        let task = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.request("chat.send", json!({ "n": 1 })).await })
        };
        while gateway.count("chat.send") == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!task.is_finished());
        release.send(()).unwrap();
        assert!(task.await.unwrap().is_ok());
    }
}
