//! FIFO of user messages submitted while a run was busy.

use std::collections::VecDeque;

use serde::Serialize;

use crate::attachment::Attachment;

/// A message waiting for the active run to finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: String,
    pub text: String,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Reload the session list once this message's run finishes.
    pub refresh_sessions: bool,
}

impl QueuedMessage {
    pub fn new(
        text: impl Into<String>,
        attachments: Vec<Attachment>,
        refresh_sessions: bool,
        created_at: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            created_at,
            attachments,
            refresh_sessions,
        }
    }
}

/// Ordered send queue.
#[derive(Debug, Clone, Default)]
pub struct SendQueue {
    items: VecDeque<QueuedMessage>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail and return the item id.
    pub fn enqueue(&mut self, message: QueuedMessage) -> String {
        let id = message.id.clone();
        self.items.push_back(message);
        id
    }

    pub fn pop_front(&mut self) -> Option<QueuedMessage> {
        self.items.pop_front()
    }

    /// Put an item back at the head after a failed send.
    pub fn push_front(&mut self, message: QueuedMessage) {
        self.items.push_front(message);
    }

    /// Remove an item by id. Returns false when it was not queued.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        self.items.len() != before
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.items.iter()
    }

    /// Copy of the queue, head first.
    pub fn items(&self) -> Vec<QueuedMessage> {
        self.items.iter().cloned().collect()
    }
}
