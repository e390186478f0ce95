//! Voxchat: client-side chat session controller with local-first voice notes.
//!
//! The controller sits between a chat UI and a remote agent gateway. It
//! keeps one conversation view consistent while requests, push events and
//! storage I/O interleave:
//!
//! - **Local cache**: versioned per-session draft, attachments and voice
//!   notes over an injected key-value store
//! - **Attachment lifecycle**: capture, then at-most-once durable save of
//!   voice notes, patched back into history and cache
//! - **History merge**: remote history plus local voice notes, deduplicated
//!   by marker id
//! - **Run state machine**: send → stream → final/aborted/error, with
//!   foreign-run correlation
//! - **Send queue**: FIFO of messages sent while busy, with rollback of
//!   optimistic state on failure
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use voxchat::{ChatConfig, ChatController, MemoryKeyValueStore, RecordingGateway, SendRequest};
//!
//! # async fn demo() -> voxchat::Result<()> {
//! let controller = ChatController::open(
//!     ChatConfig::default(),
//!     Arc::new(RecordingGateway::new()),
//!     Arc::new(MemoryKeyValueStore::new()),
//!     "main",
//! )
//! .await?;
//! controller.set_connected(true).await;
//! controller.set_draft("hello").await;
//! controller.send(SendRequest::draft()).await?;
//! # Ok(())
//! # }
//! ```

pub mod app_dirs;
pub mod attachment;
pub mod cache;
pub mod capture;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod history;
pub mod message;
pub mod queue;
pub mod run;

pub use attachment::{Attachment, AttachmentKind, AttachmentSource, AttachmentState};
pub use cache::{FsKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use capture::{MediaRecorderSource, VoiceRecorder};
pub use config::ChatConfig;
pub use controller::{ChatController, ChatSnapshot, SendOutcome, SendRequest};
pub use error::{ChatError, Result};
pub use gateway::{GatewayClient, RecordingGateway};
pub use message::{ChatMessage, ContentBlock, Role};
pub use run::{ChatEvent, ChatEventState, RunOutcome};
