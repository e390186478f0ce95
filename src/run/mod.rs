//! Run lifecycle: push events and the state machine they drive.

pub mod event;
pub mod machine;

pub use event::{ChatEvent, ChatEventState, extract_text};
pub use machine::{Run, RunMachine, RunOutcome, RunPhase, Transition};
