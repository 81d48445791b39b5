//! Bridges between the live channels and client state.
//!
//! Each bridge consumes the [`ConnectionEvent`](crate::ws::ConnectionEvent)
//! stream of one channel, decodes its envelopes and applies them to state
//! kept behind a mutex. REST actions are awaited outside that lock.

pub mod calls;
pub mod chat;

pub use calls::{CallBridge, CallSnapshot, LogNavigator, Navigator};
pub use chat::{ChatBridge, ChatSnapshot, SendOutcome, TYPING_IDLE};
