//! Client-side state stores.

pub mod active_calls;
pub mod messages;

pub use active_calls::{ActiveCallStore, ACTIVE_CALLS_KEY};
pub use messages::ConversationMessages;
