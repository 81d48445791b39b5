//! Shared types for the FoundersLib live client: REST models, channel
//! envelopes and errors.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
