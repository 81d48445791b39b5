//! WebSocket module for the `chat` and `calls` channels.
//!
//! This module provides:
//! - Connection management with auto-reconnect ([`Connection`])
//! - A pluggable transport ([`Connector`]) with a tokio-tungstenite default
//! - [`ChannelSender`], the narrow view the bridges use to emit frames
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐
//! │ Connection │   │ Connection │    one actor task per channel,
//! │  (chat)    │   │  (calls)   │    owning socket + reconnect timer
//! └────────────┘   └────────────┘
//!       │ events         │ events
//!       ▼                ▼
//! ┌────────────┐   ┌────────────┐
//! │ ChatBridge │   │ CallBridge │    parse envelopes, merge into state
//! └────────────┘   └────────────┘
//! ```

mod connection;
mod transport;

#[cfg(test)]
pub(crate) use connection::testing;

pub use connection::{
    Connection, ConnectionEvent, ConnectionHandlers, ConnectionOptions, ConnectionStatus,
    ReconnectPolicy, DEFAULT_RECONNECT_INTERVAL,
};
pub use transport::{Connector, Socket, TransportError, TungsteniteConnector};

/// Outbound side of a channel as seen by a bridge.
pub trait ChannelSender: Send + Sync {
    fn status(&self) -> ConnectionStatus;

    /// Fire-and-forget; dropped when the channel is not open.
    fn send(&self, data: String);
}

impl ChannelSender for Connection {
    fn status(&self) -> ConnectionStatus {
        Connection::status(self)
    }

    fn send(&self, data: String) {
        Connection::send(self, data)
    }
}
