//! Wire envelopes for the `chat` and `calls` WebSocket channels.
//!
//! Inbound frames are decoded into closed enums with an explicit fallback
//! variant, so a malformed or foreign frame becomes a value the bridges can
//! ignore instead of an error that tears the channel down.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChatMessage, IncomingCall};

/// Path of the chat channel, relative to the API host.
pub const CHAT_WS_PATH: &str = "/ws/chat/";
/// Path of the calls channel, relative to the API host.
pub const CALLS_WS_PATH: &str = "/ws/calls/";

// --- Chat channel ---

/// Generic `{type, data}` wrapper used on the chat channel.
#[derive(Debug, Clone, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Payload of a `typing` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingEvent {
    pub conversation_id: String,
    pub user_id: String,
    #[serde(default = "default_true")]
    pub is_typing: bool,
}

fn default_true() -> bool {
    true
}

/// Events pushed by the server on the chat channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatInbound {
    MessageNew(ChatMessage),
    Typing(TypingEvent),
    /// A well-formed envelope with a type this client does not handle.
    Other(String),
    /// Anything that is not a decodable envelope.
    Malformed,
}

impl ChatInbound {
    /// Decode one text frame. Never fails; see [`ChatInbound::Malformed`].
    pub fn parse(raw: &str) -> Self {
        let Ok(envelope) = serde_json::from_str::<RawEnvelope>(raw) else {
            return ChatInbound::Malformed;
        };

        match envelope.kind.as_str() {
            "message.new" => serde_json::from_value(envelope.data)
                .map(ChatInbound::MessageNew)
                .unwrap_or(ChatInbound::Malformed),
            "typing" => serde_json::from_value(envelope.data)
                .map(ChatInbound::Typing)
                .unwrap_or(ChatInbound::Malformed),
            _ => ChatInbound::Other(envelope.kind),
        }
    }
}

/// Commands the client emits on the chat channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ChatOutbound {
    #[serde(rename = "conversation.join")]
    ConversationJoin { conversation_id: String },
    #[serde(rename = "conversation.leave")]
    ConversationLeave { conversation_id: String },
    #[serde(rename = "typing.start")]
    TypingStart { conversation_id: String },
    #[serde(rename = "typing.stop")]
    TypingStop { conversation_id: String },
    #[serde(rename = "message.send")]
    MessageSend {
        conversation_id: String,
        content: String,
        /// Client-generated idempotency key.
        client_id: String,
    },
}

impl ChatOutbound {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// --- Calls channel ---

/// Events pushed by the server on the calls channel (flat objects keyed by
/// `type`).
#[derive(Debug, Clone, PartialEq)]
pub enum CallInbound {
    IncomingCall(IncomingCall),
    CallEnded { call_id: String },
    /// A known-shape frame of a type this client ignores.
    Other(String),
    Malformed,
}

impl CallInbound {
    pub fn parse(raw: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            return CallInbound::Malformed;
        };
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return CallInbound::Malformed;
        };

        match kind {
            "incoming_call" => match serde_json::from_value::<IncomingCall>(value.clone()) {
                Ok(call) if !call.call_id.is_empty() => CallInbound::IncomingCall(call),
                _ => CallInbound::Malformed,
            },
            "call_ended" => match value.get("call_id").and_then(Value::as_str) {
                Some(id) if !id.is_empty() => CallInbound::CallEnded {
                    call_id: id.to_string(),
                },
                _ => CallInbound::Malformed,
            },
            other => CallInbound::Other(other.to_string()),
        }
    }
}
