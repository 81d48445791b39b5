//! Shared data models for the FoundersLib chat and call channels.
//!
//! Field names follow the backend's snake_case JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Chat ---

/// A chat message as delivered by the REST API or the chat channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// One row of the conversation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

impl ConversationSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            last_message_preview: None,
            last_message_at: None,
            unread_count: 0,
        }
    }
}

/// Body of `POST chat/conversations/{id}/messages/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateMessageRequest {
    pub content: String,
}

// --- Calls ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Voice,
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Caller {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
}

/// An incoming call as announced on the calls channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncomingCall {
    pub call_id: String,
    #[serde(default)]
    pub call_type: CallType,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub caller: Caller,
    #[serde(default)]
    pub is_group_call: bool,
}

/// The call session returned by `POST calls/{id}/answer/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallSession {
    pub call_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub call_type: CallType,
}

// --- Auth ---

/// Body of `POST auth/token/refresh/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshRequest {
    pub refresh: String,
}

/// Response of `POST auth/token/refresh/`. Rotating backends also return a
/// new refresh token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}
