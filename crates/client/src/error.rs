//! Client-side error type.

use founderslib_shared::ApiError;
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("not signed in")]
    NotAuthenticated,
    #[error("no conversation is open")]
    NoOpenConversation,
    #[error("message is empty")]
    EmptyMessage,
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(String),
}

impl ClientError {
    /// Text for a transient notice.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Api(e) => e.user_message(),
            ClientError::Storage(_) => "Could not save local state".to_string(),
            ClientError::NotAuthenticated => "Please sign in".to_string(),
            ClientError::NoOpenConversation => "Open a conversation first".to_string(),
            ClientError::EmptyMessage => "Message is empty".to_string(),
            ClientError::InvalidBaseUrl(_) => "Client is misconfigured".to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api(e) => e.status(),
            _ => None,
        }
    }
}
