//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RFC7807 Problem Details (application/problem+json)
///
/// The backend reports action failures (declining an ended call, posting to a
/// closed conversation, ...) in this shape; clients surface `detail` to the
/// user when present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type", default)]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    #[serde(default)]
    pub title: String,
    /// HTTP status code.
    #[serde(default)]
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    /// The access token was rejected and could not be refreshed.
    #[error("Session expired")]
    SessionExpired,
}

impl ApiError {
    /// HTTP status of the failed response, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::SessionExpired => Some(401),
            _ => None,
        }
    }

    /// Short text suitable for a transient notification.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { status, body } => {
                try_problem_detail(body).unwrap_or_else(|| format!("Request failed ({status})"))
            }
            ApiError::Network(_) => "Network unavailable, try again".to_string(),
            ApiError::Deserialize(_) => "Unexpected response from server".to_string(),
            ApiError::SessionExpired => "Your session has expired".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_detail_prefers_detail_over_title() {
        let body = r#"{"type":"about:blank","title":"Conflict","status":409,"detail":"Call already ended"}"#;
        assert_eq!(try_problem_detail(body).as_deref(), Some("Call already ended"));

        let body = r#"{"title":"Forbidden","detail":"  "}"#;
        assert_eq!(try_problem_detail(body).as_deref(), Some("Forbidden"));

        assert_eq!(try_problem_detail("<html>"), None);
    }

    #[test]
    fn user_message_falls_back_to_status() {
        let err = ApiError::Http {
            status: 500,
            body: "oops".into(),
        };
        assert_eq!(err.user_message(), "Request failed (500)");
        assert_eq!(err.status(), Some(500));
    }
}
