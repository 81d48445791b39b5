//! HTTP API client with bearer authorization and token refresh.

use std::sync::Arc;

use async_trait::async_trait;
use founderslib_shared::{
    ApiError, CallSession, ChatMessage, ConversationSummary, CreateMessageRequest, RefreshRequest,
    RefreshResponse,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::auth_session::TokenStore;

const REFRESH_PATH: &str = "auth/token/refresh/";

/// Chat endpoints the chat bridge depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError>;

    /// Messages of one conversation, newest first.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, ApiError>;

    async fn create_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<ChatMessage, ApiError>;
}

/// Call endpoints used by the call bridge and the logout sweep.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallsApi: Send + Sync {
    async fn answer_call(&self, call_id: &str) -> Result<CallSession, ApiError>;
    async fn decline_call(&self, call_id: &str) -> Result<(), ApiError>;
    async fn end_call(&self, call_id: &str) -> Result<(), ApiError>;
    async fn leave_call(&self, call_id: &str) -> Result<(), ApiError>;
}

/// List endpoints answer either a bare array or a paginated `{results: [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Page { results: Vec<T> },
    Plain(Vec<T>),
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Page { results } => results,
            Listing::Plain(items) => items,
        }
    }
}

/// HTTP client for the FoundersLib REST API.
///
/// Requests carry `Authorization: Bearer <access>` from the [`TokenStore`].
/// A `401` triggers one refresh through `auth/token/refresh/` followed by one
/// retry; when the refresh fails the stored tokens are cleared and the call
/// returns [`ApiError::SessionExpired`].
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: TokenStore,
    // Concurrent 401s share one refresh round trip.
    refresh_lock: Arc<Mutex<()>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: TokenStore) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            tokens,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// Make an authorized GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let text = self.request(Method::GET, path, None).await?;
        decode(&text)
    }

    /// Make an authorized POST request with JSON body
    pub async fn post_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let bytes = serde_json::to_vec(body).map_err(|e| ApiError::Deserialize(e.to_string()))?;
        let text = self.request(Method::POST, path, Some(bytes)).await?;
        decode(&text)
    }

    /// POST without a body, ignoring whatever the server answers with.
    pub async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        self.request(Method::POST, path, None).await?;
        Ok(())
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<String, ApiError> {
        let sent_token = self.tokens.access_token();
        let (status, text) = self
            .send_once(&method, path, body.as_deref(), sent_token.as_deref())
            .await?;

        if status != StatusCode::UNAUTHORIZED {
            return finish(status, text);
        }

        crate::log_debug!(path, "access token rejected, refreshing");
        self.refresh_after_rejection(sent_token.as_deref()).await?;

        let token = self.tokens.access_token();
        let (status, text) = self
            .send_once(&method, path, body.as_deref(), token.as_deref())
            .await?;
        finish(status, text)
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&[u8]>,
        token: Option<&str>,
    ) -> Result<(StatusCode, String), ApiError> {
        let mut rb = self.client.request(method.clone(), self.url(path));
        if let Some(token) = token {
            rb = rb.bearer_auth(token);
        }
        if let Some(body) = body {
            rb = rb.header(CONTENT_TYPE, "application/json").body(body.to_vec());
        }

        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;
        Ok((status, text))
    }

    async fn refresh_after_rejection(&self, rejected: Option<&str>) -> Result<(), ApiError> {
        let _guard = self.refresh_lock.lock().await;

        // Someone else refreshed while this request waited for the lock.
        let current = self.tokens.access_token();
        if current.is_some() && current.as_deref() != rejected {
            return Ok(());
        }

        let Some(refresh) = self.tokens.refresh_token() else {
            return Err(self.expire("no refresh token"));
        };

        let body = serde_json::to_vec(&RefreshRequest { refresh })
            .map_err(|e| ApiError::Deserialize(e.to_string()))?;

        let (status, text) = match self
            .send_once(&Method::POST, REFRESH_PATH, Some(&body), None)
            .await
        {
            Ok(resp) => resp,
            Err(e) => return Err(self.expire(&e.to_string())),
        };
        if !status.is_success() {
            return Err(self.expire(&format!("refresh rejected ({status})")));
        }

        let fresh: RefreshResponse = match serde_json::from_str(&text) {
            Ok(fresh) => fresh,
            Err(e) => return Err(self.expire(&e.to_string())),
        };
        if let Err(e) = self.tokens.set_tokens(&fresh.access, fresh.refresh.as_deref()) {
            crate::log_warn!(error = %e, "failed to persist refreshed tokens");
        }
        crate::log_info!("access token refreshed");
        Ok(())
    }

    fn expire(&self, reason: &str) -> ApiError {
        crate::log_warn!(reason, "session expired, clearing tokens");
        if let Err(e) = self.tokens.clear() {
            crate::log_error!(error = %e, "failed to clear tokens");
        }
        ApiError::SessionExpired
    }
}

fn finish(status: StatusCode, text: String) -> Result<String, ApiError> {
    if status.is_success() {
        Ok(text)
    } else {
        Err(ApiError::Http {
            status: status.as_u16(),
            body: text,
        })
    }
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
    let text = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(text).map_err(|e| ApiError::Deserialize(e.to_string()))
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        let listing: Listing<ConversationSummary> = self.get_json("chat/conversations/").await?;
        Ok(listing.into_vec())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        let listing: Listing<ChatMessage> = self
            .get_json(&format!("chat/conversations/{conversation_id}/messages/"))
            .await?;
        Ok(listing.into_vec())
    }

    async fn create_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<ChatMessage, ApiError> {
        self.post_json(
            &format!("chat/conversations/{conversation_id}/messages/"),
            &CreateMessageRequest {
                content: content.to_string(),
            },
        )
        .await
    }
}

#[async_trait]
impl CallsApi for ApiClient {
    async fn answer_call(&self, call_id: &str) -> Result<CallSession, ApiError> {
        let text = self
            .request(Method::POST, &format!("calls/{call_id}/answer/"), None)
            .await?;
        decode(&text)
    }

    async fn decline_call(&self, call_id: &str) -> Result<(), ApiError> {
        self.post_empty(&format!("calls/{call_id}/decline/")).await
    }

    async fn end_call(&self, call_id: &str) -> Result<(), ApiError> {
        self.post_empty(&format!("calls/{call_id}/end/")).await
    }

    async fn leave_call(&self, call_id: &str) -> Result<(), ApiError> {
        self.post_empty(&format!("calls/{call_id}/leave/")).await
    }
}
