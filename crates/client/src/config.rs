//! Client configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::ws::{ReconnectPolicy, DEFAULT_RECONNECT_INTERVAL};

/// Default REST base when `FOUNDERSLIB_API_BASE_URL` is unset.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// A logical WebSocket channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Chat,
    Calls,
}

impl Channel {
    pub fn path(self) -> &'static str {
        match self {
            Channel::Chat => founderslib_shared::CHAT_WS_PATH,
            Channel::Calls => founderslib_shared::CALLS_WS_PATH,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::Chat => "chat",
            Channel::Calls => "calls",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub reconnect: ReconnectPolicy,
    /// Where the file store keeps its JSON files; `None` means the platform
    /// config directory.
    pub storage_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            storage_dir: None,
        }
    }
}

impl ClientConfig {
    /// Read configuration from the environment.
    ///
    /// Environment variables:
    /// - `FOUNDERSLIB_API_BASE_URL`: REST base URL (default: "http://localhost:8000/api")
    /// - `FOUNDERSLIB_RECONNECT_INTERVAL_MS`: reconnect delay in ms (default: 2000)
    /// - `FOUNDERSLIB_RECONNECT_BACKOFF`: "fixed" | "exponential" (default: "fixed")
    /// - `FOUNDERSLIB_STORAGE_DIR`: directory for persisted session state
    pub fn from_env() -> Self {
        let api_base_url = std::env::var("FOUNDERSLIB_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());

        let interval = std::env::var("FOUNDERSLIB_RECONNECT_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RECONNECT_INTERVAL);

        let backoff = std::env::var("FOUNDERSLIB_RECONNECT_BACKOFF")
            .unwrap_or_else(|_| "fixed".to_string())
            .to_lowercase();

        let reconnect = match backoff.as_str() {
            "exponential" => ReconnectPolicy::exponential_from(interval),
            _ => ReconnectPolicy::Fixed(interval),
        };

        let storage_dir = std::env::var("FOUNDERSLIB_STORAGE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            api_base_url,
            reconnect,
            storage_dir,
        }
    }

    /// WebSocket URL for `channel`, authorized with `token`.
    ///
    /// Browsers cannot set headers on the upgrade request, so the server reads
    /// the access token from the `token` query parameter. Only the host of the
    /// REST base is kept; its path is replaced by the channel path.
    pub fn ws_url(&self, channel: Channel, token: &str) -> Option<String> {
        ws_url(&self.api_base_url, channel.path(), token)
    }
}

/// Convert an HTTP(S) base URL into the `ws(s)://host/path?token=...` form.
pub fn ws_url(api_base_url: &str, path: &str, token: &str) -> Option<String> {
    let mut url = Url::parse(api_base_url).ok()?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        _ => return None,
    };
    url.set_scheme(scheme).ok()?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    url.query_pairs_mut().append_pair("token", token);
    Some(url.to_string())
}
