//! Wiring of both channels, their bridges and the REST client for one
//! signed-in session.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::api_client::ApiClient;
use crate::auth_session::{AuthSession, TokenStore};
use crate::bridge::{CallBridge, ChatBridge, Navigator};
use crate::config::{Channel, ClientConfig};
use crate::error::ClientError;
use crate::storage::KeyValueStore;
use crate::stores::ActiveCallStore;
use crate::ws::{Connection, ConnectionHandlers, ConnectionOptions, ConnectionStatus, Connector};

pub struct LiveClient {
    config: ClientConfig,
    api: Arc<ApiClient>,
    tokens: TokenStore,
    chat: Connection,
    calls: Connection,
    chat_bridge: Arc<ChatBridge>,
    call_bridge: Arc<CallBridge>,
    session: AuthSession,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveClient {
    /// Open both channels with the stored access token. Without a token the
    /// connections stay idle until [`LiveClient::sync_channel_urls`].
    ///
    /// Must be called within a tokio runtime.
    pub fn start(
        config: ClientConfig,
        store: Arc<dyn KeyValueStore>,
        connector: Arc<dyn Connector>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ClientError> {
        if config.ws_url(Channel::Chat, "").is_none() {
            return Err(ClientError::InvalidBaseUrl(config.api_base_url.clone()));
        }

        let tokens = TokenStore::new(store.clone());
        let api = Arc::new(ApiClient::new(config.api_base_url.clone(), tokens.clone()));
        let active_calls = Arc::new(ActiveCallStore::new(store));

        let chat = spawn_channel(&config, &tokens, Channel::Chat, connector.clone());
        let calls = spawn_channel(&config, &tokens, Channel::Calls, connector);

        let chat_bridge = Arc::new(ChatBridge::new(Arc::new(chat.clone()), api.clone()));
        let call_bridge = Arc::new(CallBridge::new(api.clone(), active_calls.clone(), navigator));

        let tasks = vec![
            chat_bridge.spawn(chat.subscribe()),
            call_bridge.spawn(calls.subscribe()),
            tokio::spawn(follow_tokens(chat.clone(), config.clone(), tokens.clone(), Channel::Chat)),
            tokio::spawn(follow_tokens(calls.clone(), config.clone(), tokens.clone(), Channel::Calls)),
        ];

        let session = AuthSession::new(tokens.clone(), active_calls, api.clone())
            .with_connections(vec![chat.clone(), calls.clone()]);

        Ok(Self {
            config,
            api,
            tokens,
            chat,
            calls,
            chat_bridge,
            call_bridge,
            session,
            tasks,
        })
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn chat(&self) -> &Arc<ChatBridge> {
        &self.chat_bridge
    }

    pub fn calls(&self) -> &Arc<CallBridge> {
        &self.call_bridge
    }

    pub fn chat_connection(&self) -> &Connection {
        &self.chat
    }

    pub fn calls_connection(&self) -> &Connection {
        &self.calls
    }

    /// Point both channels at URLs built from the current access token, or
    /// tear them down when signed out. Call after login.
    pub fn sync_channel_urls(&self) {
        self.chat
            .set_url(channel_url(&self.config, &self.tokens, Channel::Chat));
        self.calls
            .set_url(channel_url(&self.config, &self.tokens, Channel::Calls));
    }

    /// Close both channels, end active calls, clear the tokens and forget
    /// the calls seen during the session.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self.session.logout().await;
        self.call_bridge.reset();
        result?;
        Ok(())
    }

    /// Stop background tasks and close both channels.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.chat.close().await;
        self.calls.close().await;
    }
}

fn channel_url(config: &ClientConfig, tokens: &TokenStore, channel: Channel) -> Option<String> {
    let token = tokens.access_token()?;
    config.ws_url(channel, &token)
}

fn spawn_channel(
    config: &ClientConfig,
    tokens: &TokenStore,
    channel: Channel,
    connector: Arc<dyn Connector>,
) -> Connection {
    let name = channel.name();
    let options = ConnectionOptions {
        policy: config.reconnect.clone(),
        handlers: ConnectionHandlers::default()
            .on_open(move || crate::log_info!(channel = name, "channel live"))
            .on_close(move || crate::log_debug!(channel = name, "channel closed")),
        ..ConnectionOptions::default()
    };
    Connection::spawn(name, channel_url(config, tokens, channel), options, connector)
}

/// After every close, point the next attempt at a URL built from the current
/// token so a refreshed token is picked up without skipping the reconnect
/// delay. A cleared token stops the retries.
async fn follow_tokens(
    conn: Connection,
    config: ClientConfig,
    tokens: TokenStore,
    channel: Channel,
) {
    let mut status = conn.watch_status();
    while status.changed().await.is_ok() {
        let current = *status.borrow_and_update();
        if current != ConnectionStatus::Closed {
            continue;
        }
        match channel_url(&config, &tokens, channel) {
            Some(url) => conn.retarget(url),
            None => conn.set_url(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::storage::MemoryStore;
    use crate::ws::testing::FakeConnector;
    use crate::ws::DEFAULT_RECONNECT_INTERVAL;

    fn config() -> ClientConfig {
        ClientConfig {
            api_base_url: "http://api.test".into(),
            ..ClientConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_uses_refreshed_token_after_the_usual_delay() {
        // given: an open chat channel built from token t1
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
        tokens.set_tokens("t1", Some("r1")).unwrap();
        let (connector, mut remotes) = FakeConnector::new();
        let conn = spawn_channel(&config(), &tokens, Channel::Chat, connector.clone());
        tokio::spawn(follow_tokens(conn.clone(), config(), tokens.clone(), Channel::Chat));
        let first = remotes.recv().await.unwrap();
        assert_eq!(first.url, "ws://api.test/ws/chat/?token=t1");
        assert!(conn.wait_for(ConnectionStatus::Open).await);

        // when: the token is refreshed and the socket drops
        tokens.set_tokens("t2", None).unwrap();
        first.close();
        assert!(conn.wait_for(ConnectionStatus::Closed).await);
        let closed_at = Instant::now();

        // then
        let second = remotes.recv().await.unwrap();
        assert_eq!(second.url, "ws://api.test/ws/chat/?token=t2");
        assert!(closed_at.elapsed() >= DEFAULT_RECONNECT_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_token_stops_retries() {
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
        tokens.set_tokens("t1", Some("r1")).unwrap();
        let (connector, mut remotes) = FakeConnector::new();
        let conn = spawn_channel(&config(), &tokens, Channel::Calls, connector.clone());
        tokio::spawn(follow_tokens(conn.clone(), config(), tokens.clone(), Channel::Calls));
        let first = remotes.recv().await.unwrap();
        assert!(conn.wait_for(ConnectionStatus::Open).await);

        tokens.clear().unwrap();
        first.close();

        assert!(conn.wait_for(ConnectionStatus::Idle).await);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.counters.connects.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
