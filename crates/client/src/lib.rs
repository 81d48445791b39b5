//! FoundersLib live client
//!
//! Real-time core of the FoundersLib front end: a reconnecting WebSocket
//! connection manager, the chat and call bridges built on it, and the REST
//! and storage collaborators they need.

pub mod api_client;
pub mod auth_session;
pub mod bridge;
pub mod config;
pub mod error;
pub mod live;
pub mod logging;
pub mod storage;
pub mod stores;
pub mod ws;

pub use api_client::{ApiClient, CallsApi, ChatApi};
pub use auth_session::{AuthSession, TokenStore};
pub use bridge::{CallBridge, ChatBridge, LogNavigator, Navigator};
pub use config::{Channel, ClientConfig};
pub use error::ClientError;
pub use live::LiveClient;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use stores::ActiveCallStore;
pub use ws::{Connection, ConnectionOptions, ConnectionStatus, ReconnectPolicy};
