//! founderslib-live - headless runner for the chat and calls channels.
//!
//! Opens both channels for the session stored on disk and logs what the
//! bridges see until Ctrl-C. `--logout` ends active calls and signs out.

use std::sync::Arc;

use anyhow::Context;
use founderslib_client::logging::init_tracing;
use founderslib_client::storage::{FileStore, KeyValueStore};
use founderslib_client::ws::TungsteniteConnector;
use founderslib_client::{
    log_error, log_info, log_warn, ClientConfig, ClientError, LiveClient, LogNavigator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::from_env();
    let store: Arc<dyn KeyValueStore> = Arc::new(match &config.storage_dir {
        Some(dir) => FileStore::new(dir).context("opening storage directory")?,
        None => FileStore::in_config_dir().context("opening config directory")?,
    });

    let client = LiveClient::start(
        config.clone(),
        store,
        Arc::new(TungsteniteConnector),
        Arc::new(LogNavigator),
    )?;

    if !client.tokens().is_authenticated() {
        client.shutdown().await;
        return Err(ClientError::NotAuthenticated.into());
    }

    if std::env::args().any(|arg| arg == "--logout") {
        client.logout().await?;
        client.shutdown().await;
        return Ok(());
    }

    log_info!(api = %config.api_base_url, "starting live session");

    if let Err(e) = client.chat().load_conversations().await {
        log_warn!(error = %e, "could not load conversations");
    }

    let chat = client.chat().clone();
    let mut chat_changes = chat.changes();
    let chat_log = tokio::spawn(async move {
        while chat_changes.changed().await.is_ok() {
            let snapshot = chat.snapshot();
            if let Some(first) = snapshot.conversations.first() {
                log_info!(
                    conversation_id = %first.id,
                    unread = first.unread_count,
                    preview = ?first.last_message_preview,
                    "conversations updated"
                );
            }
            if let Some(notice) = chat.take_notice() {
                log_error!("{}", notice);
            }
        }
    });

    let calls = client.calls().clone();
    let mut call_changes = calls.changes();
    let call_log = tokio::spawn(async move {
        while call_changes.changed().await.is_ok() {
            let snapshot = calls.snapshot();
            if let Some(prompt) = &snapshot.prompt {
                log_info!(
                    call_id = %prompt.call_id,
                    caller = %prompt.caller.name,
                    video = matches!(prompt.call_type, founderslib_shared::CallType::Video),
                    "ringing"
                );
            }
            if let Some(notice) = calls.take_notice() {
                log_error!("{}", notice);
            }
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    log_info!("shutting down");

    chat_log.abort();
    call_log.abort();
    client.shutdown().await;
    Ok(())
}
