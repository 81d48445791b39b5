//! WebSocket connection with state management and auto-reconnect.
//!
//! A [`Connection`] is a cheap, cloneable handle to an actor task that owns
//! exactly one socket for one URL. The socket and the reconnect timer live in
//! the actor's loop and are released together on every exit path: URL change,
//! explicit [`Connection::close`], or the last handle being dropped.
//!
//! ```text
//!            set_url(None)                 set_url(Some)
//!   ┌──────────────────────────────┐   ┌──────────────┐
//!   ▼                              │   │              ▼
//! Idle ──set_url(Some)──▶ Connecting ──ok──▶ Open ──peer close / error──▶ Closed/Error
//!                             ▲                                               │
//!                             └────────── reconnect timer (if enabled) ───────┘
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::transport::{Connector, Socket, TransportError};

/// Delay between a close and the next connect attempt under the default policy.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(2000);

/// Connection state for a WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No URL (logged out) or torn down.
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }
}

/// How the connection retries after a close.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Retry after the same delay every time.
    Fixed(Duration),
    /// Exponential backoff, reset after every successful open.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f32,
        /// Maximum number of consecutive attempts (0 = infinite)
        max_attempts: u32,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(DEFAULT_RECONNECT_INTERVAL)
    }
}

impl ReconnectPolicy {
    /// Backoff starting at `initial`, capped at 30s, never giving up.
    pub fn exponential_from(initial: Duration) -> Self {
        ReconnectPolicy::Exponential {
            initial,
            max: Duration::from_secs(30),
            multiplier: 1.5,
            max_attempts: 0,
        }
    }

    /// Delay before retry number `attempt` (0-based), or `None` when the
    /// policy has given up.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Fixed(delay) => Some(*delay),
            ReconnectPolicy::Exponential {
                initial,
                max,
                multiplier,
                max_attempts,
            } => {
                if *max_attempts > 0 && attempt >= *max_attempts {
                    return None;
                }
                let exponent = attempt.min(i32::MAX as u32) as i32;
                let scaled = initial.as_secs_f32() * multiplier.powi(exponent);
                // 0 * inf is NaN once the factor overflows.
                let delay = if scaled.is_nan() {
                    0.0
                } else {
                    scaled.clamp(0.0, max.as_secs_f32())
                };
                Some(Duration::try_from_secs_f32(delay).map_or(*max, |d| d.min(*max)))
            }
        }
    }
}

/// Lifecycle notifications fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    /// One inbound text frame, in receipt order.
    Message(String),
    Closed,
    Error(String),
}

type OpenHandler = Arc<dyn Fn() + Send + Sync>;
type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// Optional callbacks, invoked on the connection task.
#[derive(Clone, Default)]
pub struct ConnectionHandlers {
    on_open: Option<OpenHandler>,
    on_message: Option<MessageHandler>,
    on_close: Option<OpenHandler>,
    on_error: Option<ErrorHandler>,
}

impl ConnectionHandlers {
    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&TransportError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for ConnectionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandlers")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Sent as `Sec-WebSocket-Protocol`.
    pub protocols: Vec<String>,
    /// Whether to reopen the socket after it closes.
    pub reconnect: bool,
    pub policy: ReconnectPolicy,
    pub handlers: ConnectionHandlers,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            protocols: Vec::new(),
            reconnect: true,
            policy: ReconnectPolicy::default(),
            handlers: ConnectionHandlers::default(),
        }
    }
}

enum Command {
    SetUrl(Option<String>),
    /// New URL for the next connect attempt, leaving the current socket and
    /// any pending reconnect timer alone. Ignored while idle.
    Retarget(String),
    Send(String),
    Shutdown,
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>>;

/// Handle to a managed WebSocket connection for one channel.
///
/// Clones share the same socket. Dropping the last clone tears it down.
#[derive(Clone)]
pub struct Connection {
    name: Arc<str>,
    commands: UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    last_message: watch::Receiver<Option<String>>,
    subscribers: Subscribers,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl Connection {
    /// Start the connection task. Must be called within a tokio runtime.
    ///
    /// With `url = None` the connection stays idle until [`Connection::set_url`].
    pub fn spawn(
        name: impl Into<Arc<str>>,
        url: Option<String>,
        options: ConnectionOptions,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let name = name.into();
        let (commands, command_rx) = unbounded();
        let (status_tx, status) = watch::channel(ConnectionStatus::Idle);
        let (last_tx, last_message) = watch::channel(None);
        let subscribers: Subscribers = Arc::default();

        let actor = ConnectionActor {
            name: name.clone(),
            connector,
            options,
            commands: command_rx,
            status: status_tx,
            last_message: last_tx,
            subscribers: subscribers.clone(),
            url,
        };
        let task = tokio::spawn(actor.run());

        Self {
            name,
            commands,
            status,
            last_message,
            subscribers,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Point the connection at a new URL. `None` tears the socket down.
    /// Setting the current URL again is a no-op.
    pub fn set_url(&self, url: Option<String>) {
        let _ = self.commands.unbounded_send(Command::SetUrl(url));
    }

    /// Use `url` for the next connect attempt without disturbing the open
    /// socket or the pending reconnect delay. Ignored while the connection
    /// has no URL, so it cannot revive a torn-down connection.
    pub fn retarget(&self, url: String) {
        let _ = self.commands.unbounded_send(Command::Retarget(url));
    }

    /// Fire-and-forget text send. Silently dropped unless the socket is open.
    pub fn send(&self, data: impl Into<String>) {
        if !self.status().is_open() {
            crate::log_debug!(channel = %self.name, "dropping send, socket not open");
            return;
        }
        let _ = self.commands.unbounded_send(Command::Send(data.into()));
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// The most recent inbound frame. Each frame overwrites the previous one;
    /// use [`Connection::subscribe`] to see every frame.
    pub fn last_message(&self) -> Option<String> {
        self.last_message.borrow().clone()
    }

    pub fn watch_last_message(&self) -> watch::Receiver<Option<String>> {
        self.last_message.clone()
    }

    /// Receive every event from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Wait until the connection reaches `status`. Returns `false` if the
    /// connection task has ended first.
    pub async fn wait_for(&self, status: ConnectionStatus) -> bool {
        let mut rx = self.status.clone();
        let reached = rx.wait_for(|current| *current == status).await.is_ok();
        reached
    }

    /// Tear the connection down and wait for the task to finish.
    pub async fn close(&self) {
        let _ = self.commands.unbounded_send(Command::Shutdown);
        let task = self.task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                crate::log_error!(channel = %self.name, "connection task failed: {}", e);
            }
        }
    }
}

/// Why a socket session ended.
enum Exit {
    /// The socket closed on its own (peer close, error, failed connect).
    Closed,
    UrlChanged(Option<String>),
    Shutdown,
}

/// Outcome of waiting between sessions.
enum Wait {
    Elapsed,
    UrlChanged(Option<String>),
    Shutdown,
}

struct ConnectionActor {
    name: Arc<str>,
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    commands: UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    last_message: watch::Sender<Option<String>>,
    subscribers: Subscribers,
    url: Option<String>,
}

impl ConnectionActor {
    async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            let Some(url) = self.url.clone() else {
                self.set_status(ConnectionStatus::Idle);
                match self.wait(None).await {
                    Wait::UrlChanged(url) => {
                        self.url = url;
                        attempt = 0;
                        continue;
                    }
                    Wait::Elapsed => continue,
                    Wait::Shutdown => break,
                }
            };

            let (exit, opened) = self.session(&url).await;
            if opened {
                attempt = 0;
            }

            match exit {
                Exit::Shutdown => break,
                Exit::UrlChanged(new_url) => {
                    self.url = new_url;
                    attempt = 0;
                }
                Exit::Closed => {
                    let delay = if self.options.reconnect {
                        self.options.policy.delay_for_attempt(attempt)
                    } else {
                        None
                    };
                    match delay {
                        Some(delay) => {
                            crate::log_info!(
                                channel = %self.name,
                                "Reconnecting in {}ms (attempt {})",
                                delay.as_millis(),
                                attempt + 1
                            );
                        }
                        None if self.options.reconnect => {
                            crate::log_warn!(channel = %self.name, "giving up reconnecting");
                        }
                        None => {}
                    }
                    match self.wait(delay).await {
                        Wait::Elapsed => attempt = attempt.saturating_add(1),
                        Wait::UrlChanged(new_url) => {
                            self.url = new_url;
                            attempt = 0;
                        }
                        Wait::Shutdown => break,
                    }
                }
            }
        }

        self.set_status(ConnectionStatus::Idle);
        crate::log_debug!(channel = %self.name, "connection task stopped");
    }

    /// Connect to `url` and pump frames until the socket ends or a command
    /// supersedes it. Returns whether the socket ever opened.
    async fn session(&mut self, url: &str) -> (Exit, bool) {
        self.set_status(ConnectionStatus::Connecting);

        let connector = self.connector.clone();
        let protocols = self.options.protocols.clone();
        let mut connect = connector.connect(url, &protocols);

        let result = loop {
            tokio::select! {
                result = &mut connect => break result,
                cmd = self.commands.next() => match cmd {
                    Some(Command::Send(_)) => {
                        crate::log_debug!(channel = %self.name, "dropping send while connecting");
                    }
                    Some(Command::SetUrl(new_url)) => {
                        if new_url.as_deref() != Some(url) {
                            // Dropping the pending connect abandons it.
                            return (Exit::UrlChanged(new_url), false);
                        }
                        self.url = new_url;
                    }
                    Some(Command::Retarget(next)) => self.retarget(next),
                    Some(Command::Shutdown) | None => return (Exit::Shutdown, false),
                },
            }
        };

        let mut socket = match result {
            Ok(socket) => socket,
            Err(e) => {
                crate::log_error!(channel = %self.name, "WebSocket error: {}", e);
                self.fail(&e);
                self.closed();
                return (Exit::Closed, false);
            }
        };

        crate::log_info!(channel = %self.name, "WebSocket connected");
        self.set_status(ConnectionStatus::Open);
        if let Some(on_open) = &self.options.handlers.on_open {
            on_open();
        }
        self.publish(ConnectionEvent::Opened);

        let exit = self.pump(&mut *socket, url).await;
        if matches!(exit, Exit::Closed) {
            crate::log_info!(channel = %self.name, "WebSocket closed");
            self.closed();
        }
        (exit, true)
    }

    async fn pump(&mut self, socket: &mut dyn Socket, url: &str) -> Exit {
        loop {
            tokio::select! {
                frame = socket.recv() => match frame {
                    Some(Ok(text)) => self.deliver(text),
                    Some(Err(e)) => {
                        crate::log_error!(channel = %self.name, "WebSocket read error: {}", e);
                        self.fail(&e);
                        return Exit::Closed;
                    }
                    None => return Exit::Closed,
                },
                cmd = self.commands.next() => match cmd {
                    Some(Command::Send(data)) => {
                        if let Err(e) = socket.send_text(data).await {
                            crate::log_error!(channel = %self.name, "Send failed: {}", e);
                            self.fail(&e);
                            return Exit::Closed;
                        }
                    }
                    Some(Command::SetUrl(new_url)) => {
                        if new_url.as_deref() != Some(url) {
                            socket.close().await;
                            return Exit::UrlChanged(new_url);
                        }
                        self.url = new_url;
                    }
                    Some(Command::Retarget(next)) => self.retarget(next),
                    Some(Command::Shutdown) | None => {
                        socket.close().await;
                        return Exit::Shutdown;
                    }
                },
            }
        }
    }

    /// Sit between sessions until `delay` elapses (never, if `None`) or a
    /// command changes the plan. Sends are dropped: nothing is open.
    async fn wait(&mut self, delay: Option<Duration>) -> Wait {
        let timer = async {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = &mut timer => return Wait::Elapsed,
                cmd = self.commands.next() => match cmd {
                    Some(Command::Send(_)) => {
                        crate::log_debug!(channel = %self.name, "dropping send, socket not open");
                    }
                    Some(Command::SetUrl(new_url)) => {
                        if new_url != self.url {
                            return Wait::UrlChanged(new_url);
                        }
                    }
                    // The timer keeps running; the next attempt uses the new URL.
                    Some(Command::Retarget(next)) => self.retarget(next),
                    Some(Command::Shutdown) | None => return Wait::Shutdown,
                },
            }
        }
    }

    fn retarget(&mut self, next: String) {
        if self.url.is_some() {
            self.url = Some(next);
        }
    }

    fn deliver(&self, text: String) {
        self.last_message.send_replace(Some(text.clone()));
        if let Some(on_message) = &self.options.handlers.on_message {
            on_message(&text);
        }
        self.publish(ConnectionEvent::Message(text));
    }

    fn fail(&self, error: &TransportError) {
        self.set_status(ConnectionStatus::Error);
        if let Some(on_error) = &self.options.handlers.on_error {
            on_error(error);
        }
        self.publish(ConnectionEvent::Error(error.to_string()));
    }

    fn closed(&self) {
        self.set_status(ConnectionStatus::Closed);
        if let Some(on_close) = &self.options.handlers.on_close {
            on_close();
        }
        self.publish(ConnectionEvent::Closed);
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    fn publish(&self, event: ConnectionEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}
