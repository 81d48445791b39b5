//! Chat bridge: mirrors the `chat` channel into conversation state and
//! provides the composer's send path.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use founderslib_shared::{
    ChatInbound, ChatMessage, ChatOutbound, ConversationSummary, TypingEvent,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api_client::ChatApi;
use crate::error::ClientError;
use crate::stores::ConversationMessages;
use crate::ws::{ChannelSender, ConnectionEvent};

/// Quiet period after the last keystroke before `typing.stop` is sent.
pub const TYPING_IDLE: Duration = Duration::from_millis(1400);

#[derive(Debug, Default)]
struct OpenConversation {
    id: String,
    /// Bumped on every open; a snapshot fetched for an older epoch is stale.
    epoch: u64,
    messages: ConversationMessages,
    typing_users: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct ChatState {
    conversations: Vec<ConversationSummary>,
    open: Option<OpenConversation>,
    next_epoch: u64,
    notice: Option<String>,
}

/// Point-in-time copy of the bridge state, for rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSnapshot {
    pub conversations: Vec<ConversationSummary>,
    pub open_conversation: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub typing_users: Vec<String>,
    pub history_loaded: bool,
    pub notice: Option<String>,
}

/// How [`ChatBridge::send_message`] delivered a message.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Emitted on the socket; the message appears when the server echoes it.
    Socket { client_id: String },
    /// Created over REST and appended locally.
    Rest(ChatMessage),
}

pub struct ChatBridge {
    channel: Arc<dyn ChannelSender>,
    api: Arc<dyn ChatApi>,
    state: Mutex<ChatState>,
    typing_timer: Mutex<Option<JoinHandle<()>>>,
    typing_idle: Duration,
    revision: watch::Sender<u64>,
}

impl ChatBridge {
    pub fn new(channel: Arc<dyn ChannelSender>, api: Arc<dyn ChatApi>) -> Self {
        Self {
            channel,
            api,
            state: Mutex::new(ChatState::default()),
            typing_timer: Mutex::new(None),
            typing_idle: TYPING_IDLE,
            revision: watch::channel(0).0,
        }
    }

    pub fn with_typing_idle(mut self, idle: Duration) -> Self {
        self.typing_idle = idle;
        self
    }

    /// Consume connection events until the stream ends or the bridge is
    /// dropped.
    pub fn spawn(
        self: &Arc<Self>,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(run(Arc::downgrade(self), events))
    }

    /// Bumped after every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let state = self.state();
        let open = state.open.as_ref();
        ChatSnapshot {
            conversations: state.conversations.clone(),
            open_conversation: open.map(|o| o.id.clone()),
            messages: open.map(|o| o.messages.messages().to_vec()).unwrap_or_default(),
            typing_users: open
                .map(|o| o.typing_users.iter().cloned().collect())
                .unwrap_or_default(),
            history_loaded: open.is_some_and(|o| o.messages.is_loaded()),
            notice: state.notice.clone(),
        }
    }

    /// Return and clear the pending error notice.
    pub fn take_notice(&self) -> Option<String> {
        let notice = self.state().notice.take();
        if notice.is_some() {
            self.bump();
        }
        notice
    }

    /// Apply one inbound frame. Frames that do not decode are ignored.
    pub fn handle_frame(&self, raw: &str) {
        match ChatInbound::parse(raw) {
            ChatInbound::MessageNew(msg) => {
                let changed = apply_message(&mut self.state(), msg);
                if changed {
                    self.bump();
                }
            }
            ChatInbound::Typing(event) => {
                let changed = apply_typing(&mut self.state(), event);
                if changed {
                    self.bump();
                }
            }
            ChatInbound::Other(kind) => {
                crate::log_debug!(kind, "ignoring chat event");
            }
            ChatInbound::Malformed => {
                crate::log_debug!("ignoring malformed chat frame");
            }
        }
    }

    /// Fetch the conversation list.
    pub async fn load_conversations(&self) -> Result<(), ClientError> {
        let mut conversations = self.api.list_conversations().await?;
        {
            let mut state = self.state();
            if let Some(open) = &state.open {
                if let Some(summary) = conversations.iter_mut().find(|c| c.id == open.id) {
                    summary.unread_count = 0;
                }
            }
            state.conversations = conversations;
        }
        self.bump();
        Ok(())
    }

    /// Switch the visible conversation: leave the previous one, join `id`,
    /// then load its history.
    pub async fn open_conversation(&self, id: &str) -> Result<(), ClientError> {
        let epoch = {
            let mut state = self.state();
            let previous = state.open.as_ref().map(|o| o.id.clone());
            if previous.as_deref() != Some(id) {
                self.cancel_typing();
                if let Some(previous) = previous {
                    self.emit(ChatOutbound::ConversationLeave {
                        conversation_id: previous,
                    });
                }
                self.emit(ChatOutbound::ConversationJoin {
                    conversation_id: id.to_string(),
                });
            }

            state.next_epoch += 1;
            let epoch = state.next_epoch;
            let carried = state
                .open
                .take()
                .filter(|o| o.id == id)
                .map(|o| (o.messages, o.typing_users))
                .unwrap_or_default();
            state.open = Some(OpenConversation {
                id: id.to_string(),
                epoch,
                messages: carried.0,
                typing_users: carried.1,
            });
            if let Some(summary) = state.conversations.iter_mut().find(|c| c.id == id) {
                summary.unread_count = 0;
            }
            epoch
        };
        self.bump();

        let history = self.api.list_messages(id).await?;

        let applied = {
            let mut state = self.state();
            match state.open.as_mut() {
                Some(open) if open.epoch == epoch => {
                    open.messages.set_history(history);
                    true
                }
                _ => false,
            }
        };
        if applied {
            self.bump();
        } else {
            crate::log_debug!(conversation_id = id, "discarding stale history");
        }
        Ok(())
    }

    /// Leave the visible conversation.
    pub fn close_conversation(&self) {
        let previous = self.state().open.take();
        if let Some(previous) = previous {
            self.cancel_typing();
            self.emit(ChatOutbound::ConversationLeave {
                conversation_id: previous.id,
            });
            self.bump();
        }
    }

    /// Send `content` to the visible conversation.
    ///
    /// With the socket open the message goes out as `message.send` and is not
    /// applied locally; the server echo delivers it. Otherwise it is created
    /// over REST and the response is merged like any other `message.new`.
    pub async fn send_message(&self, content: &str) -> Result<SendOutcome, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let conversation_id = self
            .open_conversation_id()
            .ok_or(ClientError::NoOpenConversation)?;

        if self.channel.status().is_open() {
            self.stop_typing_now(&conversation_id);
            let client_id = Uuid::new_v4().to_string();
            self.emit(ChatOutbound::MessageSend {
                conversation_id,
                content: content.to_string(),
                client_id: client_id.clone(),
            });
            return Ok(SendOutcome::Socket { client_id });
        }

        match self.api.create_message(&conversation_id, content).await {
            Ok(msg) => {
                if apply_message(&mut self.state(), msg.clone()) {
                    self.bump();
                }
                Ok(SendOutcome::Rest(msg))
            }
            Err(e) => {
                crate::log_warn!(conversation_id, error = %e, "message create failed");
                self.state().notice = Some(e.user_message());
                self.bump();
                Err(e.into())
            }
        }
    }

    /// Record a keystroke in the composer: `typing.start` now, `typing.stop`
    /// once the composer has been quiet for the idle period.
    pub fn notify_typing(&self) {
        let Some(conversation_id) = self.open_conversation_id() else {
            return;
        };
        self.emit(ChatOutbound::TypingStart {
            conversation_id: conversation_id.clone(),
        });

        let channel = self.channel.clone();
        let idle = self.typing_idle;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            send_outbound(channel.as_ref(), &ChatOutbound::TypingStop { conversation_id });
        });

        if let Some(previous) = self.typing_timer().replace(timer) {
            previous.abort();
        }
    }

    /// Re-join the visible conversation after the socket (re)opened.
    fn rejoin(&self) {
        if let Some(conversation_id) = self.open_conversation_id() {
            self.emit(ChatOutbound::ConversationJoin { conversation_id });
        }
    }

    fn open_conversation_id(&self) -> Option<String> {
        self.state().open.as_ref().map(|o| o.id.clone())
    }

    fn stop_typing_now(&self, conversation_id: &str) {
        if let Some(timer) = self.typing_timer().take() {
            if !timer.is_finished() {
                timer.abort();
                self.emit(ChatOutbound::TypingStop {
                    conversation_id: conversation_id.to_string(),
                });
            }
        }
    }

    fn cancel_typing(&self) {
        if let Some(timer) = self.typing_timer().take() {
            timer.abort();
        }
    }

    fn emit(&self, event: ChatOutbound) {
        send_outbound(self.channel.as_ref(), &event);
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    fn state(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn typing_timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.typing_timer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ChatBridge {
    fn drop(&mut self) {
        self.cancel_typing();
    }
}

async fn run(bridge: Weak<ChatBridge>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(bridge) = bridge.upgrade() else {
            break;
        };
        match event {
            ConnectionEvent::Message(text) => bridge.handle_frame(&text),
            ConnectionEvent::Opened => bridge.rejoin(),
            ConnectionEvent::Closed | ConnectionEvent::Error(_) => {}
        }
    }
    crate::log_debug!("chat bridge stopped");
}

fn send_outbound(channel: &dyn ChannelSender, event: &ChatOutbound) {
    match event.to_json() {
        Ok(json) => channel.send(json),
        Err(e) => crate::log_error!(error = %e, "failed to encode chat event"),
    }
}

/// Merge a message into the list of the open conversation (if it is the
/// target) and into the conversation list. Returns whether anything changed.
fn apply_message(state: &mut ChatState, msg: ChatMessage) -> bool {
    let is_open = match state.open.as_mut() {
        Some(open) if open.id == msg.conversation_id => {
            if open.messages.contains(&msg.id) {
                return false;
            }
            if let Some(sender) = &msg.sender_id {
                open.typing_users.remove(sender);
            }
            true
        }
        _ => false,
    };

    let mut summary = match state
        .conversations
        .iter()
        .position(|c| c.id == msg.conversation_id)
    {
        Some(index) => state.conversations.remove(index),
        None => ConversationSummary::new(msg.conversation_id.clone()),
    };
    summary.last_message_preview = Some(msg.content.clone());
    // Socket deltas may omit the timestamp; the receipt time stands in.
    summary.last_message_at = Some(msg.created_at.unwrap_or_else(Utc::now));
    if !is_open {
        summary.unread_count = summary.unread_count.saturating_add(1);
    }
    state.conversations.insert(0, summary);

    if is_open {
        if let Some(open) = state.open.as_mut() {
            open.messages.add_message(msg);
        }
    }
    true
}

fn apply_typing(state: &mut ChatState, event: TypingEvent) -> bool {
    let Some(open) = state.open.as_mut() else {
        return false;
    };
    if open.id != event.conversation_id {
        return false;
    }
    if event.is_typing {
        open.typing_users.insert(event.user_id)
    } else {
        open.typing_users.remove(&event.user_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU8, Ordering};

    use founderslib_shared::ApiError;
    use serde_json::Value;

    use super::*;
    use crate::api_client::MockChatApi;
    use crate::ws::testing::FakeConnector;
    use crate::ws::{Connection, ConnectionOptions, ConnectionStatus};

    /// Channel double recording every outbound frame.
    #[derive(Default)]
    struct RecordingChannel {
        status: AtomicU8,
        sent: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn open() -> Arc<Self> {
            let channel = Arc::new(Self::default());
            channel.set_open(true);
            channel
        }

        fn closed() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn set_open(&self, open: bool) {
            self.status.store(u8::from(open), Ordering::SeqCst);
        }

        fn types(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|raw| {
                    let value: Value = serde_json::from_str(raw).unwrap();
                    value["type"].as_str().unwrap().to_string()
                })
                .collect()
        }

        fn frames(&self) -> Vec<Value> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|raw| serde_json::from_str(raw).unwrap())
                .collect()
        }
    }

    impl ChannelSender for RecordingChannel {
        fn status(&self) -> ConnectionStatus {
            if self.status.load(Ordering::SeqCst) == 1 {
                ConnectionStatus::Open
            } else {
                ConnectionStatus::Closed
            }
        }

        fn send(&self, data: String) {
            if self.status().is_open() {
                self.sent.lock().unwrap().push(data);
            }
        }
    }

    fn message(id: &str, conversation_id: &str, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: None,
            content: content.to_string(),
            created_at: None,
        }
    }

    fn frame(id: &str, conversation_id: &str, content: &str) -> String {
        format!(
            r#"{{"type":"message.new","data":{{"id":"{id}","conversation_id":"{conversation_id}","content":"{content}"}}}}"#
        )
    }

    fn api_with_history(history: Vec<ChatMessage>) -> MockChatApi {
        let mut api = MockChatApi::new();
        api.expect_list_messages()
            .returning(move |_| Ok(history.clone()));
        api
    }

    #[tokio::test]
    async fn test_message_new_for_open_conversation_is_appended_once() {
        // given: c1 is open with an empty history
        let channel = RecordingChannel::open();
        let bridge = ChatBridge::new(channel.clone(), Arc::new(api_with_history(vec![])));
        bridge.open_conversation("c1").await.unwrap();

        // when: the same message.new arrives twice
        let raw = r#"{"type":"message.new","data":{"id":"m1","conversation_id":"c1","content":"hi"}}"#;
        bridge.handle_frame(raw);
        bridge.handle_frame(raw);

        // then
        let snapshot = bridge.snapshot();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].content, "hi");
        assert_eq!(snapshot.conversations[0].id, "c1");
        assert_eq!(snapshot.conversations[0].last_message_preview.as_deref(), Some("hi"));
        assert_eq!(snapshot.conversations[0].unread_count, 0);
    }

    #[tokio::test]
    async fn test_message_for_other_conversation_updates_list_only() {
        let bridge = ChatBridge::new(RecordingChannel::open(), Arc::new(api_with_history(vec![])));
        bridge.open_conversation("c1").await.unwrap();

        bridge.handle_frame(&frame("m1", "c2", "psst"));
        bridge.handle_frame(&frame("m2", "c2", "hello?"));

        let snapshot = bridge.snapshot();
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.conversations.len(), 1);
        let c2 = &snapshot.conversations[0];
        assert_eq!(c2.id, "c2");
        assert_eq!(c2.last_message_preview.as_deref(), Some("hello?"));
        assert_eq!(c2.unread_count, 2);
    }

    #[tokio::test]
    async fn test_updated_conversation_moves_to_front() {
        let mut api = api_with_history(vec![]);
        api.expect_list_conversations().returning(|| {
            Ok(vec![
                ConversationSummary::new("c1"),
                ConversationSummary::new("c2"),
                ConversationSummary::new("c3"),
            ])
        });
        let bridge = ChatBridge::new(RecordingChannel::open(), Arc::new(api));
        bridge.load_conversations().await.unwrap();

        bridge.handle_frame(&frame("m1", "c3", "up"));

        let ids: Vec<String> = bridge
            .snapshot()
            .conversations
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["c3", "c1", "c2"]);
    }

    #[tokio::test]
    async fn test_malformed_and_foreign_frames_are_ignored() {
        let bridge = ChatBridge::new(RecordingChannel::open(), Arc::new(api_with_history(vec![])));
        bridge.open_conversation("c1").await.unwrap();
        let before = bridge.snapshot();

        bridge.handle_frame("not json");
        bridge.handle_frame(r#"{"type":"message.new"}"#);
        bridge.handle_frame(r#"{"type":"presence.update","data":{}}"#);

        assert_eq!(bridge.snapshot(), before);
    }

    #[tokio::test]
    async fn test_typing_is_scoped_to_open_conversation() {
        let bridge = ChatBridge::new(RecordingChannel::open(), Arc::new(api_with_history(vec![])));
        bridge.open_conversation("c1").await.unwrap();

        bridge.handle_frame(r#"{"type":"typing","data":{"conversation_id":"c2","user_id":"u9"}}"#);
        bridge.handle_frame(r#"{"type":"typing","data":{"conversation_id":"c1","user_id":"u1","is_typing":true}}"#);
        assert_eq!(bridge.snapshot().typing_users, vec!["u1"]);

        bridge.handle_frame(r#"{"type":"typing","data":{"conversation_id":"c1","user_id":"u1","is_typing":false}}"#);
        assert!(bridge.snapshot().typing_users.is_empty());
    }

    #[tokio::test]
    async fn test_open_conversation_leaves_previous_before_joining() {
        let channel = RecordingChannel::open();
        let bridge = ChatBridge::new(channel.clone(), Arc::new(api_with_history(vec![])));

        bridge.open_conversation("c1").await.unwrap();
        bridge.open_conversation("c2").await.unwrap();
        bridge.close_conversation();

        let frames = channel.frames();
        let summary: Vec<(String, String)> = frames
            .iter()
            .map(|f| {
                (
                    f["type"].as_str().unwrap().to_string(),
                    f["data"]["conversation_id"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("conversation.join".to_string(), "c1".to_string()),
                ("conversation.leave".to_string(), "c1".to_string()),
                ("conversation.join".to_string(), "c2".to_string()),
                ("conversation.leave".to_string(), "c2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_history_is_chronological_and_merged_with_deltas() {
        let history = vec![message("m3", "c1", "three"), message("m2", "c1", "two")];
        let bridge = ChatBridge::new(RecordingChannel::open(), Arc::new(api_with_history(history)));

        bridge.open_conversation("c1").await.unwrap();
        bridge.handle_frame(&frame("m3", "c1", "three"));
        bridge.handle_frame(&frame("m4", "c1", "four"));

        let ids: Vec<String> = bridge.snapshot().messages.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);
        assert!(bridge.snapshot().history_loaded);
    }

    #[tokio::test]
    async fn test_stale_history_is_discarded() {
        // given: c1's history is slow, c2's is immediate
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        struct SlowApi {
            release: Arc<tokio::sync::Mutex<Option<tokio::sync::oneshot::Receiver<()>>>>,
        }

        #[async_trait::async_trait]
        impl ChatApi for SlowApi {
            async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
                Ok(vec![])
            }
            async fn list_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
                if conversation_id == "c1" {
                    let rx = self.release.lock().await.take();
                    if let Some(rx) = rx {
                        let _ = rx.await;
                    }
                }
                Ok(vec![message(&format!("{conversation_id}-m"), conversation_id, "x")])
            }
            async fn create_message(&self, _: &str, _: &str) -> Result<ChatMessage, ApiError> {
                unreachable!()
            }
        }

        let bridge = Arc::new(ChatBridge::new(
            RecordingChannel::open(),
            Arc::new(SlowApi { release: release_rx }),
        ));

        // when: c1 is opened, then c2 before c1's history arrives
        let slow = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.open_conversation("c1").await })
        };
        tokio::task::yield_now().await;
        bridge.open_conversation("c2").await.unwrap();
        release_tx.send(()).unwrap();
        slow.await.unwrap().unwrap();

        // then
        let snapshot = bridge.snapshot();
        assert_eq!(snapshot.open_conversation.as_deref(), Some("c2"));
        let ids: Vec<String> = snapshot.messages.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["c2-m"]);
    }

    #[tokio::test]
    async fn test_send_uses_socket_when_open() {
        let channel = RecordingChannel::open();
        let mut api = api_with_history(vec![]);
        api.expect_create_message().never();
        let bridge = ChatBridge::new(channel.clone(), Arc::new(api));
        bridge.open_conversation("c1").await.unwrap();

        let outcome = bridge.send_message("  hello ").await.unwrap();

        let SendOutcome::Socket { client_id } = outcome else {
            panic!("expected socket send");
        };
        let last = channel.frames().pop().unwrap();
        assert_eq!(last["type"], "message.send");
        assert_eq!(last["data"]["content"], "hello");
        assert_eq!(last["data"]["client_id"], client_id.as_str());
        // Not applied locally until the echo arrives.
        assert!(bridge.snapshot().messages.is_empty());
    }

    #[tokio::test]
    async fn test_send_falls_back_to_rest_and_dedups_the_echo() {
        let channel = RecordingChannel::closed();
        let mut api = api_with_history(vec![]);
        api.expect_create_message()
            .times(1)
            .returning(|conversation_id, content| Ok(message("m7", conversation_id, content)));
        let bridge = ChatBridge::new(channel.clone(), Arc::new(api));
        bridge.open_conversation("c1").await.unwrap();

        let outcome = bridge.send_message("offline hello").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Rest(ref m) if m.id == "m7"));

        // A late socket echo of the same message is dropped.
        bridge.handle_frame(&frame("m7", "c1", "offline hello"));

        let snapshot = bridge.snapshot();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].content, "offline hello");
        assert!(channel.frames().is_empty());
    }

    #[tokio::test]
    async fn test_rest_send_failure_raises_notice() {
        let mut api = api_with_history(vec![]);
        api.expect_create_message().returning(|_, _| {
            Err(ApiError::Http {
                status: 400,
                body: r#"{"detail":"Conversation is archived"}"#.into(),
            })
        });
        let bridge = ChatBridge::new(RecordingChannel::closed(), Arc::new(api));
        bridge.open_conversation("c1").await.unwrap();

        let err = bridge.send_message("hi").await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(bridge.take_notice().as_deref(), Some("Conversation is archived"));
        assert_eq!(bridge.take_notice(), None);
        assert!(bridge.snapshot().messages.is_empty());
    }

    #[tokio::test]
    async fn test_send_requires_content_and_open_conversation() {
        let bridge = ChatBridge::new(RecordingChannel::open(), Arc::new(api_with_history(vec![])));
        assert!(matches!(
            bridge.send_message("hi").await,
            Err(ClientError::NoOpenConversation)
        ));
        bridge.open_conversation("c1").await.unwrap();
        assert!(matches!(
            bridge.send_message("   ").await,
            Err(ClientError::EmptyMessage)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_stop_is_debounced() {
        let channel = RecordingChannel::open();
        let bridge = ChatBridge::new(channel.clone(), Arc::new(api_with_history(vec![])));
        bridge.open_conversation("c1").await.unwrap();

        bridge.notify_typing();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        bridge.notify_typing();

        // 1399ms after the second keystroke: still typing.
        tokio::time::sleep(Duration::from_millis(1399)).await;
        assert!(!channel.types().contains(&"typing.stop".to_string()));

        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            channel.types(),
            vec!["conversation.join", "typing.start", "typing.start", "typing.stop"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversation_change_cancels_pending_typing_stop() {
        let channel = RecordingChannel::open();
        let bridge = ChatBridge::new(channel.clone(), Arc::new(api_with_history(vec![])));
        bridge.open_conversation("c1").await.unwrap();

        bridge.notify_typing();
        bridge.open_conversation("c2").await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(
            channel.types(),
            vec![
                "conversation.join",
                "typing.start",
                "conversation.leave",
                "conversation.join"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_bridge_cancels_pending_typing_stop() {
        let channel = RecordingChannel::open();
        let bridge = ChatBridge::new(channel.clone(), Arc::new(api_with_history(vec![])));
        bridge.open_conversation("c1").await.unwrap();

        bridge.notify_typing();
        drop(bridge);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(channel.types(), vec!["conversation.join", "typing.start"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bridge_follows_live_connection() {
        // given: a chat bridge wired to a managed connection
        let (connector, mut remotes) = FakeConnector::new();
        let conn = Connection::spawn("chat", None, ConnectionOptions::default(), connector);
        let bridge = Arc::new(ChatBridge::new(
            Arc::new(conn.clone()),
            Arc::new(api_with_history(vec![])),
        ));
        let mut changes = bridge.changes();
        bridge.spawn(conn.subscribe());
        bridge.open_conversation("c1").await.unwrap();

        // when: the socket opens and the server pushes a message
        conn.set_url(Some("ws://a/ws/chat/?token=t".into()));
        let mut remote = remotes.recv().await.unwrap();
        assert!(conn.wait_for(ConnectionStatus::Open).await);
        let _ = changes.borrow_and_update();
        remote.push(&frame("m1", "c1", "hi"));
        changes.changed().await.unwrap();

        // then: the join was replayed on open and the message merged
        let joined: Value = serde_json::from_str(&remote.from_client.recv().await.unwrap()).unwrap();
        assert_eq!(joined["type"], "conversation.join");
        assert_eq!(joined["data"]["conversation_id"], "c1");
        assert_eq!(bridge.snapshot().messages[0].content, "hi");
    }
}
