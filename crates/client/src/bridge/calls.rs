//! Call bridge: incoming-call prompt and the durable set of active calls.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use founderslib_shared::{CallInbound, CallSession, IncomingCall};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::api_client::CallsApi;
use crate::error::ClientError;
use crate::stores::ActiveCallStore;
use crate::ws::ConnectionEvent;

/// Where an answered call is taken.
pub trait Navigator: Send + Sync {
    /// Enter the call screen for `session`.
    fn open_call(&self, session: &CallSession);
}

/// Navigator that only logs; used by the headless runner.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn open_call(&self, session: &CallSession) {
        crate::log_info!(
            call_id = %session.call_id,
            conversation_id = ?session.conversation_id,
            "entering call"
        );
    }
}

#[derive(Debug, Default)]
struct CallState {
    prompt: Option<IncomingCall>,
    /// Ids whose prompt was answered, declined or dismissed.
    handled: HashSet<String>,
    /// Ids reported by `call_ended`.
    ended: HashSet<String>,
    notice: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallSnapshot {
    pub prompt: Option<IncomingCall>,
    pub notice: Option<String>,
}

pub struct CallBridge {
    api: Arc<dyn CallsApi>,
    active_calls: Arc<ActiveCallStore>,
    navigator: Arc<dyn Navigator>,
    state: Mutex<CallState>,
    revision: watch::Sender<u64>,
}

impl CallBridge {
    pub fn new(
        api: Arc<dyn CallsApi>,
        active_calls: Arc<ActiveCallStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            api,
            active_calls,
            navigator,
            state: Mutex::new(CallState::default()),
            revision: watch::channel(0).0,
        }
    }

    /// Consume connection events until the stream ends or the bridge is
    /// dropped.
    pub fn spawn(
        self: &Arc<Self>,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(run(Arc::downgrade(self), events))
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let state = self.state();
        CallSnapshot {
            prompt: state.prompt.clone(),
            notice: state.notice.clone(),
        }
    }

    pub fn prompt(&self) -> Option<IncomingCall> {
        self.state().prompt.clone()
    }

    pub fn active_call_ids(&self) -> Vec<String> {
        self.active_calls.ids()
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
        match CallInbound::parse(raw) {
            CallInbound::IncomingCall(call) => self.incoming(call),
            CallInbound::CallEnded { call_id } => self.ended(&call_id),
            CallInbound::Other(kind) => crate::log_debug!(kind, "ignoring calls event"),
            CallInbound::Malformed => crate::log_debug!("ignoring malformed calls frame"),
        }
    }

    fn incoming(&self, call: IncomingCall) {
        {
            let mut state = self.state();
            let showing = state.prompt.as_ref().is_some_and(|p| p.call_id == call.call_id);
            if showing || state.handled.contains(&call.call_id) || state.ended.contains(&call.call_id) {
                return;
            }
            if let Err(e) = self.active_calls.add(&call.call_id) {
                crate::log_warn!(call_id = %call.call_id, error = %e, "failed to record call");
            }
            crate::log_info!(call_id = %call.call_id, caller = %call.caller.name, "incoming call");
            state.prompt = Some(call);
        }
        self.bump();
    }

    fn ended(&self, call_id: &str) {
        {
            let mut state = self.state();
            state.ended.insert(call_id.to_string());
            if state.prompt.as_ref().is_some_and(|p| p.call_id == call_id) {
                state.prompt = None;
            }
            if let Err(e) = self.active_calls.remove(call_id) {
                crate::log_warn!(call_id, error = %e, "failed to forget ended call");
            }
        }
        crate::log_info!(call_id, "call ended");
        self.bump();
    }

    /// Forget the prompt, the notice and every handled or ended id. Called on
    /// logout so a later session starts clean.
    pub fn reset(&self) {
        *self.state() = CallState::default();
        self.bump();
    }

    /// Hide the prompt without telling the server.
    pub fn dismiss(&self) {
        let dismissed = {
            let mut state = self.state();
            let prompt = state.prompt.take();
            if let Some(prompt) = &prompt {
                state.handled.insert(prompt.call_id.clone());
            }
            prompt.is_some()
        };
        if dismissed {
            self.bump();
        }
    }

    /// Decline `call_id`. On failure nothing changes and a notice is raised.
    pub async fn decline(&self, call_id: &str) -> Result<(), ClientError> {
        if let Err(e) = self.api.decline_call(call_id).await {
            return Err(self.action_failed("decline", call_id, e.into()));
        }

        {
            let mut state = self.state();
            state.handled.insert(call_id.to_string());
            if state.prompt.as_ref().is_some_and(|p| p.call_id == call_id) {
                state.prompt = None;
            }
        }
        if let Err(e) = self.active_calls.remove(call_id) {
            crate::log_warn!(call_id, error = %e, "failed to forget declined call");
        }
        self.bump();
        Ok(())
    }

    /// Answer `call_id` and enter the call. On failure the prompt stays and a
    /// notice is raised.
    pub async fn answer(&self, call_id: &str) -> Result<CallSession, ClientError> {
        let mut session = match self.api.answer_call(call_id).await {
            Ok(session) => session,
            Err(e) => return Err(self.action_failed("answer", call_id, e.into())),
        };

        {
            let mut state = self.state();
            let prompt = if state.prompt.as_ref().is_some_and(|p| p.call_id == call_id) {
                state.prompt.take()
            } else {
                None
            };
            if session.conversation_id.is_none() {
                session.conversation_id = prompt.and_then(|p| p.conversation_id);
            }
            state.handled.insert(call_id.to_string());

            // call_ended may have overtaken the answer response.
            if !state.ended.contains(&session.call_id) {
                if let Err(e) = self.active_calls.add(&session.call_id) {
                    crate::log_warn!(call_id = %session.call_id, error = %e, "failed to record call");
                }
            }
        }
        self.bump();

        self.navigator.open_call(&session);
        Ok(session)
    }

    fn action_failed(&self, action: &str, call_id: &str, error: ClientError) -> ClientError {
        crate::log_warn!(action, call_id, error = %error, "call action failed");
        self.state().notice = Some(error.user_message());
        self.bump();
        error
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    fn state(&self) -> MutexGuard<'_, CallState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn run(bridge: Weak<CallBridge>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(bridge) = bridge.upgrade() else {
            break;
        };
        if let ConnectionEvent::Message(text) = event {
            bridge.handle_frame(&text);
        }
    }
    crate::log_debug!("call bridge stopped");
}
