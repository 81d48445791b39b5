//! Session tokens and logout.

use std::collections::HashSet;
use std::sync::Arc;

use crate::api_client::CallsApi;
use crate::storage::{KeyValueStore, StorageError};
use crate::stores::ActiveCallStore;
use crate::ws::Connection;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Access and refresh tokens kept in a [`KeyValueStore`].
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn access_token(&self) -> Option<String> {
        self.store
            .get(ACCESS_TOKEN_KEY)
            .filter(|t| !t.trim().is_empty())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.store
            .get(REFRESH_TOKEN_KEY)
            .filter(|t| !t.trim().is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Store a new access token; the refresh token is only replaced when the
    /// server rotated it.
    pub fn set_tokens(&self, access: &str, refresh: Option<&str>) -> Result<(), StorageError> {
        self.store.set(ACCESS_TOKEN_KEY, access)?;
        if let Some(refresh) = refresh {
            self.store.set(REFRESH_TOKEN_KEY, refresh)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(ACCESS_TOKEN_KEY)?;
        self.store.remove(REFRESH_TOKEN_KEY)
    }
}

/// The signed-in session: tokens, the calls the user is in, and the live
/// connections opened with those tokens.
pub struct AuthSession {
    tokens: TokenStore,
    active_calls: Arc<ActiveCallStore>,
    calls_api: Arc<dyn CallsApi>,
    connections: Vec<Connection>,
}

impl AuthSession {
    pub fn new(
        tokens: TokenStore,
        active_calls: Arc<ActiveCallStore>,
        calls_api: Arc<dyn CallsApi>,
    ) -> Self {
        Self {
            tokens,
            active_calls,
            calls_api,
            connections: Vec::new(),
        }
    }

    /// Connections torn down on logout.
    pub fn with_connections(mut self, connections: Vec<Connection>) -> Self {
        self.connections = connections;
        self
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated()
    }

    /// Log out.
    ///
    /// The channels are stopped first so no new call lands mid-sweep. Calls
    /// still in the active set are then ended server-side (falling back to
    /// leaving them) while the tokens are still valid. Failures there are
    /// logged and otherwise ignored. Only storage failures while clearing the
    /// tokens are returned.
    pub async fn logout(&self) -> Result<(), StorageError> {
        for conn in &self.connections {
            conn.set_url(None);
        }

        end_active_calls(self.calls_api.as_ref(), &self.active_calls).await;

        self.tokens.clear()?;
        crate::log_info!("logged out");
        Ok(())
    }
}

/// End (or leave) every call in the active set, then clear the set.
///
/// Ids recorded while the sweep is running are swept too; each id is tried
/// once.
pub async fn end_active_calls(api: &dyn CallsApi, active_calls: &ActiveCallStore) {
    let mut attempted = HashSet::new();
    while let Some(call_id) = active_calls
        .ids()
        .into_iter()
        .find(|id| !attempted.contains(id))
    {
        attempted.insert(call_id.clone());
        match api.end_call(&call_id).await {
            Ok(()) => crate::log_debug!(call_id, "ended call on logout"),
            Err(end_err) => {
                crate::log_debug!(call_id, error = %end_err, "end rejected, leaving call");
                if let Err(e) = api.leave_call(&call_id).await {
                    crate::log_warn!(call_id, error = %e, "failed to leave call on logout");
                }
            }
        }
    }

    if let Err(e) = active_calls.clear() {
        crate::log_warn!(error = %e, "failed to clear active calls");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use founderslib_shared::ApiError;

    use super::*;
    use crate::api_client::MockCallsApi;
    use crate::storage::MemoryStore;
    use crate::stores::ACTIVE_CALLS_KEY;

    fn forbidden() -> ApiError {
        ApiError::Http {
            status: 403,
            body: String::new(),
        }
    }

    #[test]
    fn token_store_reads_and_clears_both_keys() {
        let kv = Arc::new(MemoryStore::new());
        let tokens = TokenStore::new(kv.clone());
        assert!(!tokens.is_authenticated());

        tokens.set_tokens("a1", Some("r1")).unwrap();
        tokens.set_tokens("a2", None).unwrap();
        assert_eq!(tokens.access_token().as_deref(), Some("a2"));
        assert_eq!(tokens.refresh_token().as_deref(), Some("r1"));
        assert_eq!(kv.get(ACCESS_TOKEN_KEY).as_deref(), Some("a2"));

        tokens.clear().unwrap();
        assert_eq!(tokens.access_token(), None);
        assert_eq!(tokens.refresh_token(), None);
    }

    #[tokio::test]
    async fn logout_ends_calls_falls_back_to_leave_then_clears_everything() {
        // given: two active calls, "b" can only be left
        let kv = Arc::new(MemoryStore::new());
        let tokens = TokenStore::new(kv.clone());
        tokens.set_tokens("access", Some("refresh")).unwrap();
        let active = Arc::new(ActiveCallStore::new(kv.clone()));
        active.set_ids(&["a".to_string(), "b".to_string()]).unwrap();

        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut api = MockCallsApi::new();
        let end_log = log.clone();
        api.expect_end_call().times(2).returning(move |id| {
            end_log.lock().unwrap().push(format!("end:{id}"));
            if id == "a" {
                Ok(())
            } else {
                Err(forbidden())
            }
        });
        let leave_log = log.clone();
        api.expect_leave_call().times(1).returning(move |id| {
            leave_log.lock().unwrap().push(format!("leave:{id}"));
            Ok(())
        });

        let session = AuthSession::new(tokens.clone(), active.clone(), Arc::new(api));

        // when
        session.logout().await.unwrap();

        // then
        assert_eq!(*log.lock().unwrap(), vec!["end:a", "end:b", "leave:b"]);
        assert!(active.ids().is_empty());
        assert_eq!(kv.get(ACTIVE_CALLS_KEY), None);
        assert!(!session.is_authenticated());
        assert_eq!(tokens.refresh_token(), None);
    }

    #[tokio::test]
    async fn logout_ends_calls_recorded_during_the_sweep() {
        // given: "late" is recorded while "a" is being ended
        let kv = Arc::new(MemoryStore::new());
        let tokens = TokenStore::new(kv.clone());
        tokens.set_tokens("access", Some("refresh")).unwrap();
        let active = Arc::new(ActiveCallStore::new(kv.clone()));
        active.add("a").unwrap();

        let ended = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut api = MockCallsApi::new();
        let (ended_log, recorder) = (ended.clone(), active.clone());
        api.expect_end_call().times(2).returning(move |id| {
            ended_log.lock().unwrap().push(id.to_string());
            if id == "a" {
                recorder.add("late").unwrap();
            }
            Ok(())
        });
        api.expect_leave_call().never();

        let session = AuthSession::new(tokens, active.clone(), Arc::new(api));

        // when
        session.logout().await.unwrap();

        // then
        assert_eq!(*ended.lock().unwrap(), vec!["a", "late"]);
        assert!(active.ids().is_empty());
    }

    #[tokio::test]
    async fn logout_swallows_leave_failures() {
        let kv = Arc::new(MemoryStore::new());
        let tokens = TokenStore::new(kv.clone());
        tokens.set_tokens("access", None).unwrap();
        let active = Arc::new(ActiveCallStore::new(kv.clone()));
        active.add("x").unwrap();

        let mut api = MockCallsApi::new();
        api.expect_end_call()
            .times(1)
            .returning(|_| Err(ApiError::Network("offline".into())));
        api.expect_leave_call()
            .times(1)
            .returning(|_| Err(ApiError::Network("offline".into())));

        let session = AuthSession::new(tokens, active.clone(), Arc::new(api));
        session.logout().await.unwrap();

        assert!(active.ids().is_empty());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn logout_without_active_calls_makes_no_requests() {
        let kv = Arc::new(MemoryStore::new());
        let active = Arc::new(ActiveCallStore::new(kv.clone()));
        let api = MockCallsApi::new();

        let session = AuthSession::new(TokenStore::new(kv), active, Arc::new(api));
        session.logout().await.unwrap();
    }
}
