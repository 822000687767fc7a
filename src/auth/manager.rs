// Session manager
// Bootstrap state machine and single-flight token refresh

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::refresh::RefreshEngine;
use super::store::CredentialStore;
use super::types::{Credential, SessionState};
use crate::error::AuthError;

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, AuthError>>>;

/// Owns the credential store and serializes refresh for one session.
///
/// Concurrent callers that observe an expired token attach to a single
/// shared in-flight refresh instead of issuing duplicates; duplicate refresh
/// grants invalidate the prior refresh token at most providers and cascade
/// into a logout. The refresh runs as a spawned task, so a caller that
/// abandons its request does not cancel a refresh other waiters depend on.
pub struct SessionManager {
    store: Arc<CredentialStore>,
    refresher: Arc<RefreshEngine>,

    /// Current bootstrap state
    state: RwLock<SessionState>,

    /// The shared refresh in progress, if any
    inflight: Mutex<Option<RefreshFuture>>,

    /// Proactive refresh window in seconds (0 = refresh only once expired)
    refresh_threshold: i64,

    /// Retries for transient refresh failures
    refresh_max_retries: u32,
}

impl SessionManager {
    pub fn new(
        store: Arc<CredentialStore>,
        refresher: Arc<RefreshEngine>,
        refresh_threshold: i64,
        refresh_max_retries: u32,
    ) -> Self {
        Self {
            store,
            refresher,
            state: RwLock::new(SessionState::Unauthenticated),
            inflight: Mutex::new(None),
            refresh_threshold,
            refresh_max_retries,
        }
    }

    /// Session manager for a bare per-request token.
    pub fn for_request_token(access_token: &str, refresher: Arc<RefreshEngine>) -> Self {
        Self::new(
            Arc::new(CredentialStore::for_access_token(access_token)),
            refresher,
            0,
            0,
        )
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: SessionState) {
        let mut current = self.state.write().await;
        if *current != state {
            tracing::debug!(?state, "Session state transition");
            *current = state;
        }
    }

    /// Decide among {use cached token, refresh, unauthenticated} at startup.
    pub async fn bootstrap(self: &Arc<Self>) -> SessionState {
        let now = Utc::now();

        match self.store.current().await {
            None => {
                self.set_state(SessionState::Unauthenticated).await;
            }
            Some(credential) if !credential.is_expired(now, self.refresh_threshold) => {
                self.set_state(SessionState::Authenticated).await;
            }
            Some(credential) if credential.refresh_token.is_some() => {
                // Expired but refreshable; outcome sets the final state
                if let Err(e) = self.await_refresh(None).await {
                    tracing::warn!("Bootstrap refresh failed: {}", e);
                }
            }
            Some(_) => {
                // Expired with no refresh token: useless, drop it
                self.store.clear().await;
                self.set_state(SessionState::Unauthenticated).await;
            }
        }

        self.state().await
    }

    /// Valid access token for dispatch, refreshing proactively when expired.
    pub async fn access_token(self: &Arc<Self>) -> Result<String, AuthError> {
        match self.store.current().await {
            Some(credential) if !credential.is_expired(Utc::now(), self.refresh_threshold) => {
                Ok(credential.access_token)
            }
            Some(_) => self
                .await_refresh(None)
                .await
                .map(|credential| credential.access_token),
            None => {
                self.set_state(SessionState::Unauthenticated).await;
                Err(AuthError::RefreshRejected(
                    "no stored credential".to_string(),
                ))
            }
        }
    }

    /// Reactive path after an upstream rejection: force a refresh unless a
    /// concurrent caller already replaced `stale_token`.
    pub async fn refreshed_token(self: &Arc<Self>, stale_token: &str) -> Result<String, AuthError> {
        if let Some(credential) = self.store.current().await {
            if credential.access_token != stale_token
                && !credential.is_expired(Utc::now(), self.refresh_threshold)
            {
                return Ok(credential.access_token);
            }
        }

        self.await_refresh(Some(stale_token.to_string()))
            .await
            .map(|credential| credential.access_token)
    }

    /// Attach to the in-flight refresh, starting one if none is running.
    async fn await_refresh(
        self: &Arc<Self>,
        stale_token: Option<String>,
    ) -> Result<Credential, AuthError> {
        let future = {
            let mut slot = self.inflight.lock().await;
            match &*slot {
                Some(future) => future.clone(),
                None => {
                    let manager = Arc::clone(self);
                    let handle = tokio::spawn(manager.run_refresh(stale_token));
                    let future: RefreshFuture = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => {
                                Err(AuthError::Transient(format!("refresh task failed: {}", e)))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(future.clone());
                    future
                }
            }
        };

        future.await
    }

    async fn run_refresh(
        self: Arc<Self>,
        stale_token: Option<String>,
    ) -> Result<Credential, AuthError> {
        let result = self.do_refresh(stale_token).await;
        // Release the slot so the next expiry starts a fresh cycle
        self.inflight.lock().await.take();
        result
    }

    async fn do_refresh(&self, stale_token: Option<String>) -> Result<Credential, AuthError> {
        let Some(current) = self.store.current().await else {
            self.set_state(SessionState::Unauthenticated).await;
            return Err(AuthError::RefreshRejected(
                "no stored credential".to_string(),
            ));
        };

        // A concurrent refresh may already have produced a usable credential
        let fresh = !current.is_expired(Utc::now(), self.refresh_threshold);
        match stale_token.as_deref() {
            None if fresh => return Ok(current),
            Some(stale) if fresh && current.access_token != stale => return Ok(current),
            _ => {}
        }

        let previous = self.state().await;
        self.set_state(SessionState::Refreshing).await;

        match self
            .refresher
            .refresh_with_backoff(&current, self.refresh_max_retries)
            .await
        {
            Ok(credential) => {
                self.store.replace(credential.clone()).await;
                self.set_state(SessionState::Authenticated).await;
                Ok(credential)
            }
            Err(AuthError::RefreshRejected(msg)) => {
                // Terminal: both tokens go together, the session starts over
                tracing::warn!("Refresh rejected, clearing credentials: {}", msg);
                self.store.clear().await;
                self.set_state(SessionState::Unauthenticated).await;
                Err(AuthError::RefreshRejected(msg))
            }
            Err(e) => {
                // Transient: keep the stored credential for a later attempt
                self.set_state(previous).await;
                Err(e)
            }
        }
    }
}
