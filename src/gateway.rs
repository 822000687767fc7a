// Authenticated request gateway for the Spotify Web API

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::SessionManager;
use crate::error::{AuthError, GatewayError};
use crate::models::spotify::UpstreamCall;

enum Dispatch {
    Done(Value),
    AuthRejected { status: u16 },
}

/// Wraps every outbound Spotify call with credential attachment, a single
/// refresh-and-retry on authorization failure, and uniform error
/// translation. Reads credentials only; all writes go through the session's
/// refresh path.
pub struct SpotifyGateway {
    /// Shared HTTP client with connection pooling
    client: Client,

    api_base_url: String,
}

impl SpotifyGateway {
    pub fn new(
        api_base_url: String,
        max_connections: usize,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self::with_client(client, api_base_url))
    }

    pub fn with_client(client: Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Execute one upstream call for the given session.
    ///
    /// Expired credentials are refreshed before dispatch. An authorization
    /// failure from a fresh-looking token (clock skew, revocation) triggers
    /// exactly one reactive refresh-and-retry; a second rejection is
    /// terminal for the call.
    pub async fn call(
        &self,
        session: &Arc<SessionManager>,
        upstream: &UpstreamCall,
    ) -> Result<Value, GatewayError> {
        let token = session
            .access_token()
            .await
            .map_err(auth_failure_to_gateway)?;

        tracing::debug!(
            path = upstream.path,
            scope = upstream.required_scope.as_str(),
            "Dispatching upstream call"
        );

        match self.dispatch(&token, upstream).await? {
            Dispatch::Done(value) => Ok(value),
            Dispatch::AuthRejected { status } => {
                tracing::warn!(
                    status,
                    path = upstream.path,
                    "Upstream rejected token, refreshing and retrying once"
                );

                let token = session
                    .refreshed_token(&token)
                    .await
                    .map_err(auth_failure_to_gateway)?;

                match self.dispatch(&token, upstream).await? {
                    Dispatch::Done(value) => Ok(value),
                    Dispatch::AuthRejected { status } => {
                        tracing::warn!(
                            status,
                            path = upstream.path,
                            "Upstream rejected refreshed token"
                        );
                        Err(GatewayError::Unauthorized)
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        access_token: &str,
        upstream: &UpstreamCall,
    ) -> Result<Dispatch, GatewayError> {
        let url = format!("{}{}", self.api_base_url, upstream.path);

        let response = self
            .client
            .get(&url)
            .query(&upstream.query)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkFailure(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            let value = response
                .json()
                .await
                .map_err(|e| GatewayError::NetworkFailure(format!("invalid payload: {}", e)))?;
            return Ok(Dispatch::Done(value));
        }

        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Ok(Dispatch::AuthRejected {
                status: status.as_u16(),
            });
        }

        // Rate limits, malformed parameters, upstream 5xx: surfaced as-is,
        // credential state untouched
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), body = %body, url = %url, "Upstream error");
        Err(GatewayError::Upstream {
            status: status.as_u16(),
            body,
        })
    }
}

/// Session-level auth failures observed while resolving a token for dispatch.
fn auth_failure_to_gateway(err: AuthError) -> GatewayError {
    match err {
        AuthError::Transient(msg) => GatewayError::NetworkFailure(msg),
        // Rejected, invalid or absent credentials all mean re-authenticate
        _ => GatewayError::Unauthorized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, CredentialStore, RefreshEngine, SessionState};
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;

    fn gateway(api_url: &str) -> SpotifyGateway {
        SpotifyGateway::with_client(Client::new(), api_url.to_string())
    }

    async fn session_with(
        accounts_url: &str,
        credential: Credential,
    ) -> Arc<SessionManager> {
        let store = Arc::new(CredentialStore::in_memory());
        store.replace(credential).await;
        let refresher = Arc::new(RefreshEngine::new(
            Client::new(),
            "client-id".to_string(),
            "client-secret".to_string(),
            accounts_url,
        ));
        Arc::new(SessionManager::new(store, refresher, 0, 0))
    }

    fn expired_credential() -> Credential {
        Credential {
            access_token: "A1".to_string(),
            refresh_token: Some("R1".to_string()),
            expires_at: Utc::now() - ChronoDuration::seconds(1),
        }
    }

    fn valid_credential() -> Credential {
        Credential {
            access_token: "A1".to_string(),
            refresh_token: Some("R1".to_string()),
            expires_at: Utc::now() + ChronoDuration::seconds(3600),
        }
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_before_dispatch() {
        let mut accounts = mockito::Server::new_async().await;
        let refresh_mock = accounts
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(
                json!({"access_token": "A2", "token_type": "Bearer", "expires_in": 3600})
                    .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let mut api = mockito::Server::new_async().await;
        let profile_mock = api
            .mock("GET", "/me")
            .match_header("authorization", "Bearer A2")
            .with_status(200)
            .with_body(json!({"id": "user-1", "display_name": "User"}).to_string())
            .create_async()
            .await;

        let session = session_with(&accounts.url(), expired_credential()).await;
        let profile = gateway(&api.url())
            .call(&session, &UpstreamCall::user_profile())
            .await
            .unwrap();

        assert_eq!(profile["id"], "user-1");
        refresh_mock.assert_async().await;
        profile_mock.assert_async().await;

        // Store observed the atomic replacement
        let stored = session.store().current().await.unwrap();
        assert_eq!(stored.access_token, "A2");
        assert!(stored.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn upstream_401_with_valid_token_triggers_one_retry() {
        let mut accounts = mockito::Server::new_async().await;
        let refresh_mock = accounts
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(
                json!({"access_token": "A2", "token_type": "Bearer", "expires_in": 3600})
                    .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        // Simulated revocation: upstream rejects both tokens
        let mut api = mockito::Server::new_async().await;
        let api_mock = api
            .mock("GET", "/me")
            .with_status(401)
            .with_body(json!({"error": {"status": 401}}).to_string())
            .expect(2)
            .create_async()
            .await;

        let session = session_with(&accounts.url(), valid_credential()).await;
        let err = gateway(&api.url())
            .call(&session, &UpstreamCall::user_profile())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Unauthorized));
        refresh_mock.assert_async().await;
        api_mock.assert_async().await;
    }

    #[tokio::test]
    async fn retry_succeeds_after_reactive_refresh() {
        let mut accounts = mockito::Server::new_async().await;
        accounts
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(
                json!({"access_token": "A2", "token_type": "Bearer", "expires_in": 3600})
                    .to_string(),
            )
            .create_async()
            .await;

        let mut api = mockito::Server::new_async().await;
        api.mock("GET", "/me/top/tracks")
            .match_header("authorization", "Bearer A1")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .create_async()
            .await;
        let retry_mock = api
            .mock("GET", "/me/top/tracks")
            .match_header("authorization", "Bearer A2")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(json!({"items": []}).to_string())
            .create_async()
            .await;

        let session = session_with(&accounts.url(), valid_credential()).await;
        let payload = gateway(&api.url())
            .call(&session, &UpstreamCall::top_tracks())
            .await
            .unwrap();

        assert_eq!(payload["items"], json!([]));
        retry_mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_auth_errors_surface_without_touching_credentials() {
        let mut accounts = mockito::Server::new_async().await;
        let refresh_mock = accounts
            .mock("POST", "/api/token")
            .expect(0)
            .create_async()
            .await;

        let mut api = mockito::Server::new_async().await;
        api.mock("GET", "/me")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let session = session_with(&accounts.url(), valid_credential()).await;
        let err = gateway(&api.url())
            .call(&session, &UpstreamCall::user_profile())
            .await
            .unwrap_err();

        match err {
            GatewayError::Upstream { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("expected upstream error, got {:?}", other),
        }

        // Credential state untouched, no refresh attempted
        refresh_mock.assert_async().await;
        let stored = session.store().current().await.unwrap();
        assert_eq!(stored.access_token, "A1");
    }

    #[tokio::test]
    async fn bare_request_token_cannot_recover_from_401() {
        let refresher = Arc::new(RefreshEngine::new(
            Client::new(),
            "client-id".to_string(),
            "client-secret".to_string(),
            "http://127.0.0.1:1",
        ));
        let session = Arc::new(SessionManager::for_request_token("A1", refresher));

        let mut api = mockito::Server::new_async().await;
        api.mock("GET", "/me")
            .with_status(401)
            .create_async()
            .await;

        let err = gateway(&api.url())
            .call(&session, &UpstreamCall::user_profile())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Unauthorized));
        assert_eq!(session.state().await, SessionState::Unauthenticated);
    }
}
