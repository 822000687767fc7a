// Authorization-code flow
// Builds the provider authorize URL and exchanges callback codes for tokens

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use reqwest::Client;
use uuid::Uuid;

use super::store::CredentialStore;
use super::types::{Credential, TokenResponse};
use crate::error::AuthError;

/// Fixed, minimal scope set requested from the provider.
pub const SCOPES: [&str; 4] = [
    "user-read-private",
    "user-read-email",
    "user-top-read",
    "user-library-read",
];

/// Pending authorization states older than this are dropped on sight.
const STATE_TTL_SECS: i64 = 600;

/// Drives the OAuth2 authorization-code exchange with the provider.
///
/// Each issued redirect registers a one-time `state` nonce; the callback
/// consumes it exactly once. The authorization code itself is single-use at
/// the provider, so a replayed code fails the exchange deterministically.
pub struct AuthorizationFlow {
    client: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    authorize_url: String,
    token_url: String,

    /// In-flight authorization requests, keyed by state nonce.
    pending: DashMap<String, DateTime<Utc>>,
}

impl AuthorizationFlow {
    pub fn new(
        client: Client,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
        accounts_url: &str,
    ) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            redirect_uri,
            authorize_url: format!("{}/authorize", accounts_url.trim_end_matches('/')),
            token_url: format!("{}/api/token", accounts_url.trim_end_matches('/')),
            pending: DashMap::new(),
        }
    }

    /// Build the provider authorization URL and register its state nonce.
    pub fn begin_authorization(&self) -> String {
        let state = Uuid::new_v4().to_string();
        self.pending.insert(state.clone(), Utc::now());
        self.prune_stale_states();

        let scopes = SCOPES.join(" ");
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(&state)
        )
    }

    /// Consume a state nonce. Each nonce validates exactly one callback.
    pub fn consume_state(&self, state: &str) -> bool {
        self.pending.remove(state).is_some()
    }

    /// Exchange a one-time authorization code for a token triple and write
    /// the result into the store.
    ///
    /// `state` is verified when the callback carries one; callbacks without
    /// a state parameter are accepted for compatibility with clients that
    /// predate the nonce.
    pub async fn complete_authorization(
        &self,
        code: &str,
        state: Option<&str>,
        store: &CredentialStore,
    ) -> Result<Credential, AuthError> {
        if let Some(state) = state {
            if !self.consume_state(state) {
                return Err(AuthError::InvalidCode(
                    "unknown or already consumed state".to_string(),
                ));
            }
        }

        tracing::debug!("Exchanging authorization code for tokens");

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .header(
                "Authorization",
                super::basic_authorization(&self.client_id, &self.client_secret),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::ExchangeFailed(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Code exchange rejected");

            // 400 invalid_grant: code already consumed or expired
            if status == reqwest::StatusCode::BAD_REQUEST {
                return Err(AuthError::InvalidCode(body));
            }
            return Err(AuthError::ExchangeFailed(format!("{} - {}", status, body)));
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::ExchangeFailed(format!("invalid token response: {}", e)))?;

        let credential = Credential::from_token_response(&data, Utc::now());
        store.replace(credential.clone()).await;

        tracing::info!(
            "Authorization complete, token expires: {}",
            credential.expires_at.to_rfc3339()
        );

        Ok(credential)
    }

    fn prune_stale_states(&self) {
        let cutoff = Utc::now() - Duration::seconds(STATE_TTL_SECS);
        self.pending.retain(|_, created_at| *created_at > cutoff);
    }
}
