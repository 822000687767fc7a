// Token refresh engine

use chrono::Utc;
use reqwest::Client;

use super::types::{Credential, TokenResponse};
use crate::error::AuthError;

/// Exchanges a refresh token for a new access token.
///
/// Uses the refresh token only, never the access token. Failure taxonomy:
/// a 4xx from the token endpoint means the refresh token itself is bad
/// (`RefreshRejected`, terminal); network errors, 429 and 5xx are
/// `Transient` and may be retried with backoff.
pub struct RefreshEngine {
    client: Client,
    client_id: String,
    client_secret: String,
    token_url: String,

    /// Base delay for exponential backoff (milliseconds)
    base_delay_ms: u64,
}

impl RefreshEngine {
    pub fn new(client: Client, client_id: String, client_secret: String, accounts_url: &str) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            token_url: format!("{}/api/token", accounts_url.trim_end_matches('/')),
            base_delay_ms: 1000,
        }
    }

    /// Refresh the given credential. On success the new credential carries
    /// the old refresh token unless the provider rotated it.
    pub async fn refresh(&self, current: &Credential) -> Result<Credential, AuthError> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::RefreshRejected("no refresh token present".to_string()))?;

        let mut credential = self.exchange(refresh_token).await?;
        if credential.refresh_token.is_none() {
            credential.refresh_token = current.refresh_token.clone();
        }
        Ok(credential)
    }

    /// Perform one refresh grant against the token endpoint.
    pub async fn exchange(&self, refresh_token: &str) -> Result<Credential, AuthError> {
        tracing::debug!("Refreshing access token...");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
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
            .map_err(|e| AuthError::Transient(format!("refresh request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Token refresh failed");

            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(AuthError::Transient(format!("{} - {}", status, body)));
            }
            return Err(AuthError::RefreshRejected(format!("{} - {}", status, body)));
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Transient(format!("invalid refresh response: {}", e)))?;

        if data.access_token.is_empty() {
            return Err(AuthError::Transient(
                "refresh response does not contain access_token".to_string(),
            ));
        }

        let credential = Credential::from_token_response(&data, Utc::now());
        tracing::info!(
            "Token refreshed, expires: {}",
            credential.expires_at.to_rfc3339()
        );

        Ok(credential)
    }

    /// Refresh with backoff. Only `Transient` failures are retried;
    /// `RefreshRejected` is returned immediately.
    pub async fn refresh_with_backoff(
        &self,
        current: &Credential,
        max_retries: u32,
    ) -> Result<Credential, AuthError> {
        let mut attempt = 0;

        loop {
            match self.refresh(current).await {
                Ok(credential) => return Ok(credential),
                Err(AuthError::Transient(msg)) if attempt < max_retries => {
                    let delay = self.calculate_backoff_delay(attempt);
                    tracing::warn!(
                        "Refresh failed transiently: {}, retrying after {}ms (attempt {}/{})",
                        msg,
                        delay,
                        attempt + 1,
                        max_retries
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Exponential backoff with jitter to avoid thundering herd
    fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let delay = self.base_delay_ms * 2_u64.pow(attempt);
        let jitter = (delay as f64 * 0.1 * rand::random()) as u64;
        delay + jitter
    }
}

// Simple random number generation for jitter
mod rand {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hash, Hasher};

    pub fn random() -> f64 {
        let state = RandomState::new();
        let mut hasher = state.build_hasher();
        std::time::SystemTime::now().hash(&mut hasher);
        (hasher.finish() % 1000) as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn engine(accounts_url: &str) -> RefreshEngine {
        RefreshEngine::new(
            Client::new(),
            "client-id".to_string(),
            "client-secret".to_string(),
            accounts_url,
        )
    }

    fn expired_credential() -> Credential {
        Credential {
            access_token: "A1".to_string(),
            refresh_token: Some("R1".to_string()),
            expires_at: Utc::now() - Duration::seconds(1),
        }
    }

    #[tokio::test]
    async fn refresh_carries_over_the_old_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(
                json!({"access_token": "A2", "token_type": "Bearer", "expires_in": 3600})
                    .to_string(),
            )
            .create_async()
            .await;

        let refreshed = engine(&server.url())
            .refresh(&expired_credential())
            .await
            .unwrap();

        assert_eq!(refreshed.access_token, "A2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("R1"));
        assert!(refreshed.expires_at > Utc::now());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rotated_refresh_token_replaces_the_old_one() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/token")
            .with_status(200)
            .with_body(
                json!({
                    "access_token": "A2",
                    "expires_in": 3600,
                    "refresh_token": "R2"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let refreshed = engine(&server.url())
            .refresh(&expired_credential())
            .await
            .unwrap();

        assert_eq!(refreshed.refresh_token.as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn rejected_refresh_token_is_terminal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/token")
            .with_status(400)
            .with_body(json!({"error": "invalid_grant"}).to_string())
            .create_async()
            .await;

        let err = engine(&server.url())
            .refresh(&expired_credential())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::RefreshRejected(_)));
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/token")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let err = engine(&server.url())
            .refresh(&expired_credential())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Transient(_)));
    }

    #[tokio::test]
    async fn missing_refresh_token_is_rejected_without_a_request() {
        let credential = Credential::assumed_valid("A1");
        let err = engine("http://127.0.0.1:1")
            .refresh(&credential)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::RefreshRejected(_)));
    }

    #[tokio::test]
    async fn backoff_does_not_retry_rejections() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .with_status(401)
            .with_body("bad client")
            .expect(1)
            .create_async()
            .await;

        let err = engine(&server.url())
            .refresh_with_backoff(&expired_credential(), 3)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::RefreshRejected(_)));
        mock.assert_async().await;
    }

    #[test]
    fn test_backoff_calculation() {
        let engine = engine("https://accounts.spotify.com");

        let delay0 = engine.calculate_backoff_delay(0);
        let delay1 = engine.calculate_backoff_delay(1);
        let delay2 = engine.calculate_backoff_delay(2);

        // Each delay roughly doubles, with up to 10% jitter
        assert!((1000..=1100).contains(&delay0));
        assert!((2000..=2200).contains(&delay1));
        assert!((4000..=4400).contains(&delay2));
    }
}
