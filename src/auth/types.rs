// Credential and token wire types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds a bare per-request token is assumed valid for.
/// Tokens handed in via query parameter carry no expiry information, so the
/// gateway trusts them briefly and relies on the reactive 401 retry.
pub const ASSUMED_VALID_SECS: i64 = 60;

/// The current credential set for one session.
///
/// `expires_at` is always an absolute instant computed at the moment the
/// token response was received, never a relative `expires_in` stored as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    /// Bearer token for upstream calls. Opaque.
    pub access_token: String,

    /// Long-lived secret used only by the refresh engine.
    /// Absent for tokens handed in per request without a session.
    pub refresh_token: Option<String>,

    /// Absolute expiry instant.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential from a provider token response, anchoring the
    /// expiry to the receipt instant.
    pub fn from_token_response(response: &TokenResponse, received_at: DateTime<Utc>) -> Self {
        Self {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at: received_at + Duration::seconds(response.expires_in),
        }
    }

    /// Credential for a token supplied per request (no refresh token).
    pub fn assumed_valid(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: Utc::now() + Duration::seconds(ASSUMED_VALID_SECS),
        }
    }

    /// Whether the credential is expired at `now`, widened by `threshold`
    /// seconds for proactive refresh.
    pub fn is_expired(&self, now: DateTime<Utc>, threshold: i64) -> bool {
        self.expires_at <= now + Duration::seconds(threshold)
    }

    /// Remaining lifetime in whole seconds (zero when already expired).
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// Session bootstrap outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No usable credentials; the authorization flow must be entered.
    Unauthenticated,

    /// A refresh is in flight for an expired stored credential.
    Refreshing,

    /// A valid, non-expired credential is available.
    Authenticated,
}

/// Response from the accounts token endpoint.
/// Used for both the authorization-code exchange and the refresh grant;
/// `refresh_token` is only present on exchange or when the provider rotates it.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Body of `POST /refresh_token`.
#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshTokenBody {
    pub refresh_token: Option<String>,
}
