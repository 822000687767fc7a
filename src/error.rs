// Error handling module
// Defines the auth/gateway error taxonomy and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures of the authorization flow and the refresh engine.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    /// The provider rejected the authorization code (already consumed or expired)
    #[error("Authorization code rejected: {0}")]
    InvalidCode(String),

    /// The code exchange failed for a non-code reason (network, non-2xx)
    #[error("Authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    /// The refresh token itself was rejected. Terminal for the session:
    /// the caller must clear stored credentials, never retry.
    #[error("Refresh token rejected: {0}")]
    RefreshRejected(String),

    /// Network error or provider 5xx. Retryable with backoff.
    #[error("Transient auth failure: {0}")]
    Transient(String),
}

/// Failures of an authenticated upstream call.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The upstream rejected the credential even after one refresh-and-retry.
    /// The session layer must treat this as "re-authenticate".
    #[error("Upstream rejected credentials")]
    Unauthorized,

    /// Non-authorization upstream failure (rate limit, bad parameters, 5xx).
    /// Credential state is untouched.
    #[error("Upstream error: {status} - {body}")]
    Upstream { status: u16, body: String },

    /// Transport-level failure before any upstream status was received
    #[error("Network failure: {0}")]
    NetworkFailure(String),
}

/// Errors surfaced on the HTTP API, converted to the wire's `{"error": ...}`
/// bodies.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing access_token query parameter
    #[error("Access token is required")]
    MissingAccessToken,

    /// Request validation error
    #[error("{0}")]
    Validation(String),

    /// Credential rejected upstream after the single refresh-and-retry
    #[error("Invalid or expired access token")]
    Unauthorized,

    /// Refresh token rejected by the provider
    #[error("Failed to refresh token")]
    RefreshRejected,

    /// Upstream or transport failure, reported with a per-route message
    #[error("{0}")]
    Upstream(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Map a gateway failure to the route's wire contract, using `context`
    /// as the 500-level message (e.g. "Failed to fetch user profile").
    pub fn from_gateway(err: GatewayError, context: &str) -> Self {
        match err {
            GatewayError::Unauthorized => ApiError::Unauthorized,
            GatewayError::Upstream { status, body } => {
                tracing::error!(status, body = %body, "{}", context);
                ApiError::Upstream(context.to_string())
            }
            GatewayError::NetworkFailure(e) => {
                tracing::error!(error = %e, "{}", context);
                ApiError::Upstream(context.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::MissingAccessToken => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::RefreshRejected => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Upstream(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
