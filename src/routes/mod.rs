use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{AuthorizationFlow, RefreshEngine, RefreshTokenBody, SessionManager};
use crate::config::Config;
use crate::error::{ApiError, AuthError};
use crate::gateway::SpotifyGateway;
use crate::middleware;
use crate::models::spotify::{items_of, tracks_of, UpstreamCall};

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub flow: Arc<AuthorizationFlow>,
    pub session: Arc<SessionManager>,
    pub refresher: Arc<RefreshEngine>,
    pub gateway: Arc<SpotifyGateway>,
}

impl AppState {
    /// Session for a bare token handed in per request. Stateless across
    /// requests: each call gets its own store seeded with the query token.
    fn request_session(&self, access_token: &str) -> Arc<SessionManager> {
        Arc::new(SessionManager::for_request_token(
            access_token,
            Arc::clone(&self.refresher),
        ))
    }
}

/// Build the application with all routes and middleware
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(auth_routes(state.clone()))
        .merge(api_routes(state))
        .layer(middleware::cors_layer())
}

/// Health check routes (no tokens involved)
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// OAuth flow routes
pub fn auth_routes(state: AppState) -> Router {
    Router::new()
        .route("/login", get(login_handler))
        .route("/callback", get(callback_handler))
        .route("/refresh_token", post(refresh_token_handler))
        .with_state(state)
}

/// Proxied Spotify API routes
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/user-profile", get(user_profile_handler))
        .route("/api/top-tracks", get(top_tracks_handler))
        .route("/api/top-artists", get(top_artists_handler))
        .route("/api/recommendations", get(recommendations_handler))
        .with_state(state)
}

/// 302 redirect (the wire contract predates axum's 303/307 helpers)
fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// GET / - Simple health check
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Spotify Gateway is running",
        "version": VERSION
    }))
}

/// GET /health - Detailed health check
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

/// GET /login - redirect to the provider authorization URL
async fn login_handler(State(state): State<AppState>) -> Response {
    let authorize_url = state.flow.begin_authorization();
    tracing::info!("Redirecting to provider authorization");
    found(authorize_url)
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// GET /callback - exchange the authorization code, hand tokens to the client
///
/// Tokens travel to the client once via redirect parameters; the client must
/// persist them and strip them from the URL. The store, not the URL, is the
/// source of truth afterwards.
async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let frontend = state.config.frontend_uri.trim_end_matches('/');

    if let Some(ref error) = params.error {
        tracing::warn!(error = %error, "Provider denied authorization");
        return found(format!("{}/?error=auth_failed", frontend));
    }

    let Some(ref code) = params.code else {
        tracing::warn!("Callback without authorization code");
        return found(format!("{}/?error=auth_failed", frontend));
    };

    match state
        .flow
        .complete_authorization(code, params.state.as_deref(), state.session.store())
        .await
    {
        Ok(credential) => {
            // The store now holds a fresh credential; settle session state
            state.session.bootstrap().await;

            let expires_in = credential.expires_in(Utc::now());
            found(format!(
                "{}/?access_token={}&refresh_token={}&expires_in={}",
                frontend,
                urlencoding::encode(&credential.access_token),
                urlencoding::encode(credential.refresh_token.as_deref().unwrap_or_default()),
                expires_in
            ))
        }
        Err(e) => {
            tracing::error!("Error getting tokens: {}", e);
            found(format!("{}/?error=auth_failed", frontend))
        }
    }
}

/// POST /refresh_token - exchange a refresh token for a new access token
async fn refresh_token_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshTokenBody>,
) -> Result<Json<Value>, ApiError> {
    let refresh_token = body
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Validation("Refresh token is required".to_string()))?;

    match state.refresher.exchange(&refresh_token).await {
        Ok(credential) => Ok(Json(json!({
            "access_token": credential.access_token,
            "expires_in": credential.expires_in(Utc::now()),
        }))),
        Err(AuthError::RefreshRejected(msg)) => {
            tracing::warn!("Refresh token rejected: {}", msg);
            Err(ApiError::RefreshRejected)
        }
        Err(e) => {
            tracing::error!("Error refreshing token: {}", e);
            Err(ApiError::Upstream("Failed to refresh token".to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

fn require_token(query: &TokenQuery) -> Result<&str, ApiError> {
    query
        .access_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::MissingAccessToken)
}

/// GET /api/user-profile
async fn user_profile_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let token = require_token(&query)?;
    let session = state.request_session(token);

    let profile = state
        .gateway
        .call(&session, &UpstreamCall::user_profile())
        .await
        .map_err(|e| ApiError::from_gateway(e, "Failed to fetch user profile"))?;

    Ok(Json(profile))
}

/// GET /api/top-tracks
async fn top_tracks_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let token = require_token(&query)?;
    let session = state.request_session(token);

    let payload = state
        .gateway
        .call(&session, &UpstreamCall::top_tracks())
        .await
        .map_err(|e| ApiError::from_gateway(e, "Failed to fetch top tracks"))?;

    Ok(Json(items_of(payload)))
}

/// GET /api/top-artists
async fn top_artists_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let token = require_token(&query)?;
    let session = state.request_session(token);

    let payload = state
        .gateway
        .call(&session, &UpstreamCall::top_artists())
        .await
        .map_err(|e| ApiError::from_gateway(e, "Failed to fetch top artists"))?;

    Ok(Json(items_of(payload)))
}

#[derive(Debug, Deserialize)]
struct RecommendationsQuery {
    access_token: Option<String>,
    seed_artists: Option<String>,
}

/// GET /api/recommendations
async fn recommendations_handler(
    State(state): State<AppState>,
    Query(query): Query<RecommendationsQuery>,
) -> Result<Json<Value>, ApiError> {
    let token_query = TokenQuery {
        access_token: query.access_token.clone(),
    };
    let token = require_token(&token_query)?;

    // Validated before any upstream call is attempted
    let seed_artists = query
        .seed_artists
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::Validation("Seed artists are required".to_string()))?;

    let session = state.request_session(token);
    let payload = state
        .gateway
        .call(&session, &UpstreamCall::recommendations(seed_artists))
        .await
        .map_err(|e| ApiError::from_gateway(e, "Failed to fetch recommendations"))?;

    Ok(Json(tracks_of(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn found_sets_status_and_location() {
        let response = found("/somewhere?x=1".to_string());
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/somewhere?x=1"
        );
    }

    #[test]
    fn require_token_rejects_empty_values() {
        let query = TokenQuery {
            access_token: Some(String::new()),
        };
        assert!(require_token(&query).is_err());

        let query = TokenQuery {
            access_token: Some("A1".to_string()),
        };
        assert_eq!(require_token(&query).unwrap(), "A1");
    }
}
