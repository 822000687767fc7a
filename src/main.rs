use anyhow::{Context, Result};
use std::sync::Arc;

mod auth;
mod config;
mod error;
mod gateway;
mod middleware;
mod models;
mod routes;

use auth::{AuthorizationFlow, CredentialStore, RefreshEngine, SessionManager, SessionState};
use gateway::SpotifyGateway;

#[tokio::main]
async fn main() -> Result<()> {
    // Check if interactive setup is needed (no .env and missing required values)
    if config::needs_interactive_setup() {
        let interactive_config = config::run_interactive_setup()?;

        // Set environment variables from interactive config so Config::load() can use them
        std::env::set_var("CLIENT_ID", &interactive_config.client_id);
        std::env::set_var("CLIENT_SECRET", &interactive_config.client_secret);
        std::env::set_var("REDIRECT_URI", &interactive_config.redirect_uri);
        std::env::set_var("PORT", &interactive_config.server_port);
    }

    // Load configuration first (for log level)
    let config = config::Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Spotify Gateway starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    // Shared HTTP client for accounts-endpoint calls
    let accounts_client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(config.http_connect_timeout))
        .timeout(std::time::Duration::from_secs(config.http_request_timeout))
        .build()
        .context("Failed to create HTTP client")?;

    // Credential store: SQLite-backed when configured, in-memory otherwise
    let store = match config.credentials_db_file {
        Some(ref path) => Arc::new(CredentialStore::open(path.clone())?),
        None => Arc::new(CredentialStore::in_memory()),
    };

    let refresher = Arc::new(RefreshEngine::new(
        accounts_client.clone(),
        config.client_id.clone(),
        config.client_secret.clone(),
        &config.accounts_url,
    ));

    let flow = Arc::new(AuthorizationFlow::new(
        accounts_client,
        config.client_id.clone(),
        config.client_secret.clone(),
        config.redirect_uri.clone(),
        &config.accounts_url,
    ));

    let session = Arc::new(SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&refresher),
        config.token_refresh_threshold,
        config.refresh_max_retries,
    ));

    // Decide among {cached token, refresh, new authorization} up front
    match session.bootstrap().await {
        SessionState::Authenticated => {
            tracing::info!("Session bootstrap: using stored credential");
        }
        SessionState::Unauthenticated => {
            tracing::info!("Session bootstrap: no usable credential, visit /login to authorize");
        }
        SessionState::Refreshing => {
            tracing::info!("Session bootstrap: refresh still in flight");
        }
    }

    let gateway = Arc::new(SpotifyGateway::new(
        config.api_base_url.clone(),
        config.http_max_connections,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);
    tracing::info!("HTTP client initialized with connection pooling");

    let app_state = routes::AppState {
        config: Arc::new(config.clone()),
        flow,
        session,
        refresher,
        gateway,
    };

    let app = routes::build_app(app_state);

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    print_startup_banner(&config);

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Print startup banner
fn print_startup_banner(config: &config::Config) {
    println!();
    println!("  Spotify Gateway");
    println!("  Version:      {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:       http://{}:{}",
        config.server_host, config.server_port
    );
    println!("  Redirect URI: {}", config.redirect_uri);
    println!(
        "  Persistence:  {}",
        config
            .credentials_db_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "in-memory".to_string())
    );
    println!("  Log Level:    {}", config.log_level);
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
