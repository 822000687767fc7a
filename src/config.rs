use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Confirm, Input, Password};
use std::io::Write;
use std::path::PathBuf;

/// Spotify Gateway - OAuth2 token lifecycle proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Spotify application client ID
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    /// Spotify application client secret
    #[arg(long, env = "CLIENT_SECRET")]
    pub client_secret: Option<String>,

    /// OAuth redirect URI registered with the provider
    #[arg(
        long,
        env = "REDIRECT_URI",
        default_value = "http://localhost:8000/callback"
    )]
    pub redirect_uri: String,

    /// Base URI of the client application the callback redirects to.
    /// Empty means same-origin.
    #[arg(long, env = "FRONTEND_URI", default_value = "")]
    pub frontend_uri: String,

    /// Path to a SQLite file for credential persistence (optional)
    #[arg(short = 'd', long, env = "CREDENTIALS_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "10")]
    pub http_timeout: u64,

    /// Retries for transient refresh failures
    #[arg(long, env = "REFRESH_MAX_RETRIES", default_value = "3")]
    pub refresh_retries: u32,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Provider application credentials
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub frontend_uri: String,

    // Provider endpoints (overridable for tests and mocks)
    pub accounts_url: String,
    pub api_base_url: String,

    // Credential persistence
    pub credentials_db_file: Option<PathBuf>,

    // Refresh policy
    pub token_refresh_threshold: i64,
    pub refresh_max_retries: u32,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Parse CLI arguments
        let args = CliArgs::parse();

        let config = Config {
            server_host: args.host,
            server_port: args.port,

            client_id: args
                .client_id
                .or_else(|| std::env::var("CLIENT_ID").ok())
                .context("CLIENT_ID is required (use --client-id or set CLIENT_ID env var)")?,

            client_secret: args
                .client_secret
                .or_else(|| std::env::var("CLIENT_SECRET").ok())
                .context(
                    "CLIENT_SECRET is required (use --client-secret or set CLIENT_SECRET env var)",
                )?,

            redirect_uri: args.redirect_uri,
            frontend_uri: args.frontend_uri,

            accounts_url: std::env::var("SPOTIFY_ACCOUNTS_URL")
                .unwrap_or_else(|_| "https://accounts.spotify.com".to_string()),

            api_base_url: std::env::var("SPOTIFY_API_URL")
                .unwrap_or_else(|_| "https://api.spotify.com/v1".to_string()),

            credentials_db_file: args
                .db_file
                .map(|s| expand_tilde(&s))
                .or_else(|| {
                    std::env::var("CREDENTIALS_DB_FILE")
                        .ok()
                        .map(|s| expand_tilde(&s))
                }),

            token_refresh_threshold: std::env::var("TOKEN_REFRESH_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),

            refresh_max_retries: args.refresh_retries,

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            anyhow::bail!("CLIENT_ID must not be empty");
        }
        if self.client_secret.is_empty() {
            anyhow::bail!("CLIENT_SECRET must not be empty");
        }
        if self.redirect_uri.is_empty() {
            anyhow::bail!("REDIRECT_URI must not be empty");
        }

        Ok(())
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

// === Interactive Setup ===

/// Check if interactive setup is needed (no .env file and missing required values)
pub fn needs_interactive_setup() -> bool {
    let env_file_exists = std::path::Path::new(".env").exists();

    let has_client_id = std::env::var("CLIENT_ID").is_ok();
    let has_client_secret = std::env::var("CLIENT_SECRET").is_ok();

    !env_file_exists && (!has_client_id || !has_client_secret)
}

/// Configuration collected from interactive setup
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub server_port: String,
}

/// Run interactive setup to collect required configuration
pub fn run_interactive_setup() -> Result<InteractiveConfig> {
    println!();
    println!("Spotify Gateway - First Time Setup");
    println!();
    println!("No configuration found. Let's set up your gateway.");
    println!("Create an application at https://developer.spotify.com/dashboard");
    println!("and register the redirect URI you enter below.");
    println!();

    let client_id: String = Input::new()
        .with_prompt("Spotify application client ID (CLIENT_ID)")
        .interact_text()
        .context("Failed to read CLIENT_ID")?;

    if client_id.is_empty() {
        anyhow::bail!("CLIENT_ID cannot be empty");
    }

    let client_secret: String = Password::new()
        .with_prompt("Spotify application client secret (CLIENT_SECRET)")
        .interact()
        .context("Failed to read CLIENT_SECRET")?;

    if client_secret.is_empty() {
        anyhow::bail!("CLIENT_SECRET cannot be empty");
    }

    println!();
    let redirect_uri: String = Input::new()
        .with_prompt("OAuth redirect URI (REDIRECT_URI)")
        .default("http://localhost:8000/callback".to_string())
        .interact_text()
        .context("Failed to read REDIRECT_URI")?;

    let server_port: String = Input::new()
        .with_prompt("Server port")
        .default("8000".to_string())
        .interact_text()
        .context("Failed to read server port")?;

    let config = InteractiveConfig {
        client_id,
        client_secret,
        redirect_uri,
        server_port,
    };

    // Ask if user wants to save to .env file
    println!();
    let save_to_env = Confirm::new()
        .with_prompt("Save configuration to .env file?")
        .default(true)
        .interact()
        .context("Failed to read save confirmation")?;

    if save_to_env {
        save_env_file(&config)?;
        println!();
        println!("Configuration saved to .env file");
    }

    println!();
    println!("Setup complete! Starting gateway...");
    println!();

    Ok(config)
}

/// Save configuration to .env file
fn save_env_file(config: &InteractiveConfig) -> Result<()> {
    let env_content = format!(
        r#"# Spotify Gateway Configuration
# Generated by interactive setup

# Spotify application credentials (required)
CLIENT_ID={}
CLIENT_SECRET={}

# OAuth redirect URI registered with the provider
REDIRECT_URI={}

# Server settings
SERVER_HOST=0.0.0.0
PORT={}

# Logging (trace, debug, info, warn, error)
LOG_LEVEL=info

# Optional SQLite credential persistence
# CREDENTIALS_DB_FILE=~/.local/share/spotify-gateway/auth.sqlite3
"#,
        config.client_id, config.client_secret, config.redirect_uri, config.server_port,
    );

    let mut file = std::fs::File::create(".env").context("Failed to create .env file")?;
    file.write_all(env_content.as_bytes())
        .context("Failed to write .env file")?;

    Ok(())
}
