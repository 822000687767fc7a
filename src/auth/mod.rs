// Authentication module
// Credential storage, authorization-code flow, refresh, session state

mod flow;
mod manager;
mod refresh;
mod store;
mod types;

pub use flow::{AuthorizationFlow, SCOPES};
pub use manager::SessionManager;
pub use refresh::RefreshEngine;
pub use store::CredentialStore;
pub use types::{Credential, RefreshTokenBody, SessionState, TokenResponse};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// HTTP Basic client authentication for the accounts token endpoint.
pub(crate) fn basic_authorization(client_id: &str, client_secret: &str) -> String {
    format!(
        "Basic {}",
        BASE64.encode(format!("{}:{}", client_id, client_secret))
    )
}
