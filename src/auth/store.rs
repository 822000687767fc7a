// Credential store
// Sole owner of credential state; atomic replacement, optional SQLite persistence

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::types::Credential;

const KEY_ACCESS_TOKEN: &str = "access_token";
const KEY_REFRESH_TOKEN: &str = "refresh_token";
const KEY_TOKEN_EXPIRATION: &str = "token_expiration";

/// Durable key/value holder for the session credential.
///
/// Readers always observe a complete credential: the whole value is swapped
/// under one write lock, so a new access token is never visible alongside an
/// old expiry.
pub struct CredentialStore {
    current: RwLock<Option<Credential>>,

    /// Path to the SQLite database backing the store, if persistence is on.
    sqlite_db: Option<PathBuf>,
}

impl CredentialStore {
    /// In-memory store with no persistence (per-request sessions, tests).
    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(None),
            sqlite_db: None,
        }
    }

    /// Store seeded with a single assumed-valid access token.
    pub fn for_access_token(access_token: &str) -> Self {
        Self {
            current: RwLock::new(Some(Credential::assumed_valid(access_token))),
            sqlite_db: None,
        }
    }

    /// Open a SQLite-backed store, loading any persisted credential.
    pub fn open(sqlite_db: PathBuf) -> Result<Self> {
        tracing::info!("Loading credentials from SQLite: {}", sqlite_db.display());
        let credential = load_from_sqlite(&sqlite_db)?;

        if credential.is_some() {
            tracing::info!("Found persisted credential");
        } else {
            tracing::info!("No persisted credential found");
        }

        Ok(Self {
            current: RwLock::new(credential),
            sqlite_db: Some(sqlite_db),
        })
    }

    /// Snapshot of the current credential.
    pub async fn current(&self) -> Option<Credential> {
        self.current.read().await.clone()
    }

    /// Atomically replace the credential and persist it.
    pub async fn replace(&self, credential: Credential) {
        {
            let mut current = self.current.write().await;
            *current = Some(credential.clone());
        }

        if let Some(ref path) = self.sqlite_db {
            if let Err(e) = save_to_sqlite(path, &credential) {
                tracing::warn!("Failed to persist credential: {:#}", e);
            }
        }
    }

    /// Drop both tokens together. Rejected refresh tokens must never linger.
    pub async fn clear(&self) {
        {
            let mut current = self.current.write().await;
            *current = None;
        }

        if let Some(ref path) = self.sqlite_db {
            if let Err(e) = clear_sqlite(path) {
                tracing::warn!("Failed to clear persisted credential: {:#}", e);
            }
        }
    }
}

/// Load a persisted credential from the `auth_kv` table.
///
/// `token_expiration` is stored as absolute epoch milliseconds (the same
/// contract the browser client uses for its local storage keys).
fn load_from_sqlite(path: &Path) -> Result<Option<Credential>> {
    let conn = rusqlite::Connection::open(path)
        .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
    ensure_schema(&conn)?;

    let access_token = read_kv(&conn, KEY_ACCESS_TOKEN)?;
    let refresh_token = read_kv(&conn, KEY_REFRESH_TOKEN)?;
    let expiration = read_kv(&conn, KEY_TOKEN_EXPIRATION)?;

    let (access_token, expiration) = match (access_token, expiration) {
        (Some(token), Some(exp)) => (token, exp),
        _ => return Ok(None),
    };

    let expires_at = parse_epoch_millis(&expiration)
        .with_context(|| format!("Invalid token_expiration value: {}", expiration))?;

    Ok(Some(Credential {
        access_token,
        refresh_token,
        expires_at,
    }))
}

fn save_to_sqlite(path: &Path, credential: &Credential) -> Result<()> {
    let conn = rusqlite::Connection::open(path)
        .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
    ensure_schema(&conn)?;

    write_kv(&conn, KEY_ACCESS_TOKEN, &credential.access_token)?;
    match credential.refresh_token {
        Some(ref refresh_token) => write_kv(&conn, KEY_REFRESH_TOKEN, refresh_token)?,
        None => delete_kv(&conn, KEY_REFRESH_TOKEN)?,
    }
    write_kv(
        &conn,
        KEY_TOKEN_EXPIRATION,
        &credential.expires_at.timestamp_millis().to_string(),
    )?;

    Ok(())
}

fn clear_sqlite(path: &Path) -> Result<()> {
    let conn = rusqlite::Connection::open(path)
        .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
    ensure_schema(&conn)?;

    delete_kv(&conn, KEY_ACCESS_TOKEN)?;
    delete_kv(&conn, KEY_REFRESH_TOKEN)?;
    delete_kv(&conn, KEY_TOKEN_EXPIRATION)?;

    Ok(())
}

fn ensure_schema(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )
    .context("Failed to create auth_kv table")?;
    Ok(())
}

fn read_kv(conn: &rusqlite::Connection, key: &str) -> Result<Option<String>> {
    use rusqlite::OptionalExtension;

    conn.query_row("SELECT value FROM auth_kv WHERE key = ?", [key], |row| {
        row.get(0)
    })
    .optional()
    .with_context(|| format!("Failed to read {} from auth_kv", key))
}

fn write_kv(conn: &rusqlite::Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )
    .with_context(|| format!("Failed to write {} to auth_kv", key))?;
    Ok(())
}

fn delete_kv(conn: &rusqlite::Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM auth_kv WHERE key = ?", [key])
        .with_context(|| format!("Failed to delete {} from auth_kv", key))?;
    Ok(())
}

fn parse_epoch_millis(value: &str) -> Result<DateTime<Utc>> {
    let millis: i64 = value.parse().context("token_expiration is not an integer")?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .context("token_expiration is out of range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn credential(access: &str, refresh: Option<&str>, ttl_secs: i64) -> Credential {
        Credential {
            access_token: access.to_string(),
            refresh_token: refresh.map(|s| s.to_string()),
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
        }
    }

    #[tokio::test]
    async fn replace_swaps_the_whole_credential() {
        let store = CredentialStore::in_memory();
        store.replace(credential("A1", Some("R1"), 3600)).await;

        let first = store.current().await.unwrap();
        assert_eq!(first.access_token, "A1");

        let second = credential("A2", Some("R1"), 7200);
        store.replace(second.clone()).await;

        let observed = store.current().await.unwrap();
        assert_eq!(observed.access_token, "A2");
        assert_eq!(observed.expires_at, second.expires_at);
    }

    #[tokio::test]
    async fn clear_drops_both_tokens_together() {
        let store = CredentialStore::in_memory();
        store.replace(credential("A1", Some("R1"), 3600)).await;

        store.clear().await;
        assert!(store.current().await.is_none());
    }

    #[tokio::test]
    async fn sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("auth.sqlite3");

        let stored = {
            let store = CredentialStore::open(db.clone()).unwrap();
            assert!(store.current().await.is_none());

            let cred = credential("A1", Some("R1"), 3600);
            store.replace(cred.clone()).await;
            cred
        };

        let reopened = CredentialStore::open(db.clone()).unwrap();
        let loaded = reopened.current().await.unwrap();
        assert_eq!(loaded.access_token, stored.access_token);
        assert_eq!(loaded.refresh_token, stored.refresh_token);
        // Persistence is millisecond-granular
        assert_eq!(
            loaded.expires_at.timestamp_millis(),
            stored.expires_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn sqlite_clear_removes_persisted_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("auth.sqlite3");

        {
            let store = CredentialStore::open(db.clone()).unwrap();
            store.replace(credential("A1", Some("R1"), 3600)).await;
            store.clear().await;
        }

        let reopened = CredentialStore::open(db).unwrap();
        assert!(reopened.current().await.is_none());
    }

    #[test]
    fn token_expiration_is_absolute_epoch_millis() {
        let parsed = parse_epoch_millis("1700000000000").unwrap();
        assert_eq!(parsed.timestamp_millis(), 1_700_000_000_000);
        assert!(parse_epoch_millis("in an hour").is_err());
    }
}
