//! Encrypted token storage using SQLite.
//!
//! Holds the tokens produced by the OAuth setup flow, per account and
//! provider. Tokens are sealed with AES-256-GCM before they touch disk.

use super::encryption::{self, Sealed};
use super::StoredTokens;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Encrypted token storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE oauth_tokens (
///     account TEXT NOT NULL,
///     provider TEXT NOT NULL,
///     access_token TEXT NOT NULL,       -- Encrypted
///     access_token_nonce TEXT NOT NULL,
///     refresh_token TEXT,               -- Encrypted (optional)
///     refresh_token_nonce TEXT,
///     expires_at TEXT,                  -- RFC 3339 (optional)
///     updated_at TEXT NOT NULL,
///     PRIMARY KEY(account, provider)
/// );
/// ```
pub struct TokenStore {
    conn: Mutex<Connection>,
    encryption_key: Vec<u8>,
}

impl TokenStore {
    /// Creates or opens a token store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let key_bytes =
            encryption::validate_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS oauth_tokens (
                account TEXT NOT NULL,
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                refresh_token TEXT,
                refresh_token_nonce TEXT,
                expires_at TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY(account, provider)
            )
            "#,
            [],
        )
        .context("Failed to create oauth_tokens table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            encryption_key: key_bytes,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores tokens for an account and provider, replacing any previous row.
    pub fn store(&self, account: &str, provider: &str, tokens: &StoredTokens) -> Result<()> {
        let access = encryption::encrypt(&tokens.access_token, &self.encryption_key)
            .context("Failed to encrypt access token")?;
        let refresh = tokens
            .refresh_token
            .as_deref()
            .map(|t| encryption::encrypt(t, &self.encryption_key))
            .transpose()
            .context("Failed to encrypt refresh token")?;
        let (refresh_ciphertext, refresh_nonce) = match refresh {
            Some(sealed) => (Some(sealed.ciphertext), Some(sealed.nonce)),
            None => (None, None),
        };

        self.conn()
            .execute(
                r#"
                INSERT INTO oauth_tokens (
                    account, provider,
                    access_token, access_token_nonce,
                    refresh_token, refresh_token_nonce,
                    expires_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(account, provider) DO UPDATE SET
                    access_token = excluded.access_token,
                    access_token_nonce = excluded.access_token_nonce,
                    refresh_token = excluded.refresh_token,
                    refresh_token_nonce = excluded.refresh_token_nonce,
                    expires_at = excluded.expires_at,
                    updated_at = excluded.updated_at
                "#,
                params![
                    account,
                    provider,
                    access.ciphertext,
                    access.nonce,
                    refresh_ciphertext,
                    refresh_nonce,
                    tokens.expires_at.map(|dt| dt.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to store tokens")?;

        Ok(())
    }

    /// Retrieves and decrypts tokens for an account and provider.
    pub fn get(&self, account: &str, provider: &str) -> Result<Option<StoredTokens>> {
        type Row = (String, String, Option<String>, Option<String>, Option<String>);

        let row: Option<Row> = self
            .conn()
            .query_row(
                r#"
                SELECT access_token, access_token_nonce,
                       refresh_token, refresh_token_nonce,
                       expires_at
                FROM oauth_tokens
                WHERE account = ?1 AND provider = ?2
                "#,
                params![account, provider],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()
            .context("Failed to query tokens")?;

        let Some((access_ciphertext, access_nonce, refresh_ciphertext, refresh_nonce, expires_at)) =
            row
        else {
            return Ok(None);
        };

        let access_token = encryption::decrypt(
            &Sealed {
                ciphertext: access_ciphertext,
                nonce: access_nonce,
            },
            &self.encryption_key,
        )
        .context("Failed to decrypt access token")?;

        let refresh_token = match (refresh_ciphertext, refresh_nonce) {
            (Some(ciphertext), Some(nonce)) => Some(
                encryption::decrypt(&Sealed { ciphertext, nonce }, &self.encryption_key)
                    .context("Failed to decrypt refresh token")?,
            ),
            _ => None,
        };

        let expires_at = expires_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .context("Failed to parse expires_at timestamp")?;

        Ok(Some(StoredTokens {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    /// Deletes tokens. Returns false when nothing was stored.
    pub fn delete(&self, account: &str, provider: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute(
                "DELETE FROM oauth_tokens WHERE account = ?1 AND provider = ?2",
                params![account, provider],
            )
            .context("Failed to delete tokens")?;
        Ok(rows > 0)
    }

    /// Lists every (account, provider) pair with stored tokens.
    pub fn list_all(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT account, provider FROM oauth_tokens ORDER BY account, provider")
            .context("Failed to prepare query")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("Failed to execute query")?
            .collect::<Result<Vec<(String, String)>, _>>()
            .context("Failed to read results")?;
        Ok(pairs)
    }

    /// Lists the providers an account has connected.
    pub fn list_by_account(&self, account: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT provider FROM oauth_tokens WHERE account = ?1 ORDER BY provider")
            .context("Failed to prepare query")?;
        let providers = stmt
            .query_map(params![account], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;
        Ok(providers)
    }
}
