//! Credential material and encrypted token storage.
//!
//! [`Credential`] is the secret material a caller hands to the token
//! manager. [`StoredTokens`] is what the OAuth setup flow persists in the
//! [`TokenStore`] so later actions can rebuild an authorized credential.
//!
//! Rows are keyed by (account, provider). The access and refresh tokens
//! are sealed separately with AES-256-GCM before they reach SQLite, so the
//! database file never holds a token in the clear.
//!
//! # Usage
//!
//! ```no_run
//! use switchboard::credentials::{Credential, StoredTokens, TokenStore};
//! use chrono::{Utc, Duration};
//!
//! # fn main() -> anyhow::Result<()> {
//! let encryption_key = std::env::var("SWITCHBOARD_ENCRYPTION_KEY")?;
//! let store = TokenStore::new("tokens.db", &encryption_key)?;
//!
//! let tokens = StoredTokens {
//!     access_token: "x_access_token".to_string(),
//!     refresh_token: Some("x_refresh_token".to_string()),
//!     expires_at: Some(Utc::now() + Duration::hours(2)),
//! };
//! store.store("acct_1", "x", &tokens)?;
//!
//! if let Some(tokens) = store.get("acct_1", "x")? {
//!     let credential = Credential::authorized("client-id", None, &tokens);
//!     println!("{:?}", credential); // secrets are redacted
//! }
//! # Ok(())
//! # }
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod encryption;
mod storage;

pub use storage::TokenStore;

pub use encryption::{decrypt, encrypt, validate_key, Sealed};

/// Secret material supplied by the caller of an action.
///
/// Immutable once built. Secrets are held in [`SecretString`] so `Debug`
/// output never shows them.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Client id + secret for the client-credentials grant.
    ClientCredentials {
        client_id: String,
        #[serde(default)]
        client_secret: Option<SecretString>,
    },
    /// Tokens previously obtained through the authorization-code flow.
    Authorized {
        client_id: String,
        #[serde(default)]
        client_secret: Option<SecretString>,
        access_token: SecretString,
        #[serde(default)]
        refresh_token: Option<SecretString>,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
    },
    /// Static API key, used as-is.
    ApiKey { key: SecretString },
    /// Static bearer token, used as-is.
    BearerToken { token: SecretString },
}

impl Credential {
    pub fn client_credentials(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Credential::ClientCredentials {
            client_id: client_id.into(),
            client_secret: Some(Secret::new(client_secret.into())),
        }
    }

    /// Build an authorized credential from tokens kept in the store.
    pub fn authorized(
        client_id: impl Into<String>,
        client_secret: Option<String>,
        tokens: &StoredTokens,
    ) -> Self {
        Credential::Authorized {
            client_id: client_id.into(),
            client_secret: client_secret.map(Secret::new),
            access_token: Secret::new(tokens.access_token.clone()),
            refresh_token: tokens.refresh_token.clone().map(Secret::new),
            expires_at: tokens.expires_at,
        }
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Credential::ApiKey {
            key: Secret::new(key.into()),
        }
    }

    pub fn bearer_token(token: impl Into<String>) -> Self {
        Credential::BearerToken {
            token: Secret::new(token.into()),
        }
    }

    /// Short label for logs. Never includes secret material.
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::ClientCredentials { .. } => "client_credentials",
            Credential::Authorized { .. } => "authorized",
            Credential::ApiKey { .. } => "api_key",
            Credential::BearerToken { .. } => "bearer_token",
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        match self {
            Credential::ClientCredentials { client_id, .. }
            | Credential::Authorized { client_id, .. } => Some(client_id),
            _ => None,
        }
    }

    /// Secret of a static credential (API key or bearer token), used as-is.
    pub fn static_secret(&self) -> Option<&str> {
        match self {
            Credential::ApiKey { key } => Some(key.expose_secret().as_str()),
            Credential::BearerToken { token } => Some(token.expose_secret().as_str()),
            _ => None,
        }
    }

    /// Stable identity of this credential: client id (if any) plus a
    /// fingerprint of the secret material. Two credentials with the same
    /// identity share one cached token.
    pub fn identity(&self) -> String {
        match self {
            Credential::ClientCredentials {
                client_id,
                client_secret,
            } => format!(
                "{}:{}",
                client_id,
                fingerprint(client_secret.as_ref().map(|s| s.expose_secret().as_str()).unwrap_or(""))
            ),
            Credential::Authorized {
                client_id,
                access_token,
                refresh_token,
                ..
            } => {
                let material = refresh_token.as_ref().unwrap_or(access_token);
                format!("{}:{}", client_id, fingerprint(material.expose_secret()))
            }
            Credential::ApiKey { key } => format!("api_key:{}", fingerprint(key.expose_secret())),
            Credential::BearerToken { token } => {
                format!("bearer:{}", fingerprint(token.expose_secret()))
            }
        }
    }
}

fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..12])
}

/// Tokens persisted for an (account, provider) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    /// OAuth access token (used for API requests)
    pub access_token: String,

    /// OAuth refresh token (used to obtain new access tokens)
    pub refresh_token: Option<String>,

    /// When the access token expires (UTC)
    pub expires_at: Option<DateTime<Utc>>,
}
