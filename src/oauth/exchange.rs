//! Authorization-code exchange.
//!
//! Trades the code returned to the redirect URI (plus the PKCE verifier
//! that produced the challenge) for tokens. Used once per interactive
//! setup; the result is handed back to the caller for storage and never
//! enters the token cache.

use super::endpoint::TokenRequest;
use super::pkce::is_valid_verifier;
use super::provider::ProviderConfig;
use super::token_manager::{expiry_after, with_client_auth, TokenManager};
use super::AuthError;
use crate::credentials::StoredTokens;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

/// Inputs of one authorization-code exchange.
#[derive(Clone, Debug)]
pub struct CodeExchange {
    pub code: SecretString,
    pub code_verifier: SecretString,
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub redirect_uri: String,
}

/// Tokens returned by a successful exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct ExchangedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

impl ExchangedTokens {
    /// Converts the relative lifetime into an absolute expiry for storage.
    /// A lifetime that is negative or out of range is stored as unknown.
    pub fn into_stored(self, now: DateTime<Utc>) -> StoredTokens {
        StoredTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_in.and_then(|secs| expiry_after(now, secs)),
        }
    }
}

impl std::fmt::Debug for ExchangedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangedTokens")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenManager {
    /// Exchange an authorization code for tokens.
    ///
    /// A code that was already used, or a verifier that does not match the
    /// challenge, is rejected by the provider and surfaces as
    /// [`AuthError::Authentication`].
    pub async fn exchange_code(
        &self,
        exchange: &CodeExchange,
        provider: &ProviderConfig,
    ) -> Result<ExchangedTokens, AuthError> {
        provider.validate()?;
        validate_exchange(exchange)?;

        let request = with_client_auth(
            TokenRequest::new(&provider.token_url)
                .field("grant_type", "authorization_code")
                .field("code", exchange.code.expose_secret().as_str())
                .field("redirect_uri", exchange.redirect_uri.as_str())
                .field("code_verifier", exchange.code_verifier.expose_secret().as_str()),
            provider,
            &exchange.client_id,
            exchange
                .client_secret
                .as_ref()
                .map(|s| s.expose_secret().as_str()),
        );

        debug!(provider = %provider.name, "Exchanging authorization code for token");
        let response = self.endpoint().request_token(request).await.map_err(|e| {
            warn!(provider = %provider.name, error = %e, "Authorization code exchange failed");
            e
        })?;

        if response.access_token.is_empty() {
            return Err(AuthError::authentication(
                None,
                "token endpoint returned an empty access_token",
            ));
        }

        if let Some(secs) = response.expires_in {
            if expiry_after(self.now(), secs).is_none() {
                return Err(AuthError::authentication(
                    None,
                    format!("invalid expires_in: {}", secs),
                ));
            }
        }

        info!(
            provider = %provider.name,
            has_refresh_token = response.refresh_token.is_some(),
            expires_in = ?response.expires_in,
            "Authorization code exchanged"
        );

        Ok(ExchangedTokens {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
            scope: response.scope,
        })
    }
}

fn validate_exchange(exchange: &CodeExchange) -> Result<(), AuthError> {
    if exchange.code.expose_secret().trim().is_empty() {
        return Err(AuthError::configuration("authorization code is empty"));
    }
    if exchange.client_id.trim().is_empty() {
        return Err(AuthError::configuration("client_id is empty"));
    }
    if exchange.redirect_uri.trim().is_empty() {
        return Err(AuthError::configuration("redirect_uri is empty"));
    }
    if !is_valid_verifier(exchange.code_verifier.expose_secret()) {
        return Err(AuthError::configuration(
            "code_verifier must be 43-128 unreserved characters",
        ));
    }
    Ok(())
}
