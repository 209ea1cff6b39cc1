//! OAuth provider configurations.
//!
//! Defines the OAuth 2.0 endpoints, grant type and scopes of each token
//! issuer. Configurations are immutable once loaded and are passed
//! explicitly into token manager calls.

use super::AuthError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OAuth2 mechanism the provider uses to issue access tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Machine-to-machine: client id + secret posted to the token endpoint.
    ClientCredentials,
    /// Interactive authorization (with PKCE); tokens are kept alive with
    /// the refresh-token grant.
    AuthorizationCode,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::AuthorizationCode => "authorization_code",
        }
    }
}

/// Where client credentials go on token endpoint requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuth {
    /// `client_id` / `client_secret` form fields.
    #[default]
    RequestBody,
    /// HTTP Basic `Authorization` header.
    BasicAuth,
}

/// OAuth provider configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier (e.g. "x", "grammarly")
    pub name: String,

    /// OAuth authorization endpoint URL (authorization-code providers only)
    #[serde(default)]
    pub auth_url: Option<String>,

    /// OAuth token endpoint URL
    pub token_url: String,

    pub grant_type: GrantType,

    /// Requested OAuth scopes
    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub client_auth: ClientAuth,

    /// Extra query parameters appended to the authorization URL
    #[serde(default)]
    pub extra_auth_params: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, token_url: impl Into<String>, grant_type: GrantType) -> Self {
        Self {
            name: name.into(),
            auth_url: None,
            token_url: token_url.into(),
            grant_type,
            scopes: Vec::new(),
            client_auth: ClientAuth::default(),
            extra_auth_params: BTreeMap::new(),
        }
    }

    pub fn with_auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = Some(auth_url.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_client_auth(mut self, client_auth: ClientAuth) -> Self {
        self.client_auth = client_auth;
        self
    }

    /// Checks the fields every token request depends on.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.name.trim().is_empty() {
            return Err(AuthError::configuration("provider name is empty"));
        }
        validate_url("token_url", &self.token_url)?;
        if let Some(auth_url) = &self.auth_url {
            validate_url("auth_url", auth_url)?;
        }
        Ok(())
    }

    /// Space-delimited scope parameter, or `None` when no scopes are configured.
    pub fn scope_param(&self) -> Option<String> {
        if self.scopes.is_empty() {
            None
        } else {
            Some(self.scopes.join(" "))
        }
    }

    /// Build the authorization URL for the authorization-code + PKCE flow.
    pub fn build_auth_url(
        &self,
        client_id: &str,
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> Result<String, AuthError> {
        let auth_url = self.auth_url.as_deref().ok_or_else(|| {
            AuthError::configuration(format!(
                "provider '{}' has no authorization endpoint",
                self.name
            ))
        })?;

        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&state={}&code_challenge={}&code_challenge_method=S256",
            auth_url,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge)
        );
        if let Some(scope) = self.scope_param() {
            url.push_str("&scope=");
            url.push_str(&urlencoding::encode(&scope));
        }
        for (key, value) in &self.extra_auth_params {
            url.push('&');
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        Ok(url)
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), AuthError> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| AuthError::configuration(format!("invalid {} '{}': {}", field, value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(AuthError::configuration(format!(
            "invalid {} '{}': unsupported scheme '{}'",
            field, value, other
        ))),
    }
}

/// Built-in provider configurations. Config files and environment
/// variables override these at startup.
pub fn builtin_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new(
            "x",
            "https://api.x.com/2/oauth2/token",
            GrantType::AuthorizationCode,
        )
        .with_auth_url("https://x.com/i/oauth2/authorize")
        .with_scopes(["tweet.read", "tweet.write", "users.read", "offline.access"])
        .with_client_auth(ClientAuth::BasicAuth),
        ProviderConfig::new(
            "grammarly",
            "https://auth.grammarly.com/v4/api/oauth2/token",
            GrantType::ClientCredentials,
        )
        .with_scopes(["scores-api:read", "scores-api:write"]),
    ]
}
