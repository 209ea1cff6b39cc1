use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use switchboard::credentials::{Credential, StoredTokens};
use switchboard::oauth::{AuthError, ProviderConfig, TokenManager};
use tracing::{debug, warn};

use crate::error::ActionError;

const USER_AGENT: &str = "switchboard-integrations/0.1";

/// Everything one action needs to talk to its downstream API.
pub struct ActionContext {
    token_manager: Arc<TokenManager>,
    credential: Credential,
    provider: Option<ProviderConfig>,
    http_client: Client,
}

impl ActionContext {
    pub fn new(
        token_manager: Arc<TokenManager>,
        credential: Credential,
        provider: Option<ProviderConfig>,
    ) -> Result<Self, ActionError> {
        let http_client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::with_http_client(
            token_manager,
            credential,
            provider,
            http_client,
        ))
    }

    pub fn with_http_client(
        token_manager: Arc<TokenManager>,
        credential: Credential,
        provider: Option<ProviderConfig>,
        http_client: Client,
    ) -> Self {
        Self {
            token_manager,
            credential,
            provider,
            http_client,
        }
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Access token for the downstream API.
    ///
    /// Goes through the token manager for OAuth providers. Integrations
    /// without a provider use the credential's static secret.
    pub async fn access_token(&self) -> Result<String, ActionError> {
        match &self.provider {
            Some(provider) => Ok(self
                .token_manager
                .get_valid_token(&self.credential, provider)
                .await?),
            None => self
                .credential
                .static_secret()
                .map(str::to_string)
                .ok_or_else(|| {
                    ActionError::Auth(AuthError::configuration(format!(
                        "{} credential has no static secret and no OAuth provider is configured",
                        self.credential.kind()
                    )))
                }),
        }
    }

    /// Sends a request with `Authorization: Bearer <token>`.
    ///
    /// `build` is called once per attempt. When the API answers 401 and the
    /// token came from an OAuth provider, the cached token is invalidated
    /// and the request is sent exactly once more with a fresh token.
    pub async fn send_authorized<F>(&self, build: F) -> Result<Response, ActionError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let token = self.access_token().await?;
        let response = build(&self.http_client).bearer_auth(&token).send().await?;

        let provider = match &self.provider {
            Some(provider) if response.status() == StatusCode::UNAUTHORIZED => provider,
            _ => return Ok(response),
        };

        warn!(
            provider = %provider.name,
            "Downstream API rejected the access token, retrying with a fresh one"
        );
        self.token_manager.invalidate(&self.credential, provider);
        let token = self.access_token().await?;
        debug!(provider = %provider.name, "Retrying request once");
        Ok(build(&self.http_client).bearer_auth(&token).send().await?)
    }

    /// Tokens for this credential as currently cached, for writing back to
    /// the store after a refresh rotated them.
    pub fn rotated_tokens(&self) -> Option<StoredTokens> {
        let provider = self.provider.as_ref()?;
        let state = self.token_manager.current_state(&self.credential, provider)?;
        Some(StoredTokens {
            access_token: state.access_token,
            refresh_token: state.refresh_token,
            expires_at: state.expires_at,
        })
    }
}

/// Fails with [`ActionError::Api`] unless the response is a 2xx.
pub async fn check_response_status(response: Response) -> Result<Response, ActionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ActionError::api(status.as_u16(), api_error_message(status, &body)))
}

/// Status check then JSON decode.
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ActionError> {
    let response = check_response_status(response).await?;
    Ok(response.json::<T>().await?)
}

fn api_error_message(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
    }
    body.chars().take(500).collect()
}
