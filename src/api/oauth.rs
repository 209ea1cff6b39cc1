//! OAuth 2.0 setup flow for connecting an account to a provider.
//!
//! Implements the authorization code flow with PKCE:
//! 1. GET /api/oauth/:provider/start?account=<id> → Redirect to provider
//! 2. User authorizes on provider's site
//! 3. Provider redirects to /api/oauth/:provider/callback
//! 4. Exchange code + verifier for tokens, store them encrypted
//! 5. Actions for that account can now get valid tokens

use crate::config::{provider_prefix, OAuthClient};
use crate::credentials::TokenStore;
use crate::oauth::{generate_pkce, CodeExchange, ProviderConfig, StateManager, TokenManager};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Account used when `start` is called without one.
const DEFAULT_ACCOUNT: &str = "default";

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for OAuth endpoints
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        (status, Json(ErrorResponse { error: error_message })).into_response()
    }
}

/// Shared application state for the OAuth API
#[derive(Clone)]
pub struct OAuthAppState {
    pub token_manager: Arc<TokenManager>,
    pub token_store: Arc<TokenStore>,
    pub state_manager: StateManager,
    pub providers: Arc<HashMap<String, ProviderConfig>>,
    /// Client registrations keyed by provider name
    pub clients: Arc<HashMap<String, OAuthClient>>,
    pub callback_base_url: String,
}

impl OAuthAppState {
    fn provider(&self, name: &str) -> Result<&ProviderConfig, AppError> {
        self.providers.get(name).ok_or_else(|| {
            warn!(provider = %name, "Unknown OAuth provider");
            AppError::NotFound(format!("Provider '{}' not found", name))
        })
    }

    fn client(&self, name: &str) -> Result<&OAuthClient, AppError> {
        self.clients.get(name).ok_or_else(|| {
            error!(provider = %name, "OAuth client not registered (missing env vars?)");
            let prefix = provider_prefix(name);
            AppError::ServerError(format!(
                "OAuth not configured for provider '{}'. Set {}_CLIENT_ID (and {}_CLIENT_SECRET for confidential clients).",
                name, prefix, prefix
            ))
        })
    }

    /// Redirect URI for a provider; start and callback must agree on it.
    fn redirect_uri(&self, provider: &str) -> String {
        format!("{}/api/oauth/{}/callback", self.callback_base_url, provider)
    }
}

#[derive(Deserialize)]
pub struct StartParams {
    account: Option<String>,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth success response
#[derive(Serialize)]
pub struct OAuthSuccessResponse {
    success: bool,
    message: String,
    provider: String,
    account: String,
}

/// Create OAuth API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/api/oauth/:provider/start", get(oauth_start))
        .route("/api/oauth/:provider/callback", get(oauth_callback))
        .with_state(Arc::new(state))
}

/// GET /api/oauth/:provider/start
///
/// Redirects the user to the provider's authorization page with a fresh
/// CSRF state and PKCE challenge. The verifier stays server-side with the
/// pending state (10-minute expiry by default).
async fn oauth_start(
    State(state): State<Arc<OAuthAppState>>,
    Path(provider_name): Path<String>,
    Query(params): Query<StartParams>,
) -> Result<Redirect, AppError> {
    debug!(provider = %provider_name, "OAuth start requested");

    let provider = state.provider(&provider_name)?;
    if provider.auth_url.is_none() {
        return Err(AppError::ServerError(format!(
            "Provider '{}' does not support the authorization code flow",
            provider_name
        )));
    }
    let client = state.client(&provider_name)?;

    let account = params
        .account
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ACCOUNT.to_string());

    let pkce = generate_pkce();
    let csrf_state = state
        .state_manager
        .create(&provider_name, &account, Secret::new(pkce.verifier));

    let auth_url = provider
        .build_auth_url(
            &client.client_id,
            &state.redirect_uri(&provider_name),
            &csrf_state,
            &pkce.challenge,
        )
        .map_err(|e| AppError::ServerError(e.to_string()))?;

    info!(
        provider = %provider_name,
        account = %account,
        "Redirecting to OAuth provider"
    );

    Ok(Redirect::temporary(&auth_url))
}

/// GET /api/oauth/:provider/callback
///
/// Exchanges the authorization code for tokens and stores them encrypted.
///
/// # Security
/// - Validates CSRF state parameter
/// - Single-use state (consumed on validation)
/// - PKCE verifier never leaves the server
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Path(provider_name): Path<String>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Response, AppError> {
    debug!(provider = %provider_name, "OAuth callback received");

    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(
            provider = %provider_name,
            error = %error,
            description = %description,
            "OAuth authorization failed"
        );
        return Err(AppError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;
    let csrf_state = callback
        .state
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    let pending = state
        .state_manager
        .validate_and_consume(&csrf_state)
        .ok_or_else(|| {
            warn!(provider = %provider_name, "Invalid or expired OAuth state");
            AppError::Unauthorized(
                "Invalid or expired OAuth state (possible CSRF attack)".to_string(),
            )
        })?;

    if pending.provider != provider_name {
        error!(
            expected = %pending.provider,
            actual = %provider_name,
            "Provider name mismatch"
        );
        return Err(AppError::BadRequest("Provider name mismatch".to_string()));
    }

    let account = pending.account;
    let provider = state.provider(&provider_name)?;
    let client = state.client(&provider_name)?;

    let exchange = CodeExchange {
        code: Secret::new(code),
        code_verifier: pending.code_verifier,
        client_id: client.client_id.clone(),
        client_secret: client.client_secret.clone(),
        redirect_uri: state.redirect_uri(&provider_name),
    };

    let tokens = state
        .token_manager
        .exchange_code(&exchange, provider)
        .await
        .map_err(|e| {
            error!(provider = %provider_name, error = %e, "Token exchange failed");
            AppError::BadGateway(format!("Failed to exchange authorization code: {}", e))
        })?;
    let has_refresh_token = tokens.refresh_token.is_some();

    state
        .token_store
        .store(&account, &provider_name, &tokens.into_stored(state.token_manager.now()))
        .map_err(|e| {
            error!(
                provider = %provider_name,
                account = %account,
                error = %e,
                "Failed to store tokens"
            );
            AppError::ServerError(format!("Failed to store tokens: {}", e))
        })?;

    info!(
        provider = %provider_name,
        account = %account,
        has_refresh_token,
        "OAuth flow completed successfully"
    );

    Ok(Json(OAuthSuccessResponse {
        success: true,
        message: format!("Successfully connected {}", provider_name),
        provider: provider_name,
        account,
    })
    .into_response())
}
