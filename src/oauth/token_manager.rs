//! Access-token cache with acquisition and refresh.
//!
//! One [`TokenState`] is kept per (provider, credential identity). A cached
//! token is handed out while `now < expires_at - refresh_skew`; past that
//! point the next caller refreshes it (refresh-token grant) or re-acquires
//! it (client-credentials grant) before using it.
//!
//! ```text
//!    [no token] --acquire(success)--> [valid]
//!    [valid] --time passes past expiry-skew--> [stale]
//!    [stale] --refresh(success)--> [valid]
//!    [stale] --refresh(rejected, client credentials)--> [stale, no refresh_token]
//!    [stale] --no refresh_token (authorized)--> error: re-authorize
//!    any other acquire/refresh failure --> unchanged, error surfaced
//!    any state --invalidate--> [stale]
//! ```
//!
//! Concurrent callers that see the same stale entry may each refresh it;
//! the last response wins. Enable single-flight on the builder to serialize
//! them per key instead.

use super::clock::{Clock, SystemClock};
use super::endpoint::{
    HttpTokenEndpoint, TokenEndpoint, TokenRequest, TokenResponse, DEFAULT_REQUEST_TIMEOUT,
};
use super::provider::{ClientAuth, GrantType, ProviderConfig};
use super::AuthError;
use crate::credentials::Credential;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use secrecy::ExposeSecret;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default safety buffer subtracted from a token's expiry.
pub const DEFAULT_REFRESH_SKEW_SECS: i64 = 60;

/// Cache key: provider name plus credential identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub provider: String,
    pub identity: String,
}

impl CacheKey {
    pub fn new(provider: &ProviderConfig, credential: &Credential) -> Self {
        Self {
            provider: provider.name.clone(),
            identity: credential.identity(),
        }
    }
}

/// Cached token for one (provider, credential) pair.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// `None` when the provider did not state a lifetime
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: BTreeSet<String>,
}

impl TokenState {
    /// True while `now < expires_at - skew`.
    pub fn is_usable(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now < expires_at - skew,
            None => true,
        }
    }
}

impl std::fmt::Debug for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenState")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Produces currently-valid access tokens, hiding acquisition and refresh
/// from callers.
///
/// Create one per process at the composition root and share it through
/// `Arc`; tests build isolated instances with a [`ManualClock`] and a fake
/// [`TokenEndpoint`].
///
/// [`ManualClock`]: super::ManualClock
pub struct TokenManager {
    endpoint: Arc<dyn TokenEndpoint>,
    clock: Arc<dyn Clock>,
    refresh_skew: Duration,
    cache: DashMap<CacheKey, TokenState>,
    /// Per-key locks, present only in single-flight mode
    inflight: Option<DashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// Builder for [`TokenManager`].
pub struct TokenManagerBuilder {
    endpoint: Option<Arc<dyn TokenEndpoint>>,
    clock: Arc<dyn Clock>,
    refresh_skew: Duration,
    single_flight: bool,
    request_timeout: std::time::Duration,
}

impl Default for TokenManagerBuilder {
    fn default() -> Self {
        Self {
            endpoint: None,
            clock: Arc::new(SystemClock),
            refresh_skew: Duration::seconds(DEFAULT_REFRESH_SKEW_SECS),
            single_flight: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl TokenManagerBuilder {
    pub fn endpoint(mut self, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    /// Timeout of the default HTTP endpoint. Ignored when an endpoint is set.
    pub fn request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<TokenManager, AuthError> {
        let endpoint: Arc<dyn TokenEndpoint> = match self.endpoint {
            Some(endpoint) => endpoint,
            None => Arc::new(HttpTokenEndpoint::new(self.request_timeout)?),
        };
        if self.refresh_skew < Duration::zero() {
            return Err(AuthError::configuration("refresh skew must not be negative"));
        }
        Ok(TokenManager {
            endpoint,
            clock: self.clock,
            refresh_skew: self.refresh_skew,
            cache: DashMap::new(),
            inflight: self.single_flight.then(DashMap::new),
        })
    }
}

impl TokenManager {
    pub fn builder() -> TokenManagerBuilder {
        TokenManagerBuilder::default()
    }

    /// Manager with the system clock and default skew over `endpoint`.
    pub fn new(endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self {
            endpoint,
            clock: Arc::new(SystemClock),
            refresh_skew: Duration::seconds(DEFAULT_REFRESH_SKEW_SECS),
            cache: DashMap::new(),
            inflight: None,
        }
    }

    pub fn refresh_skew(&self) -> Duration {
        self.refresh_skew
    }

    pub(super) fn endpoint(&self) -> &dyn TokenEndpoint {
        self.endpoint.as_ref()
    }

    /// Current time on the manager's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns an access token that is valid for at least the refresh skew.
    ///
    /// Zero network calls when a usable token is cached; otherwise exactly
    /// one call to the provider's token endpoint (refresh when a refresh
    /// token is known, full client-credentials grant when not). On failure
    /// the cached entry is left as it was, except that a refresh token the
    /// provider rejects for client credentials is dropped.
    pub async fn get_valid_token(
        &self,
        credential: &Credential,
        provider: &ProviderConfig,
    ) -> Result<String, AuthError> {
        if let Some(secret) = credential.static_secret() {
            return static_secret(credential.kind(), secret);
        }
        validate(credential, provider)?;

        let key = CacheKey::new(provider, credential);
        if let Some(token) = self.usable_token(&key, credential) {
            return Ok(token);
        }

        let _guard = match &self.inflight {
            Some(locks) => {
                let lock = Arc::clone(locks.entry(key.clone()).or_default().value());
                let guard = lock.lock_owned().await;
                // Another caller may have refreshed while we waited.
                if let Some(token) = self.usable_token(&key, credential) {
                    return Ok(token);
                }
                Some(guard)
            }
            None => None,
        };

        let current = self.lookup(&key, credential);
        let refresh_token = current.as_ref().and_then(|s| s.refresh_token.clone());

        let state = match (refresh_token, credential) {
            (Some(refresh_token), _) => {
                match self.refresh(credential, provider, &refresh_token).await {
                    Ok(state) => state,
                    Err(err) => {
                        if matches!(err, AuthError::Authentication { .. })
                            && matches!(credential, Credential::ClientCredentials { .. })
                        {
                            self.forget_refresh_token(&key, provider);
                        }
                        return Err(err);
                    }
                }
            }
            (None, Credential::ClientCredentials { .. }) => self.acquire(credential, provider).await?,
            (None, _) => {
                warn!(
                    provider = %provider.name,
                    "Token expired and no refresh token is available"
                );
                return Err(AuthError::authentication(
                    None,
                    format!(
                        "re-authorization required for provider '{}': access token expired and no refresh token is available",
                        provider.name
                    ),
                ));
            }
        };

        let token = state.access_token.clone();
        self.cache.insert(key, state);
        Ok(token)
    }

    /// Marks the cached token stale so the next call refreshes or
    /// re-acquires it. Used after the downstream API rejects a token.
    pub fn invalidate(&self, credential: &Credential, provider: &ProviderConfig) {
        let key = CacheKey::new(provider, credential);
        let stale_at = self.clock.now() - self.refresh_skew;

        if let Some(mut entry) = self.cache.get_mut(&key) {
            entry.expires_at = Some(stale_at);
        } else if let Some(mut seeded) = seed_from(credential) {
            seeded.expires_at = Some(stale_at);
            self.cache.insert(key.clone(), seeded);
        }
        debug!(provider = %key.provider, "Cached token invalidated");
    }

    /// Copy of the cached entry, if any.
    pub fn current_state(
        &self,
        credential: &Credential,
        provider: &ProviderConfig,
    ) -> Option<TokenState> {
        self.cache
            .get(&CacheKey::new(provider, credential))
            .map(|entry| entry.value().clone())
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drops a refresh token the provider rejected so the next call falls
    /// back to a full client-credentials grant. The access token and its
    /// expiry stay as they were.
    fn forget_refresh_token(&self, key: &CacheKey, provider: &ProviderConfig) {
        if let Some(mut entry) = self.cache.get_mut(key) {
            if entry.refresh_token.take().is_some() {
                warn!(
                    provider = %provider.name,
                    "Refresh token rejected, next call re-acquires with client credentials"
                );
            }
        }
    }

    fn lookup(&self, key: &CacheKey, credential: &Credential) -> Option<TokenState> {
        self.cache
            .get(key)
            .map(|entry| entry.value().clone())
            .or_else(|| seed_from(credential))
    }

    fn usable_token(&self, key: &CacheKey, credential: &Credential) -> Option<String> {
        let now = self.clock.now();
        if let Some(entry) = self.cache.get(key) {
            return entry
                .is_usable(now, self.refresh_skew)
                .then(|| entry.access_token.clone());
        }

        // First sight of an authorized credential: adopt its tokens.
        let seeded = seed_from(credential)?;
        if !seeded.is_usable(now, self.refresh_skew) {
            return None;
        }
        let token = seeded.access_token.clone();
        self.cache.insert(key.clone(), seeded);
        Some(token)
    }

    async fn acquire(
        &self,
        credential: &Credential,
        provider: &ProviderConfig,
    ) -> Result<TokenState, AuthError> {
        let (client_id, client_secret) = client_material(credential);
        let mut request = with_client_auth(
            TokenRequest::new(&provider.token_url).field("grant_type", "client_credentials"),
            provider,
            client_id,
            client_secret,
        );
        if let Some(scope) = provider.scope_param() {
            request = request.field("scope", scope);
        }

        let response = self.endpoint.request_token(request).await.map_err(|e| {
            warn!(provider = %provider.name, error = %e, "Token acquisition failed");
            e
        })?;

        let state = self.state_from_response(response, None, provider)?;
        info!(
            provider = %provider.name,
            expires_at = ?state.expires_at,
            "OAuth token acquired"
        );
        Ok(state)
    }

    async fn refresh(
        &self,
        credential: &Credential,
        provider: &ProviderConfig,
        refresh_token: &str,
    ) -> Result<TokenState, AuthError> {
        let (client_id, client_secret) = client_material(credential);
        let request = with_client_auth(
            TokenRequest::new(&provider.token_url)
                .field("grant_type", "refresh_token")
                .field("refresh_token", refresh_token),
            provider,
            client_id,
            client_secret,
        );

        info!(provider = %provider.name, "Refreshing OAuth token");
        let response = self.endpoint.request_token(request).await.map_err(|e| {
            warn!(provider = %provider.name, error = %e, "Token refresh failed");
            e
        })?;

        let rotated = response.refresh_token.is_some();
        let state = self.state_from_response(response, Some(refresh_token), provider)?;
        info!(
            provider = %provider.name,
            rotated_refresh_token = rotated,
            expires_at = ?state.expires_at,
            "OAuth token refreshed successfully"
        );
        Ok(state)
    }

    fn state_from_response(
        &self,
        response: TokenResponse,
        previous_refresh_token: Option<&str>,
        provider: &ProviderConfig,
    ) -> Result<TokenState, AuthError> {
        if response.access_token.is_empty() {
            return Err(AuthError::authentication(
                None,
                "token endpoint returned an empty access_token",
            ));
        }

        let now = self.clock.now();
        let expires_at = match response.expires_in {
            Some(secs) => Some(expiry_after(now, secs).ok_or_else(|| {
                AuthError::authentication(None, format!("invalid expires_in: {}", secs))
            })?),
            None => None,
        };
        let scope = match &response.scope {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => provider.scopes.iter().cloned().collect(),
        };

        Ok(TokenState {
            access_token: response.access_token,
            // Keep the existing refresh token if the provider did not rotate it
            refresh_token: response
                .refresh_token
                .or_else(|| previous_refresh_token.map(str::to_string)),
            expires_at,
            scope,
        })
    }
}

/// `now + expires_in`, or `None` when `expires_in` is negative or the sum
/// does not fit in a timestamp.
pub(super) fn expiry_after(now: DateTime<Utc>, expires_in: i64) -> Option<DateTime<Utc>> {
    if expires_in < 0 {
        return None;
    }
    Duration::try_seconds(expires_in).and_then(|lifetime| now.checked_add_signed(lifetime))
}

fn static_secret(what: &str, value: &str) -> Result<String, AuthError> {
    if value.trim().is_empty() {
        return Err(AuthError::configuration(format!("{} is empty", what)));
    }
    Ok(value.to_string())
}

/// Rejects credentials that cannot authenticate against `provider` before
/// any request is made.
fn validate(credential: &Credential, provider: &ProviderConfig) -> Result<(), AuthError> {
    provider.validate()?;

    match credential {
        Credential::ClientCredentials {
            client_id,
            client_secret,
        } => {
            if provider.grant_type != GrantType::ClientCredentials {
                return Err(AuthError::configuration(format!(
                    "provider '{}' uses the {} grant; client credentials alone cannot authenticate",
                    provider.name,
                    provider.grant_type.as_str()
                )));
            }
            require_client_id(client_id, provider)?;
            match client_secret {
                Some(secret) if !secret.expose_secret().trim().is_empty() => Ok(()),
                _ => Err(AuthError::configuration(format!(
                    "missing client_secret for provider '{}'",
                    provider.name
                ))),
            }
        }
        Credential::Authorized {
            client_id,
            access_token,
            ..
        } => {
            if provider.grant_type != GrantType::AuthorizationCode {
                return Err(AuthError::configuration(format!(
                    "provider '{}' uses the {} grant; authorized tokens are not accepted",
                    provider.name,
                    provider.grant_type.as_str()
                )));
            }
            require_client_id(client_id, provider)?;
            if access_token.expose_secret().trim().is_empty() {
                return Err(AuthError::configuration(format!(
                    "missing access_token for provider '{}'",
                    provider.name
                )));
            }
            Ok(())
        }
        Credential::ApiKey { .. } | Credential::BearerToken { .. } => Ok(()),
    }
}

fn require_client_id(client_id: &str, provider: &ProviderConfig) -> Result<(), AuthError> {
    if client_id.trim().is_empty() {
        return Err(AuthError::configuration(format!(
            "missing client_id for provider '{}'",
            provider.name
        )));
    }
    Ok(())
}

fn client_material(credential: &Credential) -> (&str, Option<&str>) {
    match credential {
        Credential::ClientCredentials {
            client_id,
            client_secret,
        }
        | Credential::Authorized {
            client_id,
            client_secret,
            ..
        } => (
            client_id.as_str(),
            client_secret.as_ref().map(|s| s.expose_secret().as_str()),
        ),
        Credential::ApiKey { .. } | Credential::BearerToken { .. } => ("", None),
    }
}

/// Adds client authentication the way the provider expects it.
/// Public clients (no secret) always send `client_id` in the body.
pub(super) fn with_client_auth(
    mut request: TokenRequest,
    provider: &ProviderConfig,
    client_id: &str,
    client_secret: Option<&str>,
) -> TokenRequest {
    match (provider.client_auth, client_secret) {
        (ClientAuth::BasicAuth, Some(secret)) => {
            request.basic_auth = Some((client_id.to_string(), secret.to_string()));
            request
        }
        (ClientAuth::RequestBody, Some(secret)) => request
            .field("client_id", client_id)
            .field("client_secret", secret),
        (_, None) => request.field("client_id", client_id),
    }
}

fn seed_from(credential: &Credential) -> Option<TokenState> {
    match credential {
        Credential::Authorized {
            access_token,
            refresh_token,
            expires_at,
            ..
        } => Some(TokenState {
            access_token: access_token.expose_secret().clone(),
            refresh_token: refresh_token.as_ref().map(|t| t.expose_secret().clone()),
            expires_at: *expires_at,
            scope: BTreeSet::new(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StoredTokens;
    use crate::oauth::ManualClock;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Endpoint that answers from a queue and records every request.
    #[derive(Default)]
    struct ScriptedEndpoint {
        responses: Mutex<VecDeque<Result<TokenResponse, AuthError>>>,
        requests: Mutex<Vec<TokenRequest>>,
    }

    impl ScriptedEndpoint {
        fn push_ok(&self, json: &str) {
            let response = serde_json::from_str(json).unwrap();
            self.responses.lock().unwrap().push_back(Ok(response));
        }

        fn push_err(&self, err: AuthError) {
            self.responses.lock().unwrap().push_back(Err(err));
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last_request(&self) -> TokenRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl TokenEndpoint for ScriptedEndpoint {
        async fn request_token(&self, request: TokenRequest) -> Result<TokenResponse, AuthError> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AuthError::Network("no scripted response".into())))
        }
    }

    fn client_credentials_provider() -> ProviderConfig {
        ProviderConfig::new(
            "grammarly",
            "https://auth.example.com/token",
            GrantType::ClientCredentials,
        )
        .with_scopes(["scores-api:read"])
    }

    fn authorization_code_provider() -> ProviderConfig {
        ProviderConfig::new("x", "https://auth.example.com/token", GrantType::AuthorizationCode)
    }

    fn manager(endpoint: Arc<ScriptedEndpoint>, clock: Arc<ManualClock>) -> TokenManager {
        TokenManager::builder()
            .endpoint(endpoint)
            .clock(clock)
            .build()
            .unwrap()
    }

    #[test]
    fn test_is_usable_respects_skew() {
        let now = Utc::now();
        let skew = Duration::seconds(60);
        let state = TokenState {
            access_token: "tok".into(),
            refresh_token: None,
            expires_at: Some(now + Duration::seconds(61)),
            scope: BTreeSet::new(),
        };
        assert!(state.is_usable(now, skew));
        assert!(!state.is_usable(now + Duration::seconds(1), skew));

        let forever = TokenState {
            expires_at: None,
            ..state
        };
        assert!(forever.is_usable(now + Duration::days(365), skew));
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        endpoint.push_ok(r#"{"access_token":"tok1","expires_in":3600}"#);
        let clock = Arc::new(ManualClock::default());
        let manager = manager(Arc::clone(&endpoint), clock);
        let credential = Credential::client_credentials("abc", "xyz");
        let provider = client_credentials_provider();

        assert_eq!(manager.get_valid_token(&credential, &provider).await.unwrap(), "tok1");
        assert_eq!(manager.get_valid_token(&credential, &provider).await.unwrap(), "tok1");
        assert_eq!(endpoint.calls(), 1);

        let request = endpoint.last_request();
        assert_eq!(request.grant_type(), Some("client_credentials"));
        assert_eq!(request.get("client_id"), Some("abc"));
        assert_eq!(request.get("client_secret"), Some("xyz"));
        assert_eq!(request.get("scope"), Some("scores-api:read"));
    }

    #[tokio::test]
    async fn test_stale_token_with_refresh_token_is_refreshed() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        endpoint.push_ok(r#"{"access_token":"tok1","refresh_token":"ref1","expires_in":3600}"#);
        endpoint.push_ok(r#"{"access_token":"tok2","expires_in":3600}"#);
        let clock = Arc::new(ManualClock::default());
        let manager = manager(Arc::clone(&endpoint), Arc::clone(&clock));
        let credential = Credential::client_credentials("abc", "xyz");
        let provider = client_credentials_provider();

        manager.get_valid_token(&credential, &provider).await.unwrap();
        clock.advance(Duration::seconds(3550));
        let refreshed_at = clock.now();

        assert_eq!(manager.get_valid_token(&credential, &provider).await.unwrap(), "tok2");
        assert_eq!(endpoint.calls(), 2);

        let request = endpoint.last_request();
        assert_eq!(request.grant_type(), Some("refresh_token"));
        assert_eq!(request.get("refresh_token"), Some("ref1"));

        let state = manager.current_state(&credential, &provider).unwrap();
        assert_eq!(state.expires_at, Some(refreshed_at + Duration::seconds(3600)));
        // Provider did not rotate, original refresh token must be kept
        assert_eq!(state.refresh_token.as_deref(), Some("ref1"));
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_replaces_old_one() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        endpoint.push_ok(r#"{"access_token":"tok2","refresh_token":"ref2","expires_in":7200}"#);
        let clock = Arc::new(ManualClock::default());
        let manager = manager(Arc::clone(&endpoint), Arc::clone(&clock));
        let provider = authorization_code_provider();
        let credential = Credential::authorized(
            "client",
            None,
            &StoredTokens {
                access_token: "tok1".into(),
                refresh_token: Some("ref1".into()),
                expires_at: Some(clock.now() - Duration::seconds(5)),
            },
        );

        assert_eq!(manager.get_valid_token(&credential, &provider).await.unwrap(), "tok2");
        let state = manager.current_state(&credential, &provider).unwrap();
        assert_eq!(state.refresh_token.as_deref(), Some("ref2"));

        // Public client: client_id in the body, no secret
        let request = endpoint.last_request();
        assert_eq!(request.get("client_id"), Some("client"));
        assert_eq!(request.get("client_secret"), None);
        assert!(request.basic_auth.is_none());
    }

    #[tokio::test]
    async fn test_authorized_credential_seeds_cache_without_network() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let clock = Arc::new(ManualClock::default());
        let manager = manager(Arc::clone(&endpoint), Arc::clone(&clock));
        let credential = Credential::authorized(
            "client",
            None,
            &StoredTokens {
                access_token: "stored".into(),
                refresh_token: None,
                expires_at: Some(clock.now() + Duration::hours(1)),
            },
        );
        let provider = authorization_code_provider();

        assert_eq!(manager.get_valid_token(&credential, &provider).await.unwrap(), "stored");
        assert_eq!(endpoint.calls(), 0);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_authorized_without_refresh_token_requires_reauthorization() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let clock = Arc::new(ManualClock::default());
        let manager = manager(Arc::clone(&endpoint), Arc::clone(&clock));
        let credential = Credential::authorized(
            "client",
            None,
            &StoredTokens {
                access_token: "stored".into(),
                refresh_token: None,
                expires_at: Some(clock.now() - Duration::seconds(1)),
            },
        );

        let err = manager
            .get_valid_token(&credential, &authorization_code_provider())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Authentication { status: None, .. }));
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_network_failure_during_refresh_leaves_entry_untouched() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        endpoint.push_ok(r#"{"access_token":"tok1","refresh_token":"ref1","expires_in":3600}"#);
        endpoint.push_err(AuthError::Network("connection reset".into()));
        endpoint.push_ok(r#"{"access_token":"tok2","expires_in":3600}"#);
        let clock = Arc::new(ManualClock::default());
        let manager = manager(Arc::clone(&endpoint), Arc::clone(&clock));
        let credential = Credential::client_credentials("abc", "xyz");
        let provider = client_credentials_provider();

        manager.get_valid_token(&credential, &provider).await.unwrap();
        let before = manager.current_state(&credential, &provider).unwrap();
        clock.advance(Duration::seconds(3600));

        let err = manager.get_valid_token(&credential, &provider).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(manager.current_state(&credential, &provider), Some(before));

        // Same refresh token is tried again
        assert_eq!(manager.get_valid_token(&credential, &provider).await.unwrap(), "tok2");
        let request = endpoint.last_request();
        assert_eq!(request.grant_type(), Some("refresh_token"));
        assert_eq!(request.get("refresh_token"), Some("ref1"));
        assert_eq!(endpoint.calls(), 3);
    }

    #[tokio::test]
    async fn test_rejected_refresh_falls_back_to_client_credentials() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        endpoint.push_ok(r#"{"access_token":"tok1","refresh_token":"ref1","expires_in":3600}"#);
        endpoint.push_err(AuthError::authentication(Some(400), r#"{"error":"invalid_grant"}"#));
        endpoint.push_ok(r#"{"access_token":"tok2","expires_in":3600}"#);
        let clock = Arc::new(ManualClock::default());
        let manager = manager(Arc::clone(&endpoint), Arc::clone(&clock));
        let credential = Credential::client_credentials("abc", "xyz");
        let provider = client_credentials_provider();

        manager.get_valid_token(&credential, &provider).await.unwrap();
        let before = manager.current_state(&credential, &provider).unwrap();
        clock.advance(Duration::seconds(3601));

        // No retry inside the failing call
        let err = manager.get_valid_token(&credential, &provider).await.unwrap_err();
        assert!(matches!(err, AuthError::Authentication { status: Some(400), .. }));
        assert_eq!(endpoint.calls(), 2);

        let after = manager.current_state(&credential, &provider).unwrap();
        assert_eq!(after.access_token, before.access_token);
        assert_eq!(after.expires_at, before.expires_at);
        assert_eq!(after.refresh_token, None);

        assert_eq!(manager.get_valid_token(&credential, &provider).await.unwrap(), "tok2");
        assert_eq!(endpoint.calls(), 3);
        let request = endpoint.last_request();
        assert_eq!(request.grant_type(), Some("client_credentials"));
        assert_eq!(request.get("refresh_token"), None);
    }

    #[tokio::test]
    async fn test_rejected_refresh_keeps_authorized_entry() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        endpoint.push_err(AuthError::authentication(Some(400), r#"{"error":"invalid_grant"}"#));
        let clock = Arc::new(ManualClock::default());
        let manager = manager(Arc::clone(&endpoint), Arc::clone(&clock));
        let provider = authorization_code_provider();
        let credential = Credential::authorized(
            "client",
            None,
            &StoredTokens {
                access_token: "tok1".into(),
                refresh_token: Some("ref1".into()),
                expires_at: Some(clock.now() + Duration::hours(1)),
            },
        );

        manager.get_valid_token(&credential, &provider).await.unwrap();
        let before = manager.current_state(&credential, &provider).unwrap();
        clock.advance(Duration::hours(2));

        let err = manager.get_valid_token(&credential, &provider).await.unwrap_err();
        assert!(matches!(err, AuthError::Authentication { .. }));
        assert_eq!(manager.current_state(&credential, &provider), Some(before));
    }

    #[tokio::test]
    async fn test_out_of_range_expires_in_is_rejected() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        endpoint.push_ok(r#"{"access_token":"t","expires_in":9223372036854775807}"#);
        endpoint.push_ok(r#"{"access_token":"t","expires_in":-5}"#);
        let manager = manager(Arc::clone(&endpoint), Arc::new(ManualClock::default()));
        let credential = Credential::client_credentials("abc", "xyz");
        let provider = client_credentials_provider();

        for _ in 0..2 {
            let err = manager.get_valid_token(&credential, &provider).await.unwrap_err();
            match err {
                AuthError::Authentication { status, message } => {
                    assert_eq!(status, None);
                    assert!(message.contains("expires_in"));
                }
                other => panic!("expected authentication error, got {:?}", other),
            }
        }
        assert!(manager.is_empty());
        assert_eq!(endpoint.calls(), 2);
    }

    #[test]
    fn test_expiry_after_bounds() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, 0), Some(now));
        assert_eq!(expiry_after(now, 60), Some(now + Duration::seconds(60)));
        assert_eq!(expiry_after(now, -1), None);
        assert_eq!(expiry_after(now, i64::MAX), None);
        // Representable as a duration, but past the last representable date
        assert_eq!(expiry_after(now, i64::MAX / 1000), None);
    }

    #[tokio::test]
    async fn test_configuration_errors_skip_network() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let manager = manager(Arc::clone(&endpoint), Arc::new(ManualClock::default()));
        let provider = client_credentials_provider();

        let missing_secret = Credential::ClientCredentials {
            client_id: "abc".into(),
            client_secret: None,
        };
        let err = manager.get_valid_token(&missing_secret, &provider).await.unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));

        let empty_id = Credential::client_credentials("", "xyz");
        assert!(matches!(
            manager.get_valid_token(&empty_id, &provider).await,
            Err(AuthError::Configuration(_))
        ));

        let wrong_grant = Credential::client_credentials("abc", "xyz");
        assert!(matches!(
            manager
                .get_valid_token(&wrong_grant, &authorization_code_provider())
                .await,
            Err(AuthError::Configuration(_))
        ));

        let bad_url = ProviderConfig::new("bad", "not a url", GrantType::ClientCredentials);
        assert!(matches!(
            manager.get_valid_token(&wrong_grant, &bad_url).await,
            Err(AuthError::Configuration(_))
        ));

        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_static_credentials_bypass_cache() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let manager = manager(Arc::clone(&endpoint), Arc::new(ManualClock::default()));
        let provider = client_credentials_provider();

        let token = manager
            .get_valid_token(&Credential::api_key("sk_test_1"), &provider)
            .await
            .unwrap();
        assert_eq!(token, "sk_test_1");
        assert!(matches!(
            manager
                .get_valid_token(&Credential::bearer_token("  "), &provider)
                .await,
            Err(AuthError::Configuration(_))
        ));
        assert!(manager.is_empty());
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_basic_auth_provider_moves_secret_to_header() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        endpoint.push_ok(r#"{"access_token":"tok1"}"#);
        let manager = manager(Arc::clone(&endpoint), Arc::new(ManualClock::default()));
        let provider = client_credentials_provider().with_client_auth(ClientAuth::BasicAuth);

        manager
            .get_valid_token(&Credential::client_credentials("abc", "xyz"), &provider)
            .await
            .unwrap();

        let request = endpoint.last_request();
        assert_eq!(request.basic_auth, Some(("abc".to_string(), "xyz".to_string())));
        assert_eq!(request.get("client_secret"), None);
    }

    #[tokio::test]
    async fn test_invalidate_forces_network_on_next_call() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        endpoint.push_ok(r#"{"access_token":"tok1","expires_in":3600}"#);
        endpoint.push_ok(r#"{"access_token":"tok2","expires_in":3600}"#);
        let manager = manager(Arc::clone(&endpoint), Arc::new(ManualClock::default()));
        let credential = Credential::client_credentials("abc", "xyz");
        let provider = client_credentials_provider();

        manager.get_valid_token(&credential, &provider).await.unwrap();
        manager.invalidate(&credential, &provider);
        assert_eq!(manager.get_valid_token(&credential, &provider).await.unwrap(), "tok2");
        assert_eq!(endpoint.calls(), 2);
    }

    #[tokio::test]
    async fn test_granted_scope_overrides_requested() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        endpoint.push_ok(r#"{"access_token":"tok1","scope":"a b"}"#);
        let manager = manager(Arc::clone(&endpoint), Arc::new(ManualClock::default()));
        let credential = Credential::client_credentials("abc", "xyz");
        let provider = client_credentials_provider();

        manager.get_valid_token(&credential, &provider).await.unwrap();
        let state = manager.current_state(&credential, &provider).unwrap();
        assert_eq!(
            state.scope,
            ["a", "b"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>()
        );
        assert_eq!(state.expires_at, None);
    }

    #[tokio::test]
    async fn test_single_flight_refreshes_once() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        endpoint.push_ok(r#"{"access_token":"tok1","expires_in":3600}"#);
        let manager = Arc::new(
            TokenManager::builder()
                .endpoint(Arc::clone(&endpoint) as Arc<dyn TokenEndpoint>)
                .clock(Arc::new(ManualClock::default()))
                .single_flight(true)
                .build()
                .unwrap(),
        );
        let credential = Credential::client_credentials("abc", "xyz");
        let provider = client_credentials_provider();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            let credential = credential.clone();
            let provider = provider.clone();
            handles.push(tokio::spawn(async move {
                manager.get_valid_token(&credential, &provider).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "tok1");
        }
        assert_eq!(endpoint.calls(), 1);
    }

    #[test]
    fn test_debug_redacts_access_token() {
        let state = TokenState {
            access_token: "very-secret".into(),
            refresh_token: Some("also-secret".into()),
            expires_at: None,
            scope: BTreeSet::new(),
        };
        let debug = format!("{:?}", state);
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("also-secret"));
    }

    #[test]
    fn test_negative_skew_rejected() {
        let result = TokenManager::builder()
            .endpoint(Arc::new(ScriptedEndpoint::default()))
            .refresh_skew(Duration::seconds(-1))
            .build();
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }
}
