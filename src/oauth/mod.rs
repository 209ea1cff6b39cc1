//! OAuth2 token lifecycle.
//!
//! [`TokenManager`] hands out valid access tokens, acquiring and refreshing
//! them against a provider's token endpoint. [`TokenManager::exchange_code`]
//! completes the authorization-code + PKCE flow started with
//! [`ProviderConfig::build_auth_url`].

mod clock;
mod endpoint;
mod error;
mod exchange;
mod pkce;
mod provider;
mod state_manager;
mod token_manager;

pub use clock::{Clock, ManualClock, SystemClock};
pub use endpoint::{
    HttpTokenEndpoint, TokenEndpoint, TokenRequest, TokenResponse, DEFAULT_REQUEST_TIMEOUT,
};
pub use error::AuthError;
pub use exchange::{CodeExchange, ExchangedTokens};
pub use pkce::{challenge_for, generate_pkce, generate_state, is_valid_verifier, PkceChallenge};
pub use provider::{builtin_providers, ClientAuth, GrantType, ProviderConfig};
pub use state_manager::{
    run_state_cleanup, PendingAuthorization, StateManager, DEFAULT_STATE_EXPIRY_SECS,
};
pub use token_manager::{
    CacheKey, TokenManager, TokenManagerBuilder, TokenState, DEFAULT_REFRESH_SKEW_SECS,
};
