// OAuth2 token lifecycle: cache, refresh, code exchange
pub mod oauth;

// Credential material and encrypted token storage
pub mod credentials;

// TOML + environment configuration
pub mod config;

// OAuth setup HTTP API
pub mod api;
