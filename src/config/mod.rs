mod env;

pub use env::{client_from_env, clients_from_env, provider_prefix, OAuthClient};

use crate::oauth::{
    builtin_providers, AuthError, ProviderConfig, TokenManager, DEFAULT_REFRESH_SKEW_SECS,
    DEFAULT_STATE_EXPIRY_SECS,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Config file used when `SWITCHBOARD_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "switchboard.toml";

/// Complete Switchboard configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub store: StoreConfig,
    /// Provider definitions; entries replace built-ins with the same name
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL the provider redirects back to
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
}

fn default_port() -> u16 {
    3000
}

fn default_callback_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            callback_base_url: default_callback_base_url(),
        }
    }
}

/// Token lifecycle settings
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthSettings {
    #[serde(default = "default_refresh_skew")]
    pub refresh_skew_seconds: i64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub single_flight: bool,
    #[serde(default = "default_state_expiry")]
    pub state_expiry_seconds: i64,
}

fn default_refresh_skew() -> i64 {
    DEFAULT_REFRESH_SKEW_SECS
}

fn default_request_timeout() -> u64 {
    15
}

fn default_state_expiry() -> i64 {
    DEFAULT_STATE_EXPIRY_SECS
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            refresh_skew_seconds: default_refresh_skew(),
            request_timeout_seconds: default_request_timeout(),
            single_flight: false,
            state_expiry_seconds: default_state_expiry(),
        }
    }
}

impl OAuthSettings {
    /// Token manager over HTTP with these settings.
    pub fn token_manager(&self) -> Result<TokenManager, AuthError> {
        TokenManager::builder()
            .refresh_skew(chrono::Duration::seconds(self.refresh_skew_seconds))
            .request_timeout(std::time::Duration::from_secs(self.request_timeout_seconds))
            .single_flight(self.single_flight)
            .build()
    }
}

/// Token store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "switchboard.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            oauth: OAuthSettings::default(),
            store: StoreConfig::default(),
            providers: builtin_providers(),
        }
    }
}

impl SwitchboardConfig {
    /// Parse a TOML document layered over the built-in providers.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: SwitchboardConfig =
            toml::from_str(contents).context("Failed to parse config")?;
        config.providers = merge_providers(builtin_providers(), config.providers);
        Ok(config)
    }

    /// Applies `SWITCHBOARD_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        env::apply_overrides(self, lookup)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Fails on the first provider with an unusable definition.
    pub fn validate(&self) -> Result<()> {
        for provider in &self.providers {
            provider
                .validate()
                .with_context(|| format!("Invalid provider '{}'", provider.name))?;
        }
        Ok(())
    }
}

fn merge_providers(
    builtin: Vec<ProviderConfig>,
    configured: Vec<ProviderConfig>,
) -> Vec<ProviderConfig> {
    let mut providers = builtin;
    for provider in configured {
        match providers.iter_mut().find(|p| p.name == provider.name) {
            Some(existing) => *existing = provider,
            None => providers.push(provider),
        }
    }
    providers
}

/// Load configuration from a TOML file. A missing file yields the defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SwitchboardConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(SwitchboardConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    SwitchboardConfig::from_toml(&contents)
        .with_context(|| format!("Failed to load config file {}", path.display()))
}

/// Config from `SWITCHBOARD_CONFIG` (or `switchboard.toml`) plus environment overrides.
pub fn load_from_env() -> Result<SwitchboardConfig> {
    let path =
        std::env::var("SWITCHBOARD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = load_config(&path)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
