//! Environment overrides and OAuth client registrations.
//!
//! Client ids and secrets are never read from the config file. Each provider
//! takes them from `SWITCHBOARD_OAUTH_<NAME>_CLIENT_ID` and
//! `SWITCHBOARD_OAUTH_<NAME>_CLIENT_SECRET`.

use super::SwitchboardConfig;
use crate::oauth::ProviderConfig;
use secrecy::{Secret, SecretString};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

/// OAuth client registered with a provider.
#[derive(Clone, Debug)]
pub struct OAuthClient {
    pub client_id: String,
    /// Absent for public clients
    pub client_secret: Option<SecretString>,
}

/// Env var prefix for one provider, e.g. `SWITCHBOARD_OAUTH_X`.
pub fn provider_prefix(name: &str) -> String {
    let normalized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("SWITCHBOARD_OAUTH_{}", normalized)
}

/// Client registration for `provider` from `lookup`, if a client id is set.
pub fn client_from_env<F>(provider: &str, lookup: F) -> Option<OAuthClient>
where
    F: Fn(&str) -> Option<String>,
{
    let prefix = provider_prefix(provider);
    let client_id = lookup(&format!("{}_CLIENT_ID", prefix)).filter(|v| !v.trim().is_empty())?;
    let client_secret = lookup(&format!("{}_CLIENT_SECRET", prefix))
        .filter(|v| !v.trim().is_empty())
        .map(Secret::new);

    Some(OAuthClient {
        client_id,
        client_secret,
    })
}

/// Client registrations for every provider that has one.
pub fn clients_from_env<F>(providers: &[ProviderConfig], lookup: F) -> HashMap<String, OAuthClient>
where
    F: Fn(&str) -> Option<String>,
{
    providers
        .iter()
        .filter_map(|p| client_from_env(&p.name, &lookup).map(|c| (p.name.clone(), c)))
        .collect()
}

fn parse_into<T, F>(lookup: &F, key: &str, target: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup(key) {
        match v.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key = %key, value = %v, "Ignoring unparsable environment override"),
        }
    }
}

pub(super) fn apply_overrides<F>(config: &mut SwitchboardConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    parse_into(&lookup, "SWITCHBOARD_PORT", &mut config.server.port);
    if let Some(v) = lookup("SWITCHBOARD_CALLBACK_BASE_URL") {
        config.server.callback_base_url = v.trim_end_matches('/').to_string();
    }
    parse_into(
        &lookup,
        "SWITCHBOARD_REFRESH_SKEW_SECONDS",
        &mut config.oauth.refresh_skew_seconds,
    );
    parse_into(
        &lookup,
        "SWITCHBOARD_REQUEST_TIMEOUT_SECONDS",
        &mut config.oauth.request_timeout_seconds,
    );
    parse_into(&lookup, "SWITCHBOARD_SINGLE_FLIGHT", &mut config.oauth.single_flight);
    parse_into(
        &lookup,
        "SWITCHBOARD_STATE_EXPIRY_SECONDS",
        &mut config.oauth.state_expiry_seconds,
    );
    if let Some(v) = lookup("SWITCHBOARD_STORE_PATH") {
        config.store.path = v;
    }

    for provider in &mut config.providers {
        let prefix = provider_prefix(&provider.name);
        if let Some(v) = lookup(&format!("{}_TOKEN_URL", prefix)) {
            provider.token_url = v;
        }
        if let Some(v) = lookup(&format!("{}_AUTH_URL", prefix)) {
            provider.auth_url = Some(v);
        }
    }
}
