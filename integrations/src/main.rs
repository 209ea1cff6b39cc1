use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use secrecy::ExposeSecret;
use serde_json::Value;
use std::sync::Arc;
use switchboard::config::{client_from_env, load_from_env, OAuthClient};
use switchboard::credentials::{Credential, TokenStore};
use switchboard::oauth::{GrantType, ProviderConfig};
use tracing::{info, warn};

use integrations::{find_integration, get_all_integrations, run_action, ActionContext};

/// Run one integration action and print its result envelope.
#[derive(Parser, Debug)]
#[command(name = "integrations", version, about)]
struct Cli {
    /// Integration name (e.g. grammarly, x, stripe)
    integration: Option<String>,

    /// Action to run
    action: Option<String>,

    /// Action input as a JSON object
    #[arg(default_value = "{}")]
    input: String,

    /// Account whose stored tokens to use (authorization-code providers)
    #[arg(long, env = "SWITCHBOARD_ACCOUNT", default_value = "default")]
    account: String,

    /// Static API key (integrations without an OAuth provider)
    #[arg(long, env = "SWITCHBOARD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Encryption key of the token store
    #[arg(long, env = "SWITCHBOARD_ENCRYPTION_KEY", hide_env_values = true)]
    encryption_key: Option<String>,

    /// List integrations and their actions
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "integrations=info,switchboard=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if cli.list {
        for integration in get_all_integrations() {
            println!("{}", integration.name());
            for action in integration.actions() {
                println!("  {:<16} {}", action.name, action.description);
            }
        }
        return Ok(());
    }

    let (Some(name), Some(action)) = (cli.integration.as_deref(), cli.action.as_deref()) else {
        bail!("usage: integrations <integration> <action> [json-input] (or --list)");
    };
    let integration =
        find_integration(name).ok_or_else(|| anyhow!("unknown integration '{}'", name))?;
    let input: Value = serde_json::from_str(&cli.input).context("Action input is not valid JSON")?;

    let config = load_from_env().context("Failed to load configuration")?;
    // Configured endpoints win over the integration's built-in ones
    let provider = integration
        .provider()
        .map(|builtin| config.provider(&builtin.name).cloned().unwrap_or(builtin));

    let token_manager = Arc::new(
        config
            .oauth
            .token_manager()
            .context("Failed to build token manager")?,
    );

    let store = match (&provider, &cli.encryption_key) {
        (Some(p), Some(key)) if p.grant_type == GrantType::AuthorizationCode => Some(
            TokenStore::new(&config.store.path, key).context("Failed to open token store")?,
        ),
        (Some(p), None) if p.grant_type == GrantType::AuthorizationCode => {
            bail!("SWITCHBOARD_ENCRYPTION_KEY is required to read stored tokens")
        }
        _ => None,
    };

    let credential = build_credential(provider.as_ref(), &cli, store.as_ref())?;
    info!(
        integration = integration.name(),
        action,
        credential = credential.kind(),
        "Running action"
    );

    let ctx = ActionContext::new(token_manager, credential, provider.clone())
        .context("Failed to build HTTP client")?;
    let outcome = run_action(integration.as_ref(), action, &input, &ctx).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let (Some(store), Some(provider), Some(tokens)) = (&store, &provider, ctx.rotated_tokens()) {
        match store.get(&cli.account, &provider.name) {
            Ok(Some(previous)) if previous == tokens => {}
            _ => {
                if let Err(e) = store.store(&cli.account, &provider.name, &tokens) {
                    warn!(error = %e, "Failed to write rotated tokens back to the store");
                } else {
                    info!(account = %cli.account, provider = %provider.name, "Stored rotated tokens");
                }
            }
        }
    }

    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Credential for the integration: client credentials from the
/// environment, stored tokens from the store, or a static API key.
fn build_credential(
    provider: Option<&ProviderConfig>,
    cli: &Cli,
    store: Option<&TokenStore>,
) -> Result<Credential> {
    let Some(provider) = provider else {
        let key = cli
            .api_key
            .clone()
            .context("SWITCHBOARD_API_KEY is required for this integration")?;
        return Ok(Credential::api_key(key));
    };

    let env = |key: &str| std::env::var(key).ok();
    let client = client_from_env(&provider.name, env).unwrap_or_else(|| OAuthClient {
        client_id: String::new(),
        client_secret: None,
    });
    let client_secret = client
        .client_secret
        .as_ref()
        .map(|s| s.expose_secret().clone());

    match provider.grant_type {
        GrantType::ClientCredentials => Ok(Credential::ClientCredentials {
            client_id: client.client_id,
            client_secret: client.client_secret,
        }),
        GrantType::AuthorizationCode => {
            let store = store.context("Token store is not open")?;
            let tokens = store
                .get(&cli.account, &provider.name)?
                .with_context(|| {
                    format!(
                        "No stored tokens for account '{}' and provider '{}'; run the OAuth setup flow first",
                        cli.account, provider.name
                    )
                })?;
            Ok(Credential::authorized(client.client_id, client_secret, &tokens))
        }
    }
}
