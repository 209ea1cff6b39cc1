use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::oauth::ProviderConfig;
use tracing::{info, warn};

use crate::context::ActionContext;
use crate::error::ActionError;
use crate::types::{ActionOutcome, ActionSpec};

/// Interface for SaaS API integrations.
///
/// Integrations are stateless: the credential, token manager and HTTP
/// client for a call all arrive through the [`ActionContext`].
///
/// # Lifecycle
/// 1. The host picks an integration by [`name`](Integration::name)
/// 2. It builds an [`ActionContext`] with the caller's credential and
///    [`provider`](Integration::provider)
/// 3. [`run_action`] calls [`execute`](Integration::execute) and wraps the
///    result in the envelope
#[async_trait]
pub trait Integration: Send + Sync {
    /// Unique lowercase identifier (e.g. "grammarly", "x").
    fn name(&self) -> &str;

    /// OAuth provider the integration's tokens come from.
    ///
    /// `None` for integrations that authenticate with a static API key.
    fn provider(&self) -> Option<ProviderConfig>;

    /// Actions this integration can run.
    fn actions(&self) -> Vec<ActionSpec>;

    /// Runs one action and returns its data fields.
    ///
    /// Must get its token through `ctx` before touching the downstream API
    /// so a failed acquisition stops the action early.
    async fn execute(
        &self,
        action: &str,
        input: &Value,
        ctx: &ActionContext,
    ) -> Result<Map<String, Value>, ActionError>;
}

/// Runs `action` and maps every outcome into the result envelope.
pub async fn run_action(
    integration: &dyn Integration,
    action: &str,
    input: &Value,
    ctx: &ActionContext,
) -> ActionOutcome {
    if !integration.actions().iter().any(|spec| spec.name == action) {
        let err = ActionError::UnknownAction {
            integration: integration.name().to_string(),
            action: action.to_string(),
        };
        warn!(integration = integration.name(), action, "Unknown action");
        return ActionOutcome::failure(err.to_string());
    }

    match integration.execute(action, input, ctx).await {
        Ok(data) => {
            info!(integration = integration.name(), action, "Action succeeded");
            ActionOutcome::Success(data)
        }
        Err(e) => {
            warn!(
                integration = integration.name(),
                action,
                retryable = e.is_retryable(),
                error = %e,
                "Action failed"
            );
            ActionOutcome::failure(e.to_string())
        }
    }
}
