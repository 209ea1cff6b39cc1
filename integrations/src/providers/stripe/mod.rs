use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use switchboard::oauth::ProviderConfig;

use crate::context::{read_json, ActionContext};
use crate::error::ActionError;
use crate::integration::Integration;
use crate::types::ActionSpec;

pub const BASE_URL: &str = "https://api.stripe.com";

#[derive(Debug, Deserialize)]
struct Balance {
    #[serde(default)]
    livemode: bool,
    #[serde(default)]
    available: Vec<Value>,
    #[serde(default)]
    pending: Vec<Value>,
}

/// Stripe, authenticated with a static secret API key.
pub struct StripeIntegration {
    base_url: String,
}

impl StripeIntegration {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Custom API base URL (for testing with a mock server).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for StripeIntegration {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Integration for StripeIntegration {
    fn name(&self) -> &str {
        "stripe"
    }

    fn provider(&self) -> Option<ProviderConfig> {
        None
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![ActionSpec::new("get_balance", "Fetch the account balance")]
    }

    async fn execute(
        &self,
        action: &str,
        _input: &Value,
        ctx: &ActionContext,
    ) -> Result<Map<String, Value>, ActionError> {
        if action != "get_balance" {
            return Err(ActionError::UnknownAction {
                integration: self.name().to_string(),
                action: action.to_string(),
            });
        }

        let url = format!("{}/v1/balance", self.base_url);
        let response = ctx.send_authorized(|client| client.get(&url)).await?;
        let balance: Balance = read_json(response).await?;

        let mut data = Map::new();
        data.insert("livemode".to_string(), Value::Bool(balance.livemode));
        data.insert("available".to_string(), Value::Array(balance.available));
        data.insert("pending".to_string(), Value::Array(balance.pending));
        Ok(data)
    }
}
