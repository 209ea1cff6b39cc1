pub mod api;

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::oauth::{builtin_providers, ProviderConfig};

use self::api::{XClient, BASE_URL};
use crate::context::ActionContext;
use crate::error::ActionError;
use crate::integration::Integration;
use crate::types::{required_str, ActionSpec};

/// Posts are limited to 280 characters.
const MAX_POST_CHARS: usize = 280;

/// X (formerly Twitter), authenticated with tokens from the
/// authorization-code + PKCE flow.
pub struct XIntegration {
    base_url: String,
    provider: Option<ProviderConfig>,
}

impl XIntegration {
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            provider: builtin_providers().into_iter().find(|p| p.name == "x"),
        }
    }

    /// Custom API base URL and provider (for testing with a mock server).
    pub fn with_base_url(base_url: impl Into<String>, provider: ProviderConfig) -> Self {
        Self {
            base_url: base_url.into(),
            provider: Some(provider),
        }
    }
}

impl Default for XIntegration {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Integration for XIntegration {
    fn name(&self) -> &str {
        "x"
    }

    fn provider(&self) -> Option<ProviderConfig> {
        self.provider.clone()
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("get_me", "Fetch the authorized user's profile"),
            ActionSpec::new("create_post", "Publish a post as the authorized user"),
        ]
    }

    async fn execute(
        &self,
        action: &str,
        input: &Value,
        ctx: &ActionContext,
    ) -> Result<Map<String, Value>, ActionError> {
        let client = XClient::new(ctx, &self.base_url);
        let mut data = Map::new();

        match action {
            "get_me" => {
                let user = client.me().await?;
                data.insert("id".to_string(), Value::String(user.id));
                data.insert("name".to_string(), Value::String(user.name));
                data.insert("username".to_string(), Value::String(user.username));
            }
            "create_post" => {
                let text = required_str(input, "text")?;
                if text.chars().count() > MAX_POST_CHARS {
                    return Err(ActionError::InvalidInput(format!(
                        "'text' exceeds {} characters",
                        MAX_POST_CHARS
                    )));
                }
                let post = client.create_post(text).await?;
                data.insert("id".to_string(), Value::String(post.id));
                data.insert("text".to_string(), Value::String(post.text));
            }
            other => {
                return Err(ActionError::UnknownAction {
                    integration: self.name().to_string(),
                    action: other.to_string(),
                })
            }
        }

        Ok(data)
    }
}
