pub mod api;

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchboard::oauth::{builtin_providers, ProviderConfig};

use self::api::{GrammarlyClient, BASE_URL};
use crate::context::ActionContext;
use crate::error::ActionError;
use crate::integration::Integration;
use crate::types::{optional_str, required_str, ActionSpec};

const DEFAULT_FILENAME: &str = "document.txt";

/// Grammarly writing scores, authenticated with the client-credentials grant.
pub struct GrammarlyIntegration {
    base_url: String,
    provider: Option<ProviderConfig>,
}

impl GrammarlyIntegration {
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            provider: builtin_providers().into_iter().find(|p| p.name == "grammarly"),
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

impl Default for GrammarlyIntegration {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Integration for GrammarlyIntegration {
    fn name(&self) -> &str {
        "grammarly"
    }

    fn provider(&self) -> Option<ProviderConfig> {
        self.provider.clone()
    }

    fn actions(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("request_score", "Upload a document and start scoring it"),
            ActionSpec::new("get_score", "Fetch the writing score of an uploaded document"),
        ]
    }

    async fn execute(
        &self,
        action: &str,
        input: &Value,
        ctx: &ActionContext,
    ) -> Result<Map<String, Value>, ActionError> {
        let client = GrammarlyClient::new(ctx, &self.base_url);
        let mut data = Map::new();

        match action {
            "request_score" => {
                let text = required_str(input, "text")?;
                let filename = optional_str(input, "filename").unwrap_or(DEFAULT_FILENAME);

                let request = client.create_score_request(filename).await?;
                client.upload(&request.file_upload_url, text).await?;
                data.insert(
                    "score_request_id".to_string(),
                    Value::String(request.score_request_id),
                );
            }
            "get_score" => {
                let id = required_str(input, "score_request_id")?;
                let score = client.get_score(id).await?;
                data.insert(
                    "score_request_id".to_string(),
                    Value::String(score.score_request_id),
                );
                data.insert("status".to_string(), Value::String(score.status));
                if let Some(updated_at) = score.updated_at {
                    data.insert("updated_at".to_string(), Value::String(updated_at));
                }
                if let Some(scores) = score.scores {
                    data.insert("scores".to_string(), scores);
                }
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
