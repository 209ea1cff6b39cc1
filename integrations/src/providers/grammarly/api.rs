use serde::Deserialize;

use crate::context::{check_response_status, read_json, ActionContext};
use crate::error::ActionError;

pub const BASE_URL: &str = "https://api.grammarly.com";

/// Answer to a new score request: where to upload the document.
#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub score_request_id: String,
    pub file_upload_url: String,
}

/// Writing score for an uploaded document. `status` is `PENDING` until
/// the scores are ready.
#[derive(Debug, Deserialize)]
pub struct ScoreResult {
    pub score_request_id: String,
    pub status: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub scores: Option<serde_json::Value>,
}

/// Client for the Grammarly writing score API.
pub struct GrammarlyClient<'a> {
    ctx: &'a ActionContext,
    base_url: &'a str,
}

impl<'a> GrammarlyClient<'a> {
    pub fn new(ctx: &'a ActionContext, base_url: &'a str) -> Self {
        Self { ctx, base_url }
    }

    /// Opens a score request for `filename`.
    pub async fn create_score_request(&self, filename: &str) -> Result<ScoreRequest, ActionError> {
        let url = format!("{}/ecosystem/api/v2/scores", self.base_url);
        let body = serde_json::json!({ "filename": filename });
        let response = self
            .ctx
            .send_authorized(|client| client.post(&url).json(&body))
            .await?;
        read_json(response).await
    }

    /// Uploads the document to the pre-signed URL. No bearer token: the
    /// URL carries its own authorization.
    pub async fn upload(&self, upload_url: &str, text: &str) -> Result<(), ActionError> {
        let response = self
            .ctx
            .http_client()
            .put(upload_url)
            .body(text.to_string())
            .send()
            .await?;
        check_response_status(response).await?;
        Ok(())
    }

    pub async fn get_score(&self, score_request_id: &str) -> Result<ScoreResult, ActionError> {
        let url = format!(
            "{}/ecosystem/api/v2/scores/{}",
            self.base_url, score_request_id
        );
        let response = self.ctx.send_authorized(|client| client.get(&url)).await?;
        read_json(response).await
    }
}
