use serde::Deserialize;

use crate::context::{read_json, ActionContext};
use crate::error::ActionError;

pub const BASE_URL: &str = "https://api.x.com";

/// X API v2 wraps every payload in `data`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
pub struct XUser {
    pub id: String,
    pub name: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct XPost {
    pub id: String,
    pub text: String,
}

/// Client for the X API v2 (user-context OAuth 2.0 tokens).
pub struct XClient<'a> {
    ctx: &'a ActionContext,
    base_url: &'a str,
}

impl<'a> XClient<'a> {
    pub fn new(ctx: &'a ActionContext, base_url: &'a str) -> Self {
        Self { ctx, base_url }
    }

    /// The user who authorized the token.
    pub async fn me(&self) -> Result<XUser, ActionError> {
        let url = format!("{}/2/users/me", self.base_url);
        let response = self.ctx.send_authorized(|client| client.get(&url)).await?;
        Ok(read_json::<Envelope<XUser>>(response).await?.data)
    }

    pub async fn create_post(&self, text: &str) -> Result<XPost, ActionError> {
        let url = format!("{}/2/tweets", self.base_url);
        let body = serde_json::json!({ "text": text });
        let response = self
            .ctx
            .send_authorized(|client| client.post(&url).json(&body))
            .await?;
        Ok(read_json::<Envelope<XPost>>(response).await?.data)
    }
}
