//! Transport to a provider's token endpoint.

use super::AuthError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default bound on a token endpoint call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// One form-encoded POST to a token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub token_url: String,
    /// Form fields, in insertion order
    pub form: Vec<(String, String)>,
    /// Client id and secret sent as HTTP Basic credentials
    pub basic_auth: Option<(String, String)>,
}

impl TokenRequest {
    pub fn new(token_url: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            form: Vec::new(),
            basic_auth: None,
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.form.push((key.to_string(), value.into()));
        self
    }

    /// Value of a form field, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn grant_type(&self) -> Option<&str> {
        self.get("grant_type")
    }
}

// Form values carry secrets; only field names are printed.
impl std::fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRequest")
            .field("token_url", &self.token_url)
            .field(
                "fields",
                &self.form.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .field("basic_auth", &self.basic_auth.is_some())
            .finish()
    }
}

/// OAuth token response (standard OAuth 2.0)
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Space-delimited granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

/// Something that can answer token requests.
///
/// [`HttpTokenEndpoint`] talks to a real provider; tests substitute
/// in-process providers.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn request_token(&self, request: TokenRequest) -> Result<TokenResponse, AuthError>;
}

/// Token endpoint over HTTP.
#[derive(Clone, Debug)]
pub struct HttpTokenEndpoint {
    http_client: reqwest::Client,
}

impl HttpTokenEndpoint {
    pub fn new(timeout: Duration) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn request_token(&self, request: TokenRequest) -> Result<TokenResponse, AuthError> {
        debug!(
            token_url = %request.token_url,
            grant_type = request.grant_type().unwrap_or("unknown"),
            "Requesting token"
        );

        let mut builder = self
            .http_client
            .post(&request.token_url)
            .header("Accept", "application/json")
            .form(&request.form);
        if let Some((client_id, client_secret)) = &request.basic_auth {
            builder = builder.basic_auth(client_id, Some(client_secret));
        }

        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(AuthError::authentication(Some(status.as_u16()), body));
        }

        let body = response.text().await?;
        serde_json::from_str::<TokenResponse>(&body).map_err(|e| {
            AuthError::authentication(
                Some(status.as_u16()),
                format!("malformed token response: {}", e),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "tok1",
            "refresh_token": "ref1",
            "expires_in": 3600,
            "token_type": "Bearer",
            "scope": "read write"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "tok1");
        assert_eq!(response.refresh_token.as_deref(), Some("ref1"));
        assert_eq!(response.expires_in, Some(3600));
        assert_eq!(response.scope.as_deref(), Some("read write"));
    }

    #[test]
    fn test_token_response_minimal() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token": "tok"}"#).unwrap();
        assert_eq!(response.access_token, "tok");
        assert_eq!(response.refresh_token, None);
        assert_eq!(response.expires_in, None);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let request = TokenRequest::new("https://auth.example.com/token")
            .field("grant_type", "client_credentials")
            .field("client_secret", "xyz-secret");
        let debug = format!("{:?}", request);
        assert!(debug.contains("client_secret"));
        assert!(!debug.contains("xyz-secret"));

        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "tok-secret", "refresh_token": "ref-secret"}"#)
                .unwrap();
        let debug = format!("{:?}", response);
        assert!(!debug.contains("tok-secret"));
        assert!(!debug.contains("ref-secret"));
    }

    #[tokio::test]
    async fn test_posts_form_and_parses_response() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("accept", "application/json")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "abc".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok1","expires_in":3600}"#)
            .create_async()
            .await;

        let endpoint = HttpTokenEndpoint::new(DEFAULT_REQUEST_TIMEOUT).unwrap();
        let request = TokenRequest::new(format!("{}/token", server.url()))
            .field("grant_type", "client_credentials")
            .field("client_id", "abc");

        let response = endpoint.request_token(request).await.unwrap();
        assert_eq!(response.access_token, "tok1");
        assert_eq!(response.expires_in, Some(3600));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let mut server = Server::new_async().await;
        // base64("abc:xyz")
        let mock = server
            .mock("POST", "/token")
            .match_header("authorization", "Basic YWJjOnh5eg==")
            .with_status(200)
            .with_body(r#"{"access_token":"tok"}"#)
            .create_async()
            .await;

        let endpoint = HttpTokenEndpoint::new(DEFAULT_REQUEST_TIMEOUT).unwrap();
        let mut request = TokenRequest::new(format!("{}/token", server.url()))
            .field("grant_type", "client_credentials");
        request.basic_auth = Some(("abc".to_string(), "xyz".to_string()));

        assert!(endpoint.request_token(request).await.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_is_authentication_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client"}"#)
            .create_async()
            .await;

        let endpoint = HttpTokenEndpoint::new(DEFAULT_REQUEST_TIMEOUT).unwrap();
        let err = endpoint
            .request_token(TokenRequest::new(format!("{}/token", server.url())))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AuthError::authentication(Some(401), r#"{"error":"invalid_client"}"#)
        );
    }

    #[tokio::test]
    async fn test_malformed_body_is_authentication_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body("<html>login</html>")
            .create_async()
            .await;

        let endpoint = HttpTokenEndpoint::new(DEFAULT_REQUEST_TIMEOUT).unwrap();
        let err = endpoint
            .request_token(TokenRequest::new(format!("{}/token", server.url())))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Authentication { status: Some(200), .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let endpoint = HttpTokenEndpoint::new(Duration::from_secs(2)).unwrap();
        let err = endpoint
            .request_token(TokenRequest::new("http://127.0.0.1:9/token"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
