//! Errors surfaced by token acquisition, refresh and code exchange.

use thiserror::Error;

/// Token lifecycle errors.
///
/// The token manager never swallows one of these: it returns the error to
/// the calling action, which reports it in its result envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Required credential or provider fields are missing or malformed.
    /// Raised before any network call; never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The token endpoint rejected the request or answered with something
    /// that is not a token response. The cached entry is left untouched.
    #[error("authentication failed{}: {message}", status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
    Authentication {
        status: Option<u16>,
        message: String,
    },

    /// Transport failure or timeout talking to the token endpoint.
    #[error("network error: {0}")]
    Network(String),
}

impl AuthError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn authentication(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Authentication {
            status,
            message: msg.into(),
        }
    }

    /// Only transport failures are worth retrying the whole action for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Network(format!("token endpoint timed out: {}", err))
        } else {
            Self::Network(err.to_string())
        }
    }
}
