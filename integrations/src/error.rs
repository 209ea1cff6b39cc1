use switchboard::oauth::AuthError;
use thiserror::Error;

/// Anything an action can fail with. The envelope's `error` field is the
/// `Display` of this type.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Token acquisition failed; the downstream API was never called.
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown action '{action}' for integration '{integration}'")]
    UnknownAction { integration: String, action: String },

    /// Downstream API answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ActionError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Transport failures (token endpoint or downstream) may succeed if the
    /// whole action is run again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Auth(err) => err.is_retryable(),
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display_is_passed_through() {
        let err = ActionError::from(AuthError::configuration("missing client_secret"));
        assert_eq!(err.to_string(), "configuration error: missing client_secret");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        assert!(ActionError::from(AuthError::Network("timed out".into())).is_retryable());
        assert!(ActionError::api(503, "unavailable").is_retryable());
        assert!(ActionError::api(429, "slow down").is_retryable());
        assert!(!ActionError::api(404, "not found").is_retryable());
        assert!(!ActionError::InvalidInput("x".into()).is_retryable());
    }
}
