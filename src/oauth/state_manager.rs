//! OAuth state management for CSRF protection.
//!
//! Each authorization started through the setup API gets a random state
//! token. The token maps to the pending authorization (provider, account
//! and PKCE verifier) until the callback consumes it or it expires.

use super::clock::{Clock, SystemClock};
use super::pkce::generate_state;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Default lifetime of a pending authorization, in seconds.
pub const DEFAULT_STATE_EXPIRY_SECS: i64 = 600;

/// Authorization started but not yet completed.
#[derive(Clone, Debug)]
pub struct PendingAuthorization {
    pub provider: String,
    pub account: String,
    pub code_verifier: SecretString,
    pub created_at: DateTime<Utc>,
}

/// OAuth state manager with automatic expiration
#[derive(Clone)]
pub struct StateManager {
    states: Arc<Mutex<HashMap<String, PendingAuthorization>>>,
    expiry_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl StateManager {
    /// Create a new state manager
    ///
    /// # Arguments
    /// * `expiry_seconds` - How long states remain valid (default: 600 = 10 minutes)
    pub fn new(expiry_seconds: i64) -> Self {
        Self::with_clock(expiry_seconds, Arc::new(SystemClock))
    }

    pub fn with_clock(expiry_seconds: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            expiry_duration: Duration::seconds(expiry_seconds),
            clock,
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, PendingAuthorization>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a pending authorization and returns its state token.
    pub fn create(&self, provider: &str, account: &str, code_verifier: SecretString) -> String {
        let state = generate_state();
        let pending = PendingAuthorization {
            provider: provider.to_string(),
            account: account.to_string(),
            code_verifier,
            created_at: self.clock.now(),
        };

        self.states().insert(state.clone(), pending);
        state
    }

    /// Validate and consume a state token
    ///
    /// Returns the pending authorization if the state is known and not
    /// expired. The state is removed either way (single-use).
    pub fn validate_and_consume(&self, state: &str) -> Option<PendingAuthorization> {
        let pending = self.states().remove(state)?;

        if self.clock.now() - pending.created_at > self.expiry_duration {
            return None;
        }
        Some(pending)
    }

    /// Drops expired states.
    pub fn cleanup_expired(&self) {
        let now = self.clock.now();
        let expiry = self.expiry_duration;
        self.states()
            .retain(|_, pending| now - pending.created_at <= expiry);
    }

    /// Number of pending authorizations.
    pub fn count(&self) -> usize {
        self.states().len()
    }
}

/// Background task to periodically clean up expired states
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!(remaining = manager.count(), "OAuth state cleanup complete");
    }
}
