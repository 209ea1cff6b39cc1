//! Switchboard integrations - action handlers for SaaS APIs.
//!
//! Each integration is a thin adapter around one downstream API. It
//! declares named actions, gets an access token from the shared
//! [`switchboard::oauth::TokenManager`], calls the API and reports the
//! outcome in the platform's result envelope.
//!
//! # Architecture
//!
//! ```text
//!   CLI / host platform
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       run_action                         │
//! │  - Look up the action                    │
//! │  - Wrap the result in the envelope       │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       Integration (implements trait)     │
//! │  - Validate input                        │
//! │  - Call the downstream API               │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       ActionContext                      │
//! │  - get_valid_token (cache / refresh)     │
//! │  - Bearer auth, one retry on 401         │
//! └─────────────────────────────────────────┘
//!          ↓
//!   SaaS API (Grammarly, X, Stripe)
//! ```
//!
//! # Core Types
//!
//! - [`Integration`] - Trait that all integrations implement
//! - [`ActionContext`] - Credential, token manager and HTTP client for one action
//! - [`ActionOutcome`] - `{"result": true, ...}` / `{"result": false, "error": ...}`
//! - [`ActionError`] - Everything an action can fail with
//!
//! # Running an action
//!
//! ```no_run
//! use integrations::{find_integration, run_action, ActionContext};
//! use switchboard::credentials::Credential;
//! use switchboard::oauth::TokenManager;
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let manager = Arc::new(TokenManager::builder().build()?);
//! let integration = find_integration("stripe").ok_or_else(|| anyhow::anyhow!("not registered"))?;
//! let ctx = ActionContext::new(manager, Credential::api_key("sk_test_123"), integration.provider())?;
//!
//! let outcome = run_action(integration.as_ref(), "get_balance", &serde_json::json!({}), &ctx).await;
//! println!("{}", outcome.to_json());
//! # Ok(())
//! # }
//! ```

mod context;
mod error;
mod integration;
mod types;
pub mod providers;
pub mod registry;

pub use context::ActionContext;
pub use error::ActionError;
pub use integration::{run_action, Integration};
pub use registry::{find_integration, get_all_integrations};
pub use types::{optional_str, required_str, ActionOutcome, ActionSpec};
