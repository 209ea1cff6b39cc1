//! Integration registry - the integrations this build ships with.

use crate::providers::{grammarly::GrammarlyIntegration, stripe::StripeIntegration, x::XIntegration};
use crate::Integration;
use std::sync::Arc;

/// Returns all available integrations.
pub fn get_all_integrations() -> Vec<Arc<dyn Integration>> {
    vec![
        Arc::new(GrammarlyIntegration::new()),
        Arc::new(XIntegration::new()),
        Arc::new(StripeIntegration::new()),
    ]
}

/// Looks up an integration by name.
pub fn find_integration(name: &str) -> Option<Arc<dyn Integration>> {
    get_all_integrations()
        .into_iter()
        .find(|integration| integration.name() == name)
}
