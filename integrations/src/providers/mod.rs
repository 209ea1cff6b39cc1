//! Built-in integrations, one per credential style:
//! client credentials (grammarly), authorization code (x), API key (stripe).

pub mod grammarly;
pub mod stripe;
pub mod x;
