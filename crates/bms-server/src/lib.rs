//! Webhook HTTP server.
//!
//! `build_router` is the single entry point; `serve` binds it with
//! optional TLS and graceful shutdown. Webhook routes are POST-only and
//! pass through the HMAC signature middleware before any body parsing;
//! accepted deliveries persist through the same merge paths the pull
//! pipeline uses, so webhook and pull converge on identical state.

pub mod routes;
pub mod signature;
pub mod state;

mod serve;

pub use routes::build_router;
pub use serve::serve;
pub use state::{AppState, SigningConfig};
