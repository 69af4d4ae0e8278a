//! Typed client for the upstream mapping/CRM REST API.
//!
//! Every request carries the auth header; non-2xx responses are classified
//! into the retriable/fatal taxonomy and retried here (backoff + jitter,
//! rate-limit aware) so callers only ever see the final outcome.

mod client;
mod error;

pub use client::{BadgerClient, Upstream};
pub use error::ApiError;
