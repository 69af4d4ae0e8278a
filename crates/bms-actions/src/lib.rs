//! Event-triggered actions.
//!
//! An action is a tagged record (`exec` / `db` / `api`) configured
//! declaratively and bound to event patterns. Before execution every
//! string field goes through `$EVENT_*` token interpolation against the
//! triggering event.

mod config;
mod engine;
mod tokens;

pub use config::{parse_bindings, Action, ActionBinding};
pub use engine::{ActionEngine, ActionErr};
pub use tokens::interpolate;
