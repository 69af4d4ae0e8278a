//! Pull and push pipelines.
//!
//! Both report progress exclusively through the event bus, honor a
//! cancellation token, and record a sync-history row per run. Per-item
//! failures are counted and reported but never abort a batch; only an
//! id-list failure, a fatal auth error, or an all-items-failed batch
//! surfaces as a run-level error.

mod engine;
mod pull;
mod push;

pub use engine::{GroupStats, PushStats, SyncEngine, SyncError};
pub use pull::PullGroup;
