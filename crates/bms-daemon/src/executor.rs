use async_trait::async_trait;
use bms_scheduler::JobExecutor;
use bms_schemas::SyncType;
use bms_sync::{PullGroup, SyncEngine};
use tokio_util::sync::CancellationToken;

/// Bridges scheduled jobs onto the sync engine. `full` runs accounts →
/// checkins → routes; the first fatal batch error short-circuits the
/// remainder of that run.
pub struct SyncExecutor {
    engine: SyncEngine,
    cancel: CancellationToken,
}

impl SyncExecutor {
    pub fn new(engine: SyncEngine, cancel: CancellationToken) -> Self {
        Self { engine, cancel }
    }
}

#[async_trait]
impl JobExecutor for SyncExecutor {
    async fn execute(&self, sync_type: SyncType) -> Result<(), String> {
        let source = "scheduler";
        match sync_type {
            SyncType::Accounts | SyncType::Checkins | SyncType::Routes | SyncType::Profile => {
                let group = match sync_type {
                    SyncType::Accounts => PullGroup::Accounts,
                    SyncType::Checkins => PullGroup::Checkins,
                    SyncType::Routes => PullGroup::Routes,
                    _ => PullGroup::Profile,
                };
                self.engine
                    .pull(group, None, &self.cancel, source)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            SyncType::Full => {
                for group in [PullGroup::Accounts, PullGroup::Checkins, PullGroup::Routes] {
                    self.engine
                        .pull(group, None, &self.cancel, source)
                        .await
                        .map_err(|e| e.to_string())?;
                }
                Ok(())
            }
            SyncType::Push => self
                .engine
                .push(&self.cancel, source)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
        }
    }
}
