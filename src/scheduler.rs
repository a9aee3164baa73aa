use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::db::Database;
use crate::ingest::IngestionService;

/// Handle for a running scheduler. Dropping it does not stop the loop;
/// call [`stop`](Self::stop).
pub struct SchedulerHandle {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.handle.abort();
        let _ = self.handle.await;
        info!("Scheduler stopped");
    }
}

/// Spawn the periodic ingestion loop: every `every`, trigger a run for
/// each user with at least one linked account. Best-effort — a missed
/// tick is skipped, not backfilled; per-user exclusivity lives in the
/// ingestion service, so a tick landing during an active run is a no-op
/// for that user while other users still proceed.
pub fn start(db: Database, ingestion: IngestionService, every: Duration) -> SchedulerHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(every_secs = every.as_secs(), "Scheduler started");
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                return;
            }

            let users = match db.users_with_accounts().await {
                Ok(users) => users,
                Err(e) => {
                    warn!(error = %e, "Failed to list users for scheduled pass");
                    continue;
                }
            };

            for user in users {
                if let Err(e) = ingestion.trigger(user.id).await {
                    warn!(user_id = user.id, error = %e, "Scheduled trigger failed");
                }
            }
        }
    });

    SchedulerHandle {
        shutdown: shutdown_flag,
        handle,
    }
}
