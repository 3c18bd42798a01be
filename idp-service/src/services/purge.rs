//! Periodic removal of expired sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::services::session_authority::SessionAuthority;

pub struct PurgeScheduler {
    authority: Arc<SessionAuthority>,
    period: Duration,
    shutdown_token: CancellationToken,
}

impl PurgeScheduler {
    pub fn new(authority: Arc<SessionAuthority>, period: Duration) -> Self {
        Self {
            authority,
            period,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops the loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawn the loop. The first sweep runs one period after start.
    pub fn start(self) -> JoinHandle<()> {
        tracing::info!(period_secs = self.period.as_secs(), "Starting session purge");

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.period;
            let mut ticker = tokio::time::interval_at(start, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        tracing::info!("Session purge shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.authority.purge().await {
                            Ok(purged) => tracing::debug!(purged, "Purge sweep finished"),
                            Err(e) => tracing::error!(error = %e, "Purge sweep failed"),
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::password::Argon2Hasher;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_cancelled_scheduler_stops() {
        let store = Arc::new(MemoryStore::new());
        let authority = Arc::new(SessionAuthority::new(
            store.clone(),
            store,
            Arc::new(Argon2Hasher),
            chrono::Duration::minutes(30),
        ));

        let scheduler = PurgeScheduler::new(authority, Duration::from_secs(3600));
        let token = scheduler.shutdown_token();
        let handle = scheduler.start();

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .expect("scheduler panicked");
    }
}
