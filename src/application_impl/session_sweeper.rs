use crate::domain_port::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically deletes dead session records. Expiry and revocation are
/// checked live on every use, so a stalled sweeper only costs storage.
pub struct SessionSweeper {
    session_store: Arc<dyn SessionStore>,
    interval: Duration,
    cancellation_token: CancellationToken,
}

impl SessionSweeper {
    pub fn new(
        session_store: Arc<dyn SessionStore>,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            session_store,
            interval,
            cancellation_token,
        }
    }

    pub async fn tick_once(&self) -> Result<u64, SessionStoreError> {
        let purged = self.session_store.purge_expired().await?;
        if purged > 0 {
            tracing::info!(purged, "purged expired sessions");
        }
        Ok(purged)
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("session sweeper shutting down...");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick_once().await {
                        tracing::error!("session sweep failed: {e}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_model::UserId;
    use crate::infra_memory::MemorySessionStore;
    use chrono::Utc;

    #[tokio::test]
    async fn tick_purges_expired_records() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemorySessionStore::new(
            chrono::Duration::hours(1),
            clock.clone(),
        ));
        let rec = store.create(UserId::new_random()).await.unwrap();
        let sweeper = SessionSweeper::new(
            store.clone(),
            Duration::from_secs(60),
            CancellationToken::new(),
        );

        assert_eq!(sweeper.tick_once().await.unwrap(), 0);
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(sweeper.tick_once().await.unwrap(), 1);
        assert_eq!(store.get(rec.jti).await.unwrap(), None);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemorySessionStore::new(chrono::Duration::hours(1), clock));
        let cancel = CancellationToken::new();
        let sweeper = SessionSweeper::new(store, Duration::from_millis(10), cancel.clone());

        let handle = tokio::spawn(async move { sweeper.run().await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
