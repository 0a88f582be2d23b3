use crate::domain_port::*;
use crate::logger::*;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodically deletes expired refresh records until cancelled.
pub struct Janitor {
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    interval: Duration,
    cancellation_token: CancellationToken,
}

impl Janitor {
    pub fn new(
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            refresh_tokens,
            interval,
            cancellation_token,
        }
    }

    async fn tick_once(&self) -> Result<u64, StoreError> {
        let purged = self.refresh_tokens.purge_expired(Utc::now()).await?;
        if purged > 0 {
            info!(purged, "expired refresh tokens purged");
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
                    info!("janitor shutting down...");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick_once().await {
                        warn!("janitor purge failed: {e}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_model::AccountId;
    use crate::infra_memory::MemoryRefreshTokenStore;

    #[tokio::test]
    async fn janitor_purges_then_stops_on_cancel() {
        let store = Arc::new(MemoryRefreshTokenStore::new());
        let owner = AccountId::new_v4();
        store.create(owner, Duration::from_millis(1)).await.unwrap();
        store
            .create(owner, Duration::from_secs(3600))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let cancel = CancellationToken::new();
        let janitor = Janitor::new(store.clone(), Duration::from_millis(10), cancel.clone());
        let handle = tokio::spawn(async move { janitor.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(store.list_by_owner(owner).await.unwrap().len(), 1);
    }
}
