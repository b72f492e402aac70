//! Background task that runs the retry sweep on a fixed interval.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::RetryScheduler;

pub struct SweepScheduler {
    retry: Arc<RetryScheduler>,
    interval: Duration,
    batch_size: u64,
    running: Arc<RwLock<bool>>,
    shutdown: Arc<Notify>,
    task_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl SweepScheduler {
    pub fn new(retry: Arc<RetryScheduler>, interval: Duration, batch_size: u64) -> Self {
        Self {
            retry,
            interval,
            batch_size,
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
            task_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Start sweeping. The first sweep runs immediately.
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            debug!("Sweep scheduler already running");
            return;
        }
        *running = true;
        drop(running);

        let retry = self.retry.clone();
        let shutdown = self.shutdown.clone();
        let batch_size = self.batch_size;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let handle = tokio::spawn(async move {
            let mut sweeps: u64 = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweeps += 1;
                        if let Err(e) = retry.sweep(batch_size).await {
                            error!("Retry sweep #{} failed: {}", sweeps, e);
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
            info!("Sweep scheduler stopped after {} sweeps", sweeps);
        });

        *self.task_handle.write().await = Some(handle);
        info!(
            "Sweep scheduler started (every {}s, batch {})",
            self.interval.as_secs(),
            self.batch_size
        );
    }

    /// Stop sweeping and wait for an in-flight sweep to finish.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        if !*running {
            return;
        }
        *running = false;
        drop(running);

        self.shutdown.notify_one();
        if let Some(handle) = self.task_handle.write().await.take() {
            if let Err(e) = handle.await {
                error!("Sweep scheduler task ended abnormally: {}", e);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{harness, register};
    use crate::{AttemptOutcome, EventType, WebhookConfig};
    use chrono::Utc;
    use consentry_database::test_utils::wait_for;
    use consentry_entities::DeliveryStatus;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_stop_survives_panicked_task() -> anyhow::Result<()> {
        let h = harness(WebhookConfig::default()).await?;
        let scheduler = SweepScheduler::new(h.retry.clone(), Duration::from_secs(3600), 10);

        *scheduler.running.write().await = true;
        *scheduler.task_handle.write().await =
            Some(tokio::spawn(async { panic!("sweep task panicked") }));

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
        assert!(scheduler.task_handle.read().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_start_stop() -> anyhow::Result<()> {
        let h = harness(WebhookConfig::default()).await?;
        let scheduler = SweepScheduler::new(h.retry.clone(), Duration::from_secs(3600), 10);

        assert!(!scheduler.is_running().await);
        scheduler.start().await;
        scheduler.start().await;
        assert!(scheduler.is_running().await);

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);

        // Restartable
        scheduler.start().await;
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_scheduler_retries_due_deliveries() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let h = harness(WebhookConfig::default()).await?;
        let endpoint = register(&h, &server.uri(), vec![EventType::BountyCreated], "s").await?;

        // Failed two minutes ago, so due now
        let failed_at = Utc::now() - chrono::Duration::minutes(2);
        let delivery = h
            .recorder
            .create_pending(endpoint.id, "bounty.created", "{}", failed_at)
            .await?;
        let outcome = AttemptOutcome {
            success: false,
            response_status: Some(500),
            response_body: None,
            error_message: None,
        };
        h.recorder
            .record_outcome(&delivery, &outcome, failed_at)
            .await?;

        let scheduler = SweepScheduler::new(h.retry.clone(), Duration::from_millis(20), 10);
        scheduler.start().await;

        let recorder = h.recorder.clone();
        let id = delivery.id;
        wait_for(
            move || {
                let recorder = recorder.clone();
                async move {
                    matches!(
                        recorder.get_delivery(id).await,
                        Ok(Some(d)) if d.status == DeliveryStatus::Delivered
                    )
                }
            },
            5,
            20,
        )
        .await?;

        scheduler.stop().await;
        Ok(())
    }
}
