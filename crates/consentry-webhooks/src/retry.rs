//! Retry sweep over failed deliveries.

use chrono::Utc;
use consentry_core::DBDateTime;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::{Delivery, DeliveryRecorder, DeliverySender, EndpointRegistry, WebhookConfig, WebhookError};

/// Delay before the next attempt, indexed by attempts made before the
/// failure being recorded.
pub const BACKOFF_SCHEDULE: [Duration; 4] = [
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(30 * 60),
    Duration::from_secs(2 * 60 * 60),
];

/// Backoff for a delivery that had made `attempts_before` attempts when it
/// failed. Out-of-range counts clamp to the schedule's ends.
pub fn backoff_for(attempts_before: i32) -> Duration {
    let index = attempts_before.clamp(0, BACKOFF_SCHEDULE.len() as i32 - 1) as usize;
    BACKOFF_SCHEDULE[index]
}

pub struct RetryScheduler {
    registry: Arc<dyn EndpointRegistry>,
    recorder: Arc<DeliveryRecorder>,
    sender: Arc<DeliverySender>,
    config: WebhookConfig,
}

impl RetryScheduler {
    pub fn new(
        registry: Arc<dyn EndpointRegistry>,
        recorder: Arc<DeliveryRecorder>,
        sender: Arc<DeliverySender>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            registry,
            recorder,
            sender,
            config,
        }
    }

    /// Retry up to `limit` due deliveries. Returns how many were re-sent.
    pub async fn sweep(&self, limit: u64) -> Result<usize, WebhookError> {
        self.sweep_at(Utc::now(), limit).await
    }

    /// Sweep as of `now`. Due rows and the stale-pending cutoff are judged
    /// at `now`. Claims and outcomes are stamped with `now` advanced by the
    /// time the sweep has been running.
    pub async fn sweep_at(&self, now: DBDateTime, limit: u64) -> Result<usize, WebhookError> {
        let started = Instant::now();
        let clock = move || now + elapsed_since(started);
        let recovered = self
            .recorder
            .recover_stale_pending(now, self.config.stale_pending_after)
            .await?;
        if recovered > 0 {
            warn!(
                "Requeued {} delivery(ies) left pending by an interrupted attempt",
                recovered
            );
        }

        let due = self.recorder.due_deliveries(now, limit).await?;
        if due.is_empty() {
            debug!("No deliveries due for retry");
            return Ok(0);
        }
        let candidates = due.len();

        // Limit concurrent outbound requests
        let semaphore = Arc::new(Semaphore::new(self.config.sweep_concurrency.max(1)));
        let attempts = due.into_iter().map(|delivery| {
            let semaphore = semaphore.clone();
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return false;
                };
                self.retry_one(delivery, clock).await
            }
        });
        let processed = join_all(attempts)
            .await
            .into_iter()
            .filter(|attempted| *attempted)
            .count();

        info!(
            "Retry sweep re-sent {} of {} due deliveries",
            processed, candidates
        );
        Ok(processed)
    }

    /// Returns whether an attempt was made. The claim lease runs from the
    /// moment of claiming and the outcome is stamped when the send returns.
    async fn retry_one(&self, delivery: Delivery, clock: impl Fn() -> DBDateTime) -> bool {
        let endpoint = match self.registry.find_endpoint(delivery.endpoint_id).await {
            Ok(Some(endpoint)) if endpoint.is_active => endpoint,
            Ok(Some(_)) => {
                debug!(
                    "Skipping delivery {}: endpoint {} is inactive",
                    delivery.id, delivery.endpoint_id
                );
                return false;
            }
            Ok(None) => {
                debug!(
                    "Skipping delivery {}: endpoint {} no longer exists",
                    delivery.id, delivery.endpoint_id
                );
                return false;
            }
            Err(e) => {
                error!(
                    "Failed to load endpoint {} for delivery {}: {}",
                    delivery.endpoint_id, delivery.id, e
                );
                return false;
            }
        };

        match self
            .recorder
            .claim(&delivery, clock(), self.config.claim_lease)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("Delivery {} already claimed by another sweep", delivery.id);
                return false;
            }
            Err(e) => {
                error!("Failed to claim delivery {}: {}", delivery.id, e);
                return false;
            }
        }

        let outcome = self.sender.send(&endpoint, &delivery).await;
        if let Err(e) = self
            .recorder
            .record_outcome(&delivery, &outcome, clock())
            .await
        {
            error!("Failed to record retry of delivery {}: {}", delivery.id, e);
        }
        true
    }
}

fn elapsed_since(started: Instant) -> chrono::Duration {
    chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
}
