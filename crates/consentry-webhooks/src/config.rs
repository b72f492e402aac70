use std::time::Duration;

/// Tuning for delivery, retry and sweep behaviour.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Hard limit on each outbound attempt, connect through body read
    pub request_timeout: Duration,
    pub max_attempts: i32,
    pub sweep_batch_size: u64,
    /// Deliveries retried in parallel within one sweep
    pub sweep_concurrency: usize,
    pub sweep_interval: Duration,
    /// How long a claimed row stays invisible to other sweeps
    pub claim_lease: Duration,
    /// Age after which a `pending` row is considered abandoned
    pub stale_pending_after: Duration,
    /// Characters of the receiver's response body kept on the delivery row
    pub response_body_limit: usize,
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_attempts: 5,
            sweep_batch_size: 100,
            sweep_concurrency: 8,
            sweep_interval: Duration::from_secs(60),
            claim_lease: Duration::from_secs(120),
            stale_pending_after: Duration::from_secs(300),
            response_body_limit: 2048,
            user_agent: "Consentry-Webhook/1.0".to_string(),
        }
    }
}
