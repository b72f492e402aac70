use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::{InMemoryStore, RateLimitConfig, RateLimitError};

/// Counter state after an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u32,
    pub window_start_ms: i64,
}

/// Backing storage for window counters.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request for `key`, starting a fresh window when the current
    /// one has ended.
    async fn increment(
        &self,
        key: &str,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<WindowCount, RateLimitError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Rejected { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Single-process limiter
    pub fn in_memory(config: RateLimitConfig) -> Self {
        let store = Arc::new(InMemoryStore::new(config.cleanup_interval));
        Self::new(store, config)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check `key` against the configured limit and window.
    pub async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError> {
        self.check_with(key, self.config.limit, self.config.window)
            .await
    }

    pub async fn check_with(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, RateLimitError> {
        self.check_at(key, limit, window, Utc::now().timestamp_millis())
            .await
    }

    pub async fn check_at(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now_ms: i64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let current = self.store.increment(key, window_ms, now_ms).await?;

        if current.count <= limit {
            return Ok(RateLimitDecision::Allowed {
                remaining: limit - current.count,
            });
        }

        let reset_at_ms = current.window_start_ms.saturating_add(window_ms);
        let retry_after_ms = u64::try_from(reset_at_ms - now_ms).unwrap_or(0);
        Ok(RateLimitDecision::Rejected {
            retry_after: Duration::from_millis(retry_after_ms),
        })
    }
}
