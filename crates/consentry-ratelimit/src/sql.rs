//! Counters stored in `rate_limit_counters` so every server instance
//! enforces the same limit.
//!
//! Each increment is a conditional update on the row's observed
//! `(window_start_ms, count)`. A concurrent writer makes the update miss,
//! and the increment is retried against the fresh row.

use async_trait::async_trait;
use consentry_entities::rate_limit_counters;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{RateLimitError, RateLimitStore, WindowCount};

const MAX_CAS_ATTEMPTS: u32 = 8;

pub struct DatabaseStore {
    db: Arc<DatabaseConnection>,
    cleanup_interval_ms: i64,
    last_cleanup_ms: Mutex<i64>,
}

impl DatabaseStore {
    pub fn new(db: Arc<DatabaseConnection>, cleanup_interval: Duration) -> Self {
        Self {
            db,
            cleanup_interval_ms: i64::try_from(cleanup_interval.as_millis()).unwrap_or(i64::MAX),
            last_cleanup_ms: Mutex::new(0),
        }
    }

    /// Delete counters whose window has ended.
    pub async fn purge_expired(&self, now_ms: i64) -> Result<u64, RateLimitError> {
        let result = rate_limit_counters::Entity::delete_many()
            .filter(rate_limit_counters::Column::ExpiresAtMs.lte(now_ms))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    async fn maybe_purge(&self, now_ms: i64) {
        let mut last = self.last_cleanup_ms.lock().await;
        if now_ms - *last < self.cleanup_interval_ms {
            return;
        }
        *last = now_ms;
        drop(last);

        match self.purge_expired(now_ms).await {
            Ok(0) => {}
            Ok(removed) => debug!("Purged {} expired rate limit counters", removed),
            Err(e) => warn!("Failed to purge rate limit counters: {}", e),
        }
    }

    /// Insert a first counter for `key`. Returns false if another writer
    /// created the row first.
    async fn try_insert(&self, key: &str, window_ms: i64, now_ms: i64) -> Result<bool, RateLimitError> {
        let counter = rate_limit_counters::ActiveModel {
            key: Set(key.to_string()),
            window_start_ms: Set(now_ms),
            count: Set(1),
            expires_at_ms: Set(now_ms.saturating_add(window_ms)),
        };
        let inserted = rate_limit_counters::Entity::insert(counter)
            .on_conflict(
                OnConflict::column(rate_limit_counters::Column::Key)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(inserted == 1)
    }

    /// Replace `observed` with the next state if nobody changed it meanwhile.
    async fn try_advance(
        &self,
        observed: &rate_limit_counters::Model,
        next: WindowCount,
        window_ms: i64,
    ) -> Result<bool, RateLimitError> {
        let result = rate_limit_counters::Entity::update_many()
            .col_expr(
                rate_limit_counters::Column::WindowStartMs,
                Expr::value(next.window_start_ms),
            )
            .col_expr(
                rate_limit_counters::Column::Count,
                Expr::value(next.count as i32),
            )
            .col_expr(
                rate_limit_counters::Column::ExpiresAtMs,
                Expr::value(next.window_start_ms.saturating_add(window_ms)),
            )
            .filter(rate_limit_counters::Column::Key.eq(observed.key.as_str()))
            .filter(rate_limit_counters::Column::WindowStartMs.eq(observed.window_start_ms))
            .filter(rate_limit_counters::Column::Count.eq(observed.count))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }
}

#[async_trait]
impl RateLimitStore for DatabaseStore {
    async fn increment(
        &self,
        key: &str,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<WindowCount, RateLimitError> {
        self.maybe_purge(now_ms).await;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = rate_limit_counters::Entity::find_by_id(key.to_string())
                .one(self.db.as_ref())
                .await?;

            let Some(current) = current else {
                if self.try_insert(key, window_ms, now_ms).await? {
                    return Ok(WindowCount {
                        count: 1,
                        window_start_ms: now_ms,
                    });
                }
                continue;
            };

            let next = if now_ms >= current.expires_at_ms {
                WindowCount {
                    count: 1,
                    window_start_ms: now_ms,
                }
            } else {
                WindowCount {
                    count: u32::try_from(current.count).unwrap_or(0).saturating_add(1),
                    window_start_ms: current.window_start_ms,
                }
            };

            if self.try_advance(&current, next, window_ms).await? {
                return Ok(next);
            }
            debug!("Rate limit counter for {} changed concurrently, retrying", key);
        }

        Err(RateLimitError::Contention {
            key: key.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }
}
