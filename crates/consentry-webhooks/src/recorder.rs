//! Persistence of delivery attempts.
//!
//! Every state change after creation is a conditional update keyed on the
//! attempt count the caller observed, so two writers racing on the same row
//! cannot both win and a `delivered` row is never modified again.

use chrono::{DateTime, Utc};
use consentry_core::DBDateTime;
use consentry_entities::{webhook_deliveries, DeliveryStatus};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::retry::backoff_for;
use crate::{AttemptOutcome, Delivery, WebhookConfig, WebhookError};

const STALE_PENDING_MESSAGE: &str = "delivery interrupted before a result was recorded";

/// Filter for the delivery audit listing
#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    pub status: Option<DeliveryStatus>,
    pub endpoint_id: Option<i32>,
    pub limit: u64,
}

pub struct DeliveryRecorder {
    db: Arc<DatabaseConnection>,
    max_attempts: i32,
}

impl DeliveryRecorder {
    pub fn new(db: Arc<DatabaseConnection>, config: &WebhookConfig) -> Self {
        Self {
            db,
            max_attempts: config.max_attempts,
        }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Insert the `pending` row that must exist before the first network call.
    pub async fn create_pending(
        &self,
        endpoint_id: i32,
        event_type: &str,
        payload: &str,
        now: DBDateTime,
    ) -> Result<Delivery, WebhookError> {
        let delivery = webhook_deliveries::ActiveModel {
            endpoint_id: Set(endpoint_id),
            event_type: Set(event_type.to_string()),
            payload: Set(payload.to_string()),
            status: Set(DeliveryStatus::Pending),
            attempts: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        Ok(delivery.insert(self.db.as_ref()).await?)
    }

    /// Record the result of one attempt on `delivery` as it was observed
    /// before the attempt. Returns `false` when another writer got there
    /// first and nothing was changed.
    pub async fn record_outcome(
        &self,
        delivery: &Delivery,
        outcome: &AttemptOutcome,
        now: DBDateTime,
    ) -> Result<bool, WebhookError> {
        let seen = delivery.attempts;
        let attempts = seen + 1;

        let (status, delivered_at, next_retry_at) = if outcome.success {
            (DeliveryStatus::Delivered, Some(now), None)
        } else {
            (
                DeliveryStatus::Failed,
                None,
                next_retry_time(seen, self.max_attempts, now),
            )
        };

        let mut update = webhook_deliveries::Entity::update_many()
            .col_expr(
                webhook_deliveries::Column::Status,
                Expr::value(status.as_str()),
            )
            .col_expr(webhook_deliveries::Column::Attempts, Expr::value(attempts))
            .col_expr(
                webhook_deliveries::Column::ResponseStatus,
                Expr::value(outcome.response_status.map(i32::from)),
            )
            .col_expr(
                webhook_deliveries::Column::ResponseBody,
                Expr::value(outcome.response_body.clone()),
            )
            .col_expr(
                webhook_deliveries::Column::ErrorMessage,
                Expr::value(outcome.error_message.clone()),
            )
            .col_expr(
                webhook_deliveries::Column::NextRetryAt,
                Expr::value(next_retry_at),
            )
            .col_expr(webhook_deliveries::Column::UpdatedAt, Expr::value(now));

        if delivered_at.is_some() {
            update = update.col_expr(
                webhook_deliveries::Column::DeliveredAt,
                Expr::value(delivered_at),
            );
        }

        let result = update
            .filter(webhook_deliveries::Column::Id.eq(delivery.id))
            .filter(webhook_deliveries::Column::Attempts.eq(seen))
            .filter(webhook_deliveries::Column::Status.ne(DeliveryStatus::Delivered))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            warn!(
                "Delivery {} changed concurrently; outcome of attempt {} discarded",
                delivery.id, attempts
            );
            return Ok(false);
        }

        if status == DeliveryStatus::Failed && next_retry_at.is_none() {
            warn!(
                "Delivery {} permanently failed after {} attempts",
                delivery.id, attempts
            );
        }
        Ok(true)
    }

    /// Take exclusive ownership of a due row for `lease`. Only the caller
    /// whose update affected the row may send it.
    pub async fn claim(
        &self,
        delivery: &Delivery,
        now: DBDateTime,
        lease: Duration,
    ) -> Result<bool, WebhookError> {
        let result = webhook_deliveries::Entity::update_many()
            .col_expr(
                webhook_deliveries::Column::NextRetryAt,
                Expr::value(Some(now + to_chrono(lease))),
            )
            .filter(webhook_deliveries::Column::Id.eq(delivery.id))
            .filter(webhook_deliveries::Column::Status.eq(DeliveryStatus::Failed))
            .filter(webhook_deliveries::Column::Attempts.eq(delivery.attempts))
            .filter(webhook_deliveries::Column::NextRetryAt.lte(now))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Failed rows whose retry time has come, oldest schedule first.
    pub async fn due_deliveries(
        &self,
        now: DBDateTime,
        limit: u64,
    ) -> Result<Vec<Delivery>, WebhookError> {
        let deliveries = webhook_deliveries::Entity::find()
            .filter(webhook_deliveries::Column::Status.eq(DeliveryStatus::Failed))
            .filter(webhook_deliveries::Column::Attempts.lt(self.max_attempts))
            .filter(webhook_deliveries::Column::NextRetryAt.is_not_null())
            .filter(webhook_deliveries::Column::NextRetryAt.lte(now))
            .order_by_asc(webhook_deliveries::Column::NextRetryAt)
            .order_by_asc(webhook_deliveries::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;
        Ok(deliveries)
    }

    /// Move `pending` rows older than `older_than` to `failed`, due now.
    ///
    /// A row stays `pending` only if the process died between creating it and
    /// recording the first attempt.
    pub async fn recover_stale_pending(
        &self,
        now: DBDateTime,
        older_than: Duration,
    ) -> Result<u64, WebhookError> {
        let cutoff = now - to_chrono(older_than);

        let result = webhook_deliveries::Entity::update_many()
            .col_expr(
                webhook_deliveries::Column::Status,
                Expr::value(DeliveryStatus::Failed.as_str()),
            )
            .col_expr(
                webhook_deliveries::Column::NextRetryAt,
                Expr::value(Some(now)),
            )
            .col_expr(
                webhook_deliveries::Column::ErrorMessage,
                Expr::value(STALE_PENDING_MESSAGE),
            )
            .col_expr(webhook_deliveries::Column::UpdatedAt, Expr::value(now))
            .filter(webhook_deliveries::Column::Status.eq(DeliveryStatus::Pending))
            .filter(webhook_deliveries::Column::CreatedAt.lte(cutoff))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected > 0 {
            debug!(
                "Recovered {} stale pending deliveries",
                result.rows_affected
            );
        }
        Ok(result.rows_affected)
    }

    pub async fn get_delivery(&self, id: i32) -> Result<Option<Delivery>, WebhookError> {
        Ok(webhook_deliveries::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn list_deliveries(
        &self,
        filter: DeliveryFilter,
    ) -> Result<Vec<Delivery>, WebhookError> {
        let mut query = webhook_deliveries::Entity::find();

        if let Some(status) = filter.status {
            query = query.filter(webhook_deliveries::Column::Status.eq(status));
        }
        if let Some(endpoint_id) = filter.endpoint_id {
            query = query.filter(webhook_deliveries::Column::EndpointId.eq(endpoint_id));
        }

        let deliveries = query
            .order_by_desc(webhook_deliveries::Column::Id)
            .limit(filter.limit)
            .all(self.db.as_ref())
            .await?;
        Ok(deliveries)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
}

/// Time at which a failed delivery becomes due again, if it ever does.
pub(crate) fn next_retry_time(
    attempts_before: i32,
    max_attempts: i32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if attempts_before + 1 < max_attempts {
        Some(now + to_chrono(backoff_for(attempts_before)))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use consentry_database::test_utils::TestDatabase;

    fn t0() -> DBDateTime {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn failure() -> AttemptOutcome {
        AttemptOutcome {
            success: false,
            response_status: Some(503),
            response_body: Some("unavailable".to_string()),
            error_message: Some("endpoint responded with HTTP 503".to_string()),
        }
    }

    fn success() -> AttemptOutcome {
        AttemptOutcome {
            success: true,
            response_status: Some(200),
            response_body: Some("ok".to_string()),
            error_message: None,
        }
    }

    async fn recorder() -> anyhow::Result<(TestDatabase, DeliveryRecorder)> {
        let test_db = TestDatabase::with_migrations().await?;
        let recorder = DeliveryRecorder::new(test_db.connection_arc(), &WebhookConfig::default());
        Ok((test_db, recorder))
    }

    #[test]
    fn test_next_retry_time_stops_at_cap() {
        let now = t0();
        assert_eq!(
            next_retry_time(0, 5, now),
            Some(now + chrono::Duration::seconds(60))
        );
        assert_eq!(
            next_retry_time(3, 5, now),
            Some(now + chrono::Duration::hours(2))
        );
        assert_eq!(next_retry_time(4, 5, now), None);
    }

    #[tokio::test]
    async fn test_create_pending() -> anyhow::Result<()> {
        let (_db, recorder) = recorder().await?;

        let delivery = recorder
            .create_pending(9, "bounty.created", r#"{"event":"bounty.created"}"#, t0())
            .await?;
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.attempts, 0);
        assert_eq!(delivery.endpoint_id, 9);
        assert!(delivery.next_retry_at.is_none());
        assert_eq!(delivery.created_at, t0());
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_schedules_retry() -> anyhow::Result<()> {
        let (_db, recorder) = recorder().await?;
        let delivery = recorder.create_pending(1, "bounty.created", "{}", t0()).await?;

        assert!(recorder.record_outcome(&delivery, &failure(), t0()).await?);

        let stored = recorder.get_delivery(delivery.id).await?.unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.response_status, Some(503));
        assert_eq!(
            stored.next_retry_at,
            Some(t0() + chrono::Duration::seconds(60))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_delivered_row_is_never_modified() -> anyhow::Result<()> {
        let (_db, recorder) = recorder().await?;
        let delivery = recorder.create_pending(1, "bounty.created", "{}", t0()).await?;

        assert!(recorder.record_outcome(&delivery, &success(), t0()).await?);
        let delivered = recorder.get_delivery(delivery.id).await?.unwrap();
        assert_eq!(delivered.status, DeliveryStatus::Delivered);
        assert_eq!(delivered.delivered_at, Some(t0()));

        // A late writer holding a stale view loses
        assert!(!recorder.record_outcome(&delivery, &failure(), t0()).await?);
        // Even one that observed the current attempt count
        assert!(!recorder.record_outcome(&delivered, &failure(), t0()).await?);

        let after = recorder.get_delivery(delivery.id).await?.unwrap();
        assert_eq!(after, delivered);
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() -> anyhow::Result<()> {
        let (_db, recorder) = recorder().await?;
        let delivery = recorder.create_pending(1, "bounty.created", "{}", t0()).await?;
        recorder.record_outcome(&delivery, &failure(), t0()).await?;

        let due_at = t0() + chrono::Duration::seconds(61);
        let due = recorder.due_deliveries(due_at, 10).await?;
        assert_eq!(due.len(), 1);

        let lease = Duration::from_secs(120);
        assert!(recorder.claim(&due[0], due_at, lease).await?);
        assert!(!recorder.claim(&due[0], due_at, lease).await?);

        // Leased rows are invisible to the next sweep
        assert!(recorder.due_deliveries(due_at, 10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_not_due_before_retry_time() -> anyhow::Result<()> {
        let (_db, recorder) = recorder().await?;
        let delivery = recorder.create_pending(1, "bounty.created", "{}", t0()).await?;
        recorder.record_outcome(&delivery, &failure(), t0()).await?;

        let early = t0() + chrono::Duration::seconds(59);
        assert!(recorder.due_deliveries(early, 10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_recover_stale_pending() -> anyhow::Result<()> {
        let (_db, recorder) = recorder().await?;
        let stale = recorder.create_pending(1, "bounty.created", "{}", t0()).await?;
        let fresh = recorder
            .create_pending(1, "bounty.created", "{}", t0() + chrono::Duration::minutes(4))
            .await?;

        let now = t0() + chrono::Duration::minutes(6);
        let recovered = recorder
            .recover_stale_pending(now, Duration::from_secs(300))
            .await?;
        assert_eq!(recovered, 1);

        let stale = recorder.get_delivery(stale.id).await?.unwrap();
        assert_eq!(stale.status, DeliveryStatus::Failed);
        assert_eq!(stale.attempts, 0);
        assert_eq!(stale.next_retry_at, Some(now));

        let fresh = recorder.get_delivery(fresh.id).await?.unwrap();
        assert_eq!(fresh.status, DeliveryStatus::Pending);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_deliveries_filters() -> anyhow::Result<()> {
        let (_db, recorder) = recorder().await?;
        let a = recorder.create_pending(1, "bounty.created", "{}", t0()).await?;
        recorder.create_pending(2, "bounty.created", "{}", t0()).await?;
        recorder.record_outcome(&a, &failure(), t0()).await?;

        let failed = recorder
            .list_deliveries(DeliveryFilter {
                status: Some(DeliveryStatus::Failed),
                endpoint_id: None,
                limit: 50,
            })
            .await?;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, a.id);

        let for_endpoint_two = recorder
            .list_deliveries(DeliveryFilter {
                status: None,
                endpoint_id: Some(2),
                limit: 50,
            })
            .await?;
        assert_eq!(for_endpoint_two.len(), 1);
        assert_eq!(for_endpoint_two[0].status, DeliveryStatus::Pending);
        Ok(())
    }
}
